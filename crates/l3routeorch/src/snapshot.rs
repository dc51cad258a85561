//! Desired-state snapshot and neighbor event input shapes.
//!
//! These are the records handed over by the configuration-store client and
//! the neighbor resolver. The engine reads them but never keeps them.

use crate::error::{Result, RouteError};
use crate::types::{AddressFamily, DomainId, EgressId, NexthopKey, RouteKey};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

fn default_true() -> bool {
    true
}

/// Next-hop row of a route record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NexthopRecord {
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub ports: Vec<String>,
    /// Unset in the store means selected.
    #[serde(default = "default_true")]
    pub selected: bool,
}

impl NexthopRecord {
    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip.into()),
            ports: vec![],
            selected: true,
        }
    }

    pub fn port(port: impl Into<String>) -> Self {
        Self {
            ip_address: None,
            ports: vec![port.into()],
            selected: true,
        }
    }

    pub fn unselected(mut self) -> Self {
        self.selected = false;
        self
    }

    /// Cache key for this row.
    ///
    /// The IP address wins when present; otherwise only the first listed
    /// port is considered.
    // TODO: program every listed port once ECMP over ports is supported
    pub fn key(&self) -> Result<NexthopKey> {
        match (&self.ip_address, self.ports.first()) {
            (Some(ip), _) if !ip.is_empty() => NexthopKey::new(Some(ip), None),
            (_, Some(port)) if !port.is_empty() => NexthopKey::new(None, Some(port)),
            _ => Err(RouteError::NexthopMissingKey),
        }
    }
}

/// Route row of the desired-state table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouteRecord {
    pub domain: DomainId,
    pub origin: String,
    pub prefix: String,
    #[serde(default)]
    pub family: AddressFamily,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub nexthops: Vec<NexthopRecord>,
    #[serde(default)]
    pub changed: bool,
    #[serde(default)]
    pub inserted: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl RouteRecord {
    /// Creates a selected record with no change flags.
    pub fn new(domain: impl Into<String>, origin: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            origin: origin.into(),
            prefix: prefix.into(),
            selected: true,
            ..Default::default()
        }
    }

    pub fn with_nexthop(mut self, nexthop: NexthopRecord) -> Self {
        self.nexthops.push(nexthop);
        self
    }

    pub fn with_selected(mut self, selected: bool) -> Self {
        self.selected = selected;
        self
    }

    pub fn with_changed(mut self) -> Self {
        self.changed = true;
        self
    }

    pub fn key(&self) -> RouteKey {
        RouteKey::new(self.origin.clone(), self.prefix.clone())
    }

    /// Returns true if change tracking flagged this row in the current pass.
    pub fn is_flagged(&self) -> bool {
        self.changed || self.inserted || self.deleted
    }

    /// Computes the eligible next-hop keys in record order.
    ///
    /// Unselected rows are skipped silently, rows without an IP or usable
    /// port are returned as errors, duplicates keep the first occurrence.
    pub fn eligible_nexthops(&self) -> (Vec<NexthopKey>, Vec<RouteError>) {
        let mut keys = Vec::new();
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for nexthop in self.nexthops.iter().filter(|nh| nh.selected) {
            match nexthop.key() {
                Ok(key) => {
                    if seen.insert(key.clone()) {
                        keys.push(key);
                    } else {
                        debug!("nh {} specified twice in route {}", key, self.key());
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        (keys, errors)
    }
}

/// Full desired-state view of the route table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouteSnapshot {
    #[serde(default)]
    pub routes: Vec<RouteRecord>,
}

impl RouteSnapshot {
    pub fn new(routes: Vec<RouteRecord>) -> Self {
        Self { routes }
    }

    /// Domains that appear in this snapshot, sorted.
    pub fn domains(&self) -> BTreeSet<DomainId> {
        self.routes.iter().map(|r| r.domain.clone()).collect()
    }

    /// Candidate set: selected records of `domain` keyed by identity.
    ///
    /// A duplicate identity keeps the first record.
    pub fn candidates(&self, domain: &str) -> BTreeMap<RouteKey, &RouteRecord> {
        let mut candidates = BTreeMap::new();
        for record in self.routes.iter().filter(|r| r.domain == domain && r.selected) {
            let key = record.key();
            if candidates.contains_key(&key) {
                debug!("route {} specified twice", key);
                continue;
            }
            candidates.insert(key, record);
        }
        candidates
    }
}

/// Neighbor resolution result for one IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborEvent {
    /// Restricts the event to one domain; `None` applies it to all.
    #[serde(default)]
    pub domain: Option<DomainId>,
    pub ip: String,
    pub resolved: bool,
    #[serde(default)]
    pub egress_id: Option<EgressId>,
}

impl NeighborEvent {
    pub fn resolved(ip: impl Into<String>, egress_id: EgressId) -> Self {
        Self {
            domain: None,
            ip: ip.into(),
            resolved: true,
            egress_id: Some(egress_id),
        }
    }

    pub fn unresolved(ip: impl Into<String>) -> Self {
        Self {
            domain: None,
            ip: ip.into(),
            resolved: false,
            egress_id: None,
        }
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}
