//! Per-domain route cache.
//!
//! Routes live in an arena keyed by [`RouteId`] and own their next-hops by
//! value. Two side indices point into the arena:
//!
//! - `by_key`: `(origin, prefix)` -> `RouteId`
//! - [`NeighborIndex`]: next-hop IP -> set of `RouteId`s with a next-hop on
//!   that IP, used to fan neighbor events out to routes
//!
//! Every mutation goes through [`DomainCache`] methods that update the arena
//! and both indices together, so an observer holding the domain lock never
//! sees them disagree. Port next-hops are never in the `NeighborIndex`.

use crate::backend::{NexthopDescriptor, NexthopResult};
use crate::error::{Result, RouteError};
use crate::status::StatusChange;
use crate::types::{AddressFamily, EgressId, NexthopKey, ResolutionState, RouteKey};
use l3_orch_common::SyncMap;
use log::debug;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Arena index of a cached route. Never reused within a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(u64);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A cached next-hop, owned by exactly one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nexthop {
    key: NexthopKey,
    pub state: ResolutionState,
    /// Valid only while resolved.
    pub egress_id: Option<EgressId>,
    /// Set after a failed hardware call, cleared by the next success.
    pub error: Option<String>,
}

impl Nexthop {
    /// Creates an unresolved next-hop; exactly one of `ip`/`port` must be set.
    pub fn new(ip: Option<&str>, port: Option<&str>) -> Result<Self> {
        NexthopKey::new(ip, port).map(Self::from_key)
    }

    pub fn from_key(key: NexthopKey) -> Self {
        Self {
            key,
            state: ResolutionState::Unresolved,
            egress_id: None,
            error: None,
        }
    }

    pub fn key(&self) -> &NexthopKey {
        &self.key
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn is_resolved(&self) -> bool {
        self.state.is_resolved()
    }

    /// Sets the resolution state; the egress id is dropped when unresolved.
    pub fn set_resolution(&mut self, state: ResolutionState, egress_id: Option<EgressId>) {
        self.state = state;
        self.egress_id = if state.is_resolved() { egress_id } else { None };
    }

    /// Descriptor of the current state, as sent to the backend.
    pub fn descriptor(&self) -> NexthopDescriptor {
        NexthopDescriptor {
            id: self.key.id().to_string(),
            kind: self.key.kind(),
            state: self.state,
            egress_id: self.egress_id,
        }
    }
}

/// A cached route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    key: RouteKey,
    family: AddressFamily,
    /// Insertion-ordered; the hardware cap applies per call, not here.
    nexthops: Vec<Nexthop>,
    /// Route-level malformed-input report, if any.
    error: Option<String>,
}

impl Route {
    fn new(key: RouteKey, family: AddressFamily) -> Self {
        Self {
            key,
            family,
            nexthops: Vec::new(),
            error: None,
        }
    }

    pub fn key(&self) -> &RouteKey {
        &self.key
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn prefix(&self) -> &str {
        &self.key.prefix
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn nexthops(&self) -> &[Nexthop] {
        &self.nexthops
    }

    pub fn nexthop(&self, key: &NexthopKey) -> Option<&Nexthop> {
        self.nexthops.iter().find(|nh| nh.key() == key)
    }

    pub fn contains(&self, key: &NexthopKey) -> bool {
        self.nexthop(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.nexthops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nexthops.is_empty()
    }
}

/// Non-owning reverse index: next-hop IP -> routes using it.
#[derive(Debug, Default)]
pub struct NeighborIndex {
    refs: SyncMap<String, BTreeSet<RouteId>>,
}

impl NeighborIndex {
    fn insert(&mut self, ip: &str, route: RouteId) {
        self.refs
            .get_or_insert_with(ip.to_string(), BTreeSet::new)
            .insert(route);
    }

    fn remove(&mut self, ip: &str, route: RouteId) {
        let now_empty = match self.refs.get_mut(&ip.to_string()) {
            Some(routes) => {
                routes.remove(&route);
                routes.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.refs.remove(&ip.to_string());
        }
    }

    /// Routes holding a next-hop on `ip`, in ascending id order.
    pub fn routes_for(&self, ip: &str) -> Vec<RouteId> {
        self.refs
            .get(&ip.to_string())
            .map(|routes| routes.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.refs.contains_key(&ip.to_string())
    }

    /// Number of indexed IPs.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Total number of (IP, route) references.
    pub fn reference_count(&self) -> usize {
        self.refs.values().map(BTreeSet::len).sum()
    }
}

/// Neighbors currently known to be resolved, fed by neighbor events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborTable {
    resolved: HashMap<String, Option<EgressId>>,
}

impl NeighborTable {
    pub fn update(&mut self, ip: &str, resolved: bool, egress_id: Option<EgressId>) {
        if resolved {
            self.resolved.insert(ip.to_string(), egress_id);
        } else {
            self.resolved.remove(ip);
        }
    }

    /// Resolution state and egress id of `ip`.
    pub fn lookup(&self, ip: &str) -> (ResolutionState, Option<EgressId>) {
        match self.resolved.get(ip) {
            Some(egress_id) => (ResolutionState::Resolved, *egress_id),
            None => (ResolutionState::Unresolved, None),
        }
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Route cache, next-hop sets and neighbor indices of one routing domain.
#[derive(Debug, Default)]
pub struct DomainCache {
    routes: SyncMap<RouteId, Route>,
    by_key: HashMap<RouteKey, RouteId>,
    neighbor_index: NeighborIndex,
    neighbors: NeighborTable,
    next_id: u64,
}

impl DomainCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty cache whose next-hops resolve against `neighbors`.
    pub fn with_neighbors(neighbors: NeighborTable) -> Self {
        Self {
            neighbors,
            ..Default::default()
        }
    }

    /// Number of cached routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn find(&self, key: &RouteKey) -> Option<RouteId> {
        self.by_key.get(key).copied()
    }

    pub fn route(&self, id: RouteId) -> Option<&Route> {
        self.routes.get(&id)
    }

    pub fn route_by_key(&self, key: &RouteKey) -> Option<&Route> {
        self.find(key).and_then(|id| self.route(id))
    }

    /// Cached identities in sorted order.
    pub fn route_keys(&self) -> Vec<RouteKey> {
        let mut keys: Vec<_> = self.by_key.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn neighbor_index(&self) -> &NeighborIndex {
        &self.neighbor_index
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn neighbors_mut(&mut self) -> &mut NeighborTable {
        &mut self.neighbors
    }

    /// Initial resolution of a new next-hop; ports always start unresolved.
    pub fn initial_resolution(&self, key: &NexthopKey) -> (ResolutionState, Option<EgressId>) {
        match key.ip() {
            Some(ip) => self.neighbors.lookup(ip),
            None => (ResolutionState::Unresolved, None),
        }
    }

    /// Inserts an empty route.
    pub fn insert_route(&mut self, key: RouteKey, family: AddressFamily) -> Result<RouteId> {
        if self.by_key.contains_key(&key) {
            return Err(RouteError::RouteExists(key.to_string()));
        }

        let id = RouteId(self.next_id);
        self.next_id += 1;

        debug!("Cache add route {}", key);
        self.by_key.insert(key.clone(), id);
        self.routes.insert(id, Route::new(key, family));
        Ok(id)
    }

    /// Removes a route and all its next-hops, dropping their index entries.
    pub fn remove_route(&mut self, id: RouteId) -> Option<Route> {
        let route = self.routes.remove(&id)?;
        self.by_key.remove(route.key());

        for nexthop in route.nexthops() {
            if let Some(ip) = nexthop.key().ip() {
                self.neighbor_index.remove(ip, id);
            }
        }

        debug!("Cache delete route {}", route.key());
        Some(route)
    }

    /// Adds a next-hop to a route, indexing it if it is IP-keyed.
    pub fn insert_nexthop(&mut self, id: RouteId, nexthop: Nexthop) -> Result<()> {
        let route = self
            .routes
            .get_mut(&id)
            .ok_or_else(|| RouteError::RouteNotFound(id.to_string()))?;

        if route.contains(nexthop.key()) {
            return Err(RouteError::NexthopExists {
                route: route.key().to_string(),
                nexthop: nexthop.key().to_string(),
            });
        }

        debug!("Cache add NH {} in route {}", nexthop.key(), route.key());
        if let Some(ip) = nexthop.key().ip() {
            self.neighbor_index.insert(ip, id);
        }
        route.nexthops.push(nexthop);
        Ok(())
    }

    /// Validates and adds a next-hop given as raw IP/port.
    ///
    /// Nothing is mutated unless exactly one of `ip`/`port` is set.
    pub fn add_nexthop(&mut self, id: RouteId, ip: Option<&str>, port: Option<&str>) -> Result<()> {
        let nexthop = Nexthop::new(ip, port)?;
        self.insert_nexthop(id, nexthop)
    }

    /// Removes one next-hop from a route, dropping its index entry.
    pub fn remove_nexthop(&mut self, id: RouteId, key: &NexthopKey) -> Option<Nexthop> {
        let route = self.routes.get_mut(&id)?;
        let pos = route.nexthops.iter().position(|nh| nh.key() == key)?;
        let nexthop = route.nexthops.remove(pos);

        debug!("Cache delete NH {} in route {}", key, route.key());
        if let Some(ip) = key.ip() {
            self.neighbor_index.remove(ip, id);
        }
        Some(nexthop)
    }

    pub fn nexthop_mut(&mut self, id: RouteId, key: &NexthopKey) -> Option<&mut Nexthop> {
        self.routes
            .get_mut(&id)?
            .nexthops
            .iter_mut()
            .find(|nh| nh.key() == key)
    }

    /// Records the route-level error; returns true if it changed.
    pub fn set_route_error(&mut self, id: RouteId, error: Option<String>) -> bool {
        match self.routes.get_mut(&id) {
            Some(route) if route.error != error => {
                route.error = error;
                true
            }
            _ => false,
        }
    }

    /// Applies per-next-hop backend results to a route.
    ///
    /// Successes clear any recorded error (and adopt a returned egress id),
    /// failures record the backend's error string. Results for next-hops no
    /// longer cached are ignored. Returns the next-hops whose error changed.
    pub fn apply_results(&mut self, id: RouteId, results: &[NexthopResult]) -> Vec<StatusChange> {
        let Some(route) = self.routes.get_mut(&id) else {
            return vec![];
        };

        let mut changes = Vec::new();
        for result in results {
            let Some(nexthop) = route.nexthops.iter_mut().find(|nh| nh.id() == result.id) else {
                debug!("No cached NH {} for backend result", result.id);
                continue;
            };

            let error = if result.is_success() {
                if let (Some(egress_id), true) = (result.egress_id, nexthop.is_resolved()) {
                    nexthop.egress_id = Some(egress_id);
                }
                None
            } else {
                Some(result.error_text())
            };

            if nexthop.error != error {
                match &error {
                    Some(e) => debug!("Update error status of {} with '{}'", nexthop.key(), e),
                    None => debug!("Clear error status of {}", nexthop.key()),
                }
                nexthop.error = error.clone();
                changes.push(StatusChange {
                    nexthop: nexthop.id().to_string(),
                    error,
                });
            }
        }
        changes
    }

    /// Debug dump of routes, next-hops and the neighbor index.
    pub fn dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for key in self.route_keys() {
            let Some(route) = self.route_by_key(&key) else {
                continue;
            };
            match route.error() {
                Some(error) => lines.push(format!("Route : {} error {:?}", key, error)),
                None => lines.push(format!("Route : {}", key)),
            }
            for nexthop in route.nexthops() {
                lines.push(format!(
                    "  NH : '{}' {:?} egress {:?} error {:?}",
                    nexthop.key(),
                    nexthop.state,
                    nexthop.egress_id,
                    nexthop.error
                ));
            }
        }

        let mut ips: Vec<_> = self.neighbor_index.refs.keys().cloned().collect();
        ips.sort();
        for ip in ips {
            for id in self.neighbor_index.routes_for(&ip) {
                if let Some(route) = self.route(id) {
                    lines.push(format!("Domain NH : '{}' -> Route '{}'", ip, route.key()));
                }
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NexthopKind;
    use pretty_assertions::assert_eq;

    fn ip(addr: &str) -> NexthopKey {
        NexthopKey::Ip(addr.to_string())
    }

    fn port(name: &str) -> NexthopKey {
        NexthopKey::Port(name.to_string())
    }

    #[test]
    fn test_insert_and_find_route() {
        let mut cache = DomainCache::new();
        let key = RouteKey::new("static", "10.0.0.0/24");

        let id = cache.insert_route(key.clone(), AddressFamily::Ipv4).unwrap();

        assert_eq!(cache.find(&key), Some(id));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.route(id).unwrap().prefix(), "10.0.0.0/24");
        assert_eq!(
            cache.insert_route(key.clone(), AddressFamily::Ipv4),
            Err(RouteError::RouteExists("static:10.0.0.0/24".to_string()))
        );
        assert!(cache.find(&RouteKey::new("bgp", "10.0.0.0/24")).is_none());
    }

    #[test]
    fn test_nexthop_insert_updates_neighbor_index() {
        let mut cache = DomainCache::new();
        let id = cache
            .insert_route(RouteKey::new("static", "10.0.0.0/24"), AddressFamily::Ipv4)
            .unwrap();

        cache.insert_nexthop(id, Nexthop::from_key(ip("10.0.0.1"))).unwrap();
        cache.insert_nexthop(id, Nexthop::from_key(port("Ethernet0"))).unwrap();

        assert_eq!(cache.route(id).unwrap().len(), 2);
        assert_eq!(cache.neighbor_index().routes_for("10.0.0.1"), vec![id]);
        assert!(!cache.neighbor_index().contains("Ethernet0"));
        assert_eq!(cache.neighbor_index().len(), 1);
    }

    #[test]
    fn test_duplicate_nexthop_rejected() {
        let mut cache = DomainCache::new();
        let id = cache
            .insert_route(RouteKey::new("static", "10.0.0.0/24"), AddressFamily::Ipv4)
            .unwrap();
        cache.insert_nexthop(id, Nexthop::from_key(ip("10.0.0.1"))).unwrap();

        let err = cache
            .insert_nexthop(id, Nexthop::from_key(ip("10.0.0.1")))
            .unwrap_err();

        assert!(matches!(err, RouteError::NexthopExists { .. }));
        assert_eq!(cache.neighbor_index().reference_count(), 1);
    }

    #[test]
    fn test_add_nexthop_both_or_neither_does_not_mutate() {
        let mut cache = DomainCache::new();
        let id = cache
            .insert_route(RouteKey::new("static", "10.0.0.0/24"), AddressFamily::Ipv4)
            .unwrap();

        assert!(cache.add_nexthop(id, Some("10.0.0.1"), Some("Ethernet0")).is_err());
        assert!(cache.add_nexthop(id, None, None).is_err());

        assert!(cache.route(id).unwrap().is_empty());
        assert!(cache.neighbor_index().is_empty());

        cache.add_nexthop(id, None, Some("Ethernet0")).unwrap();
        assert_eq!(cache.route(id).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_route_cascades() {
        let mut cache = DomainCache::new();
        let shared = ip("10.0.0.1");
        let a = cache
            .insert_route(RouteKey::new("static", "10.0.0.0/24"), AddressFamily::Ipv4)
            .unwrap();
        let b = cache
            .insert_route(RouteKey::new("static", "10.1.0.0/24"), AddressFamily::Ipv4)
            .unwrap();
        cache.insert_nexthop(a, Nexthop::from_key(shared.clone())).unwrap();
        cache.insert_nexthop(a, Nexthop::from_key(ip("10.0.0.2"))).unwrap();
        cache.insert_nexthop(b, Nexthop::from_key(shared)).unwrap();

        let removed = cache.remove_route(a).unwrap();

        assert_eq!(removed.len(), 2);
        assert!(cache.find(removed.key()).is_none());
        assert_eq!(cache.neighbor_index().routes_for("10.0.0.1"), vec![b]);
        assert!(!cache.neighbor_index().contains("10.0.0.2"));
        assert!(cache.remove_route(a).is_none());
    }

    #[test]
    fn test_route_ids_not_reused() {
        let mut cache = DomainCache::new();
        let key = RouteKey::new("static", "10.0.0.0/24");

        let first = cache.insert_route(key.clone(), AddressFamily::Ipv4).unwrap();
        cache.remove_route(first);
        let second = cache.insert_route(key, AddressFamily::Ipv4).unwrap();

        assert_ne!(first, second);
        assert!(cache.route(first).is_none());
    }

    #[test]
    fn test_remove_nexthop() {
        let mut cache = DomainCache::new();
        let id = cache
            .insert_route(RouteKey::new("static", "10.0.0.0/24"), AddressFamily::Ipv4)
            .unwrap();
        cache.insert_nexthop(id, Nexthop::from_key(ip("10.0.0.1"))).unwrap();

        let removed = cache.remove_nexthop(id, &ip("10.0.0.1")).unwrap();

        assert_eq!(removed.id(), "10.0.0.1");
        assert!(cache.neighbor_index().is_empty());
        assert!(cache.remove_nexthop(id, &ip("10.0.0.1")).is_none());
    }

    #[test]
    fn test_initial_resolution_from_neighbor_table() {
        let mut cache = DomainCache::new();
        cache.neighbors_mut().update("10.0.0.1", true, Some(100));

        assert_eq!(
            cache.initial_resolution(&ip("10.0.0.1")),
            (ResolutionState::Resolved, Some(100))
        );
        assert_eq!(
            cache.initial_resolution(&ip("10.0.0.2")),
            (ResolutionState::Unresolved, None)
        );
        assert_eq!(
            cache.initial_resolution(&port("Ethernet0")),
            (ResolutionState::Unresolved, None)
        );

        cache.neighbors_mut().update("10.0.0.1", false, None);
        assert!(cache.neighbors().is_empty());
    }

    #[test]
    fn test_seeded_neighbor_table() {
        let mut seed = NeighborTable::default();
        seed.update("10.0.0.1", true, Some(9));

        let cache = DomainCache::with_neighbors(seed.clone());

        assert!(cache.is_empty());
        assert_eq!(cache.neighbors(), &seed);
        assert_eq!(
            cache.initial_resolution(&ip("10.0.0.1")),
            (ResolutionState::Resolved, Some(9))
        );
    }

    #[test]
    fn test_apply_results_records_and_clears_errors() {
        let mut cache = DomainCache::new();
        let id = cache
            .insert_route(RouteKey::new("static", "10.0.0.0/24"), AddressFamily::Ipv4)
            .unwrap();
        cache.insert_nexthop(id, Nexthop::from_key(ip("10.0.0.1"))).unwrap();
        cache.insert_nexthop(id, Nexthop::from_key(ip("10.0.0.2"))).unwrap();

        let changes = cache.apply_results(
            id,
            &[
                NexthopResult::success("10.0.0.1"),
                NexthopResult::failure("10.0.0.2", -4, "no resources"),
                NexthopResult::success("10.9.9.9"),
            ],
        );
        assert_eq!(
            changes,
            vec![StatusChange {
                nexthop: "10.0.0.2".to_string(),
                error: Some("no resources".to_string()),
            }]
        );

        // Same failure again is not a change
        let changes = cache.apply_results(id, &[NexthopResult::failure("10.0.0.2", -4, "no resources")]);
        assert!(changes.is_empty());

        let changes = cache.apply_results(id, &[NexthopResult::success("10.0.0.2")]);
        assert_eq!(changes[0].error, None);
        assert_eq!(cache.route(id).unwrap().nexthop(&ip("10.0.0.2")).unwrap().error, None);
    }

    #[test]
    fn test_set_route_error_reports_changes() {
        let mut cache = DomainCache::new();
        let id = cache
            .insert_route(RouteKey::new("static", "10.0.0.0/24"), AddressFamily::Ipv4)
            .unwrap();

        assert!(cache.set_route_error(id, Some("too many".to_string())));
        assert!(!cache.set_route_error(id, Some("too many".to_string())));
        assert_eq!(cache.route(id).unwrap().error(), Some("too many"));
        assert!(cache.set_route_error(id, None));
        assert!(!cache.set_route_error(id, None));
    }

    #[test]
    fn test_nexthop_descriptor_and_resolution() {
        let mut nexthop = Nexthop::from_key(ip("10.0.0.1"));
        nexthop.set_resolution(ResolutionState::Resolved, Some(7));

        let descriptor = nexthop.descriptor();
        assert_eq!(descriptor.kind, NexthopKind::Ip);
        assert_eq!(descriptor.state, ResolutionState::Resolved);
        assert_eq!(descriptor.egress_id, Some(7));

        nexthop.set_resolution(ResolutionState::Unresolved, Some(7));
        assert_eq!(nexthop.egress_id, None);
    }

    #[test]
    fn test_dump_lists_routes_and_index() {
        let mut cache = DomainCache::new();
        let id = cache
            .insert_route(RouteKey::new("static", "10.0.0.0/24"), AddressFamily::Ipv4)
            .unwrap();
        cache.insert_nexthop(id, Nexthop::from_key(ip("10.0.0.1"))).unwrap();

        let lines = cache.dump();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Route : static:10.0.0.0/24");
        assert_eq!(lines[2], "Domain NH : '10.0.0.1' -> Route 'static:10.0.0.0/24'");
    }
}
