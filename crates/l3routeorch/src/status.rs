//! Status write-back toward the configuration store.

use crate::types::{DomainId, RouteKey};
use dashmap::DashMap;
use serde::Serialize;

/// A next-hop whose error annotation changed during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// IP address or port name of the next-hop.
    pub nexthop: String,
    /// New error; `None` clears the annotation.
    pub error: Option<String>,
}

/// Sink for `error` annotations.
///
/// Implemented by the configuration-store client. Writes are fire-and-forget
/// from the engine's point of view.
pub trait StatusWriter: Send + Sync {
    /// Writes or clears the error annotation of one next-hop.
    fn write_nexthop_status(&self, domain: &str, route: &RouteKey, nexthop: &str, error: Option<&str>);

    /// Writes or clears a route-level error annotation.
    fn write_route_status(&self, domain: &str, route: &RouteKey, error: Option<&str>);
}

/// Key of one annotation in a [`StatusTable`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StatusKey {
    pub domain: DomainId,
    pub route: String,
    /// `None` for route-level annotations.
    pub nexthop: Option<String>,
}

/// In-memory status annotations.
#[derive(Debug, Default)]
pub struct StatusTable {
    errors: DashMap<StatusKey, String>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nexthop_error(&self, domain: &str, route: &RouteKey, nexthop: &str) -> Option<String> {
        self.errors
            .get(&Self::key(domain, route, Some(nexthop)))
            .map(|e| e.value().clone())
    }

    pub fn route_error(&self, domain: &str, route: &RouteKey) -> Option<String> {
        self.errors
            .get(&Self::key(domain, route, None))
            .map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// All annotations, sorted by key.
    pub fn entries(&self) -> Vec<(StatusKey, String)> {
        let mut entries: Vec<_> = self
            .errors
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort();
        entries
    }

    fn key(domain: &str, route: &RouteKey, nexthop: Option<&str>) -> StatusKey {
        StatusKey {
            domain: domain.to_string(),
            route: route.to_string(),
            nexthop: nexthop.map(str::to_string),
        }
    }

    fn write(&self, key: StatusKey, error: Option<&str>) {
        match error {
            Some(error) => {
                self.errors.insert(key, error.to_string());
            }
            None => {
                self.errors.remove(&key);
            }
        }
    }
}

impl StatusWriter for StatusTable {
    fn write_nexthop_status(&self, domain: &str, route: &RouteKey, nexthop: &str, error: Option<&str>) {
        self.write(Self::key(domain, route, Some(nexthop)), error);
    }

    fn write_route_status(&self, domain: &str, route: &RouteKey, error: Option<&str>) {
        self.write(Self::key(domain, route, None), error);
    }
}
