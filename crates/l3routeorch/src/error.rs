//! Error types for the route reconciliation engine.

use crate::backend::BackendError;
use thiserror::Error;

/// Errors raised inside the engine.
///
/// None of these escape `RouteOrch`'s entry points: they are collected into
/// pass reports and logged, and the pass continues with the next identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Next-hop record with neither an IP address nor a usable port.
    #[error("Next-hop has neither an IP address nor a usable port")]
    NexthopMissingKey,

    /// Next-hop constructed with both an IP address and a port.
    #[error("Next-hop has both IP address {ip} and port {port}")]
    NexthopAmbiguousKey { ip: String, port: String },

    /// Route carrying more next-hops than one hardware call accepts.
    #[error("Route {route} has {count} next-hops, limit is {limit}")]
    TooManyNexthops {
        route: String,
        count: usize,
        limit: usize,
    },

    #[error("Route already cached: {0}")]
    RouteExists(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Next-hop {nexthop} already cached for route {route}")]
    NexthopExists { route: String, nexthop: String },

    /// Call-level backend failure; the identity keeps its prior cache state.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Backend registry error: {0}")]
    Registry(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RouteError {
    /// Returns true for errors caused by the desired-state input itself.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            RouteError::NexthopMissingKey
                | RouteError::NexthopAmbiguousKey { .. }
                | RouteError::TooManyNexthops { .. }
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, RouteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_input_classification() {
        assert!(RouteError::NexthopMissingKey.is_malformed_input());
        assert!(RouteError::TooManyNexthops {
            route: "static:10.0.0.0/24".to_string(),
            count: 33,
            limit: 32,
        }
        .is_malformed_input());
        assert!(!RouteError::Backend(BackendError::Unreachable("down".to_string()))
            .is_malformed_input());
    }

    #[test]
    fn test_error_display() {
        let err = RouteError::TooManyNexthops {
            route: "static:10.0.0.0/24".to_string(),
            count: 33,
            limit: 32,
        };
        assert_eq!(
            err.to_string(),
            "Route static:10.0.0.0/24 has 33 next-hops, limit is 32"
        );
    }
}
