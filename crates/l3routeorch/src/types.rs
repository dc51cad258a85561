//! Core route and next-hop identity types.

use crate::error::{Result, RouteError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Routing domain (VRF) name.
pub type DomainId = String;

/// Opaque hardware egress identifier for a resolved next-hop.
pub type EgressId = u64;

/// Maximum number of next-hops in one backend call.
pub const MAX_NEXTHOPS_PER_ROUTE: usize = 32;

/// A key identifying a route within a routing domain (origin + prefix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    /// Source of the route (e.g. "static", "bgp").
    pub origin: String,
    /// CIDR prefix (e.g. "10.0.0.0/24").
    pub prefix: String,
}

impl RouteKey {
    pub fn new(origin: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            prefix: prefix.into(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.prefix)
    }
}

/// Address family of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    Ipv4,
    Ipv6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// What a next-hop points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NexthopKind {
    Ip,
    Port,
}

/// Whether the link-layer address of a next-hop is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionState {
    #[default]
    Unresolved,
    Resolved,
}

impl ResolutionState {
    pub fn from_resolved(resolved: bool) -> Self {
        if resolved {
            ResolutionState::Resolved
        } else {
            ResolutionState::Unresolved
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolutionState::Resolved)
    }
}

/// A key identifying a next-hop within its route.
///
/// A next-hop is either an IP address or an output port, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NexthopKey {
    Ip(String),
    Port(String),
}

impl NexthopKey {
    /// Builds a key from an optional IP and an optional port.
    ///
    /// Exactly one of the two must be set.
    pub fn new(ip: Option<&str>, port: Option<&str>) -> Result<Self> {
        match (ip, port) {
            (Some(ip), None) if !ip.is_empty() => Ok(NexthopKey::Ip(ip.to_string())),
            (None, Some(port)) if !port.is_empty() => Ok(NexthopKey::Port(port.to_string())),
            (Some(ip), Some(port)) => Err(RouteError::NexthopAmbiguousKey {
                ip: ip.to_string(),
                port: port.to_string(),
            }),
            _ => Err(RouteError::NexthopMissingKey),
        }
    }

    /// The IP address or port name.
    pub fn id(&self) -> &str {
        match self {
            NexthopKey::Ip(ip) => ip,
            NexthopKey::Port(port) => port,
        }
    }

    pub fn kind(&self) -> NexthopKind {
        match self {
            NexthopKey::Ip(_) => NexthopKind::Ip,
            NexthopKey::Port(_) => NexthopKind::Port,
        }
    }

    pub fn ip(&self) -> Option<&str> {
        match self {
            NexthopKey::Ip(ip) => Some(ip),
            NexthopKey::Port(_) => None,
        }
    }
}

impl fmt::Display for NexthopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NexthopKey::Ip(ip) => write!(f, "{}", ip),
            NexthopKey::Port(port) => write!(f, "port:{}", port),
        }
    }
}
