//! Hardware backend capability interface.
//!
//! The backend is the ASIC plugin seen through one operation,
//! [`RouteBackend::program_route`]. A [`BackendRegistry`] performs the
//! one-time, version-checked resolution of the plugin at startup; the
//! resolved `Arc<dyn RouteBackend>` is then injected into
//! [`HardwareSync`](crate::hw_sync::HardwareSync).

use crate::error::{Result, RouteError};
use crate::types::{AddressFamily, DomainId, EgressId, NexthopKind, ResolutionState};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Interface major version a plugin must match exactly.
pub const BACKEND_INTERFACE_MAJOR: u32 = 1;
/// Minimum interface minor version a plugin must provide.
pub const BACKEND_INTERFACE_MINOR: u32 = 0;

/// Result code the backend uses for success.
pub const RESULT_SUCCESS: i32 = 0;
/// Result code synthesized for next-hops of a call that timed out.
pub const RESULT_TIMEOUT: i32 = -110;

/// Operation requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    /// Program the route (if needed) and the listed next-hops.
    Add,
    /// Remove the route together with the listed next-hops.
    DeleteRoute,
    /// Unprogram the listed next-hops; the route stays.
    DeleteNexthops,
}

impl fmt::Display for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteAction::Add => write!(f, "ADD"),
            RouteAction::DeleteRoute => write!(f, "DELETE_ROUTE"),
            RouteAction::DeleteNexthops => write!(f, "DELETE_NEXTHOPS"),
        }
    }
}

/// One next-hop as sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NexthopDescriptor {
    /// IP address or port name.
    pub id: String,
    pub kind: NexthopKind,
    pub state: ResolutionState,
    /// Only set for resolved next-hops.
    pub egress_id: Option<EgressId>,
}

/// Outcome for one next-hop of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NexthopResult {
    pub id: String,
    pub result_code: i32,
    pub error: Option<String>,
    pub egress_id: Option<EgressId>,
}

impl NexthopResult {
    pub fn success(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result_code: RESULT_SUCCESS,
            error: None,
            egress_id: None,
        }
    }

    pub fn failure(id: impl Into<String>, result_code: i32, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result_code,
            error: Some(error.into()),
            egress_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result_code == RESULT_SUCCESS
    }

    /// Error text recorded on the next-hop for a failed result.
    pub fn error_text(&self) -> String {
        match &self.error {
            Some(error) => error.clone(),
            None => format!("hardware error code {}", self.result_code),
        }
    }
}

/// A single backend programming request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub domain: DomainId,
    pub family: AddressFamily,
    pub prefix: String,
    pub action: RouteAction,
    pub nexthops: Vec<NexthopDescriptor>,
}

/// Call-level backend failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Backend rejected request (rc {code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("Route programming not supported by backend")]
    NotSupported,
}

/// Hardware capability consumed by the engine.
#[async_trait]
pub trait RouteBackend: Send + Sync {
    /// Plugin name (for logging).
    fn name(&self) -> &str;

    /// Returns false if this backend cannot program L3 routes at all.
    fn supports_route_action(&self) -> bool {
        true
    }

    /// Programs one route operation.
    ///
    /// Returns one result per next-hop in the request. `Err` means the call
    /// as a whole failed and nothing was programmed.
    async fn program_route(
        &self,
        request: &RouteRequest,
    ) -> std::result::Result<Vec<NexthopResult>, BackendError>;
}

/// A backend plugin offered for registration.
pub struct BackendPlugin {
    pub name: String,
    pub major: u32,
    pub minor: u32,
    pub backend: Arc<dyn RouteBackend>,
}

impl BackendPlugin {
    /// Wraps a backend at the current interface version.
    pub fn new(backend: Arc<dyn RouteBackend>) -> Self {
        Self {
            name: backend.name().to_string(),
            major: BACKEND_INTERFACE_MAJOR,
            minor: BACKEND_INTERFACE_MINOR,
            backend,
        }
    }

    pub fn with_version(mut self, major: u32, minor: u32) -> Self {
        self.major = major;
        self.minor = minor;
        self
    }
}

impl fmt::Debug for BackendPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendPlugin")
            .field("name", &self.name)
            .field("major", &self.major)
            .field("minor", &self.minor)
            .finish()
    }
}

/// Startup-time registry holding at most one backend plugin.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    plugin: Option<BackendPlugin>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the backend plugin after checking its interface version.
    pub fn register(&mut self, plugin: BackendPlugin) -> Result<()> {
        if let Some(existing) = &self.plugin {
            return Err(RouteError::Registry(format!(
                "backend {} already registered",
                existing.name
            )));
        }

        if plugin.major != BACKEND_INTERFACE_MAJOR {
            return Err(RouteError::Registry(format!(
                "backend {} major check failed: provided {}, required {}",
                plugin.name, plugin.major, BACKEND_INTERFACE_MAJOR
            )));
        }

        if plugin.minor < BACKEND_INTERFACE_MINOR {
            return Err(RouteError::Registry(format!(
                "backend {} minor check failed: provided {}, required >= {}",
                plugin.name, plugin.minor, BACKEND_INTERFACE_MINOR
            )));
        }

        info!("Registered backend plugin [{}]", plugin.name);
        self.plugin = Some(plugin);
        Ok(())
    }

    /// Resolves the registered backend.
    pub fn resolve(&self) -> Result<Arc<dyn RouteBackend>> {
        self.plugin
            .as_ref()
            .map(|plugin| Arc::clone(&plugin.backend))
            .ok_or_else(|| RouteError::Registry("no backend plugin registered".to_string()))
    }
}
