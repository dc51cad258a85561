//! HardwareSync: translation/IO boundary toward the backend.
//!
//! Builds one [`RouteRequest`] per call, enforces the per-call next-hop cap,
//! bounds the call with a timeout and hands the per-next-hop results back.
//! The cache is never touched here.

use crate::backend::{
    NexthopDescriptor, NexthopResult, RouteAction, RouteBackend, RouteRequest, RESULT_TIMEOUT,
};
use crate::error::{Result, RouteError};
use crate::types::{AddressFamily, RouteKey, MAX_NEXTHOPS_PER_ROUTE};
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Duration;

/// Wraps the resolved backend with the call-boundary guards.
pub struct HardwareSync {
    backend: Arc<dyn RouteBackend>,
    timeout: Duration,
    max_nexthops: usize,
}

impl HardwareSync {
    pub fn new(backend: Arc<dyn RouteBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            max_nexthops: MAX_NEXTHOPS_PER_ROUTE,
        }
    }

    /// Lowers the per-call cap; values above the hardware limit are clamped.
    pub fn with_max_nexthops(mut self, max_nexthops: usize) -> Self {
        self.max_nexthops = max_nexthops.clamp(1, MAX_NEXTHOPS_PER_ROUTE);
        self
    }

    pub fn max_nexthops(&self) -> usize {
        self.max_nexthops
    }

    /// Returns true if a list of `count` next-hops passes the guards in
    /// [`sync`](Self::sync) and reaches the backend.
    pub fn issues_call(&self, count: usize) -> bool {
        count > 0 && count <= self.max_nexthops
    }

    pub fn supports_route_action(&self) -> bool {
        self.backend.supports_route_action()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Issues one backend call for `route`.
    ///
    /// An empty next-hop list issues no call. A list over the cap is
    /// rejected without calling the backend. A timeout is reported as a
    /// failure of every next-hop in the call, not as `Err`.
    pub async fn sync(
        &self,
        domain: &str,
        family: AddressFamily,
        route: &RouteKey,
        action: RouteAction,
        nexthops: Vec<NexthopDescriptor>,
    ) -> Result<Vec<NexthopResult>> {
        if nexthops.is_empty() {
            return Ok(vec![]);
        }

        if nexthops.len() > self.max_nexthops {
            return Err(RouteError::TooManyNexthops {
                route: route.to_string(),
                count: nexthops.len(),
                limit: self.max_nexthops,
            });
        }

        let request = RouteRequest {
            domain: domain.to_string(),
            family,
            prefix: route.prefix.clone(),
            action,
            nexthops,
        };

        debug!(
            "HardwareSync: {} {} in {} with {} next-hops",
            action,
            route,
            domain,
            request.nexthops.len()
        );

        match tokio::time::timeout(self.timeout, self.backend.program_route(&request)).await {
            Ok(Ok(results)) => {
                if results.len() != request.nexthops.len() {
                    warn!(
                        "HardwareSync: backend {} returned {} results for {} next-hops of {}",
                        self.backend.name(),
                        results.len(),
                        request.nexthops.len(),
                        route
                    );
                }
                Ok(results)
            }
            Ok(Err(e)) => {
                error!("HardwareSync: {} {} in {} failed: {}", action, route, domain, e);
                Err(RouteError::Backend(e))
            }
            Err(_) => {
                let message = format!(
                    "hardware call timed out after {}ms",
                    self.timeout.as_millis()
                );
                warn!("HardwareSync: {} {} in {}: {}", action, route, domain, message);
                Ok(request
                    .nexthops
                    .iter()
                    .map(|nh| NexthopResult::failure(nh.id.clone(), RESULT_TIMEOUT, message.clone()))
                    .collect())
            }
        }
    }
}
