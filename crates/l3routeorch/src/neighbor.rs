//! NeighborEventHandler: fans neighbor resolution changes out to routes.

use crate::backend::RouteAction;
use crate::cache::DomainCache;
use crate::error::RouteError;
use crate::hw_sync::HardwareSync;
use crate::snapshot::NeighborEvent;
use crate::status::StatusWriter;
use crate::types::{NexthopKey, ResolutionState, RouteKey};
use log::debug;
use std::sync::Arc;

/// Outcome of one neighbor event in one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborReport {
    pub domain: String,
    pub ip: String,
    /// Routes whose next-hop on `ip` was reprogrammed.
    pub updated: Vec<RouteKey>,
    pub hardware_calls: usize,
    pub errors: Vec<RouteError>,
}

pub struct NeighborEventHandler {
    hw: Arc<HardwareSync>,
    status: Arc<dyn StatusWriter>,
}

impl NeighborEventHandler {
    pub fn new(hw: Arc<HardwareSync>, status: Arc<dyn StatusWriter>) -> Self {
        Self { hw, status }
    }

    /// Applies `event` to one domain's cache.
    ///
    /// The resolved-neighbor table is always updated. Every route holding a
    /// next-hop on the event's IP then gets one single-next-hop ADD call.
    /// If that call fails as a whole, the next-hop keeps its prior state.
    pub async fn on_neighbor_change(
        &self,
        cache: &mut DomainCache,
        domain: &str,
        event: &NeighborEvent,
    ) -> NeighborReport {
        let mut report = NeighborReport {
            domain: domain.to_string(),
            ip: event.ip.clone(),
            ..Default::default()
        };

        let state = ResolutionState::from_resolved(event.resolved);
        cache.neighbors_mut().update(&event.ip, event.resolved, event.egress_id);

        let routes = cache.neighbor_index().routes_for(&event.ip);
        if routes.is_empty() {
            debug!("Neighbor {} in {} has no routes", event.ip, domain);
            return report;
        }

        if !self.hw.supports_route_action() {
            debug!("Neighbor {} in {}: backend has no route action", event.ip, domain);
            return report;
        }

        let nh_key = NexthopKey::Ip(event.ip.clone());
        for id in routes {
            let Some(route) = cache.route(id) else {
                continue;
            };
            let Some(nexthop) = route.nexthop(&nh_key) else {
                continue;
            };

            let key = route.key().clone();
            let family = route.family();
            let mut updated = nexthop.clone();
            updated.set_resolution(state, event.egress_id);

            report.hardware_calls += 1;
            let results = match self
                .hw
                .sync(domain, family, &key, RouteAction::Add, vec![updated.descriptor()])
                .await
            {
                Ok(results) => results,
                Err(e) => {
                    report.errors.push(e);
                    continue;
                }
            };

            if let Some(nexthop) = cache.nexthop_mut(id, &nh_key) {
                nexthop.set_resolution(state, event.egress_id);
            }
            for change in cache.apply_results(id, &results) {
                self.status
                    .write_nexthop_status(domain, &key, &change.nexthop, change.error.as_deref());
            }

            debug!("Neighbor {} {:?} updated route {} in {}", event.ip, state, key, domain);
            report.updated.push(key);
        }

        report
    }
}
