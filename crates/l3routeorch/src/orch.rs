//! RouteOrch: the engine's entry points and its Orch integration.
//!
//! Each routing domain has its own cache behind its own
//! `tokio::sync::Mutex`. The lock is held for the whole of a reconciliation
//! pass or neighbor event, backend calls included, so work on one domain
//! is fully serialized while unrelated domains proceed independently.
//!
//! Neighbor events that name no domain are also kept in an engine-wide
//! table, which seeds the cache of every domain created later. A domain
//! whose cache holds no routes and nothing beyond that table is dropped.

use crate::backend::RouteBackend;
use crate::cache::{DomainCache, NeighborTable, Nexthop, Route};
use crate::config::RouteOrchConfig;
use crate::hw_sync::HardwareSync;
use crate::neighbor::{NeighborEventHandler, NeighborReport};
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::snapshot::{NeighborEvent, RouteSnapshot};
use crate::status::StatusWriter;
use crate::types::{DomainId, NexthopKey, RouteKey};
use async_trait::async_trait;
use dashmap::DashMap;
use l3_orch_common::Orch;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Work item queued on a [`RouteOrch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchEvent {
    /// A full desired-state snapshot; every domain in it (and in the cache)
    /// is reconciled.
    Snapshot(RouteSnapshot),
    Neighbor(NeighborEvent),
}

impl OrchEvent {
    fn describe(&self) -> String {
        match self {
            OrchEvent::Snapshot(snapshot) => format!("snapshot ({} routes)", snapshot.routes.len()),
            OrchEvent::Neighbor(event) => format!(
                "neighbor {} {}",
                event.ip,
                if event.resolved { "resolved" } else { "unresolved" }
            ),
        }
    }
}

/// Route/next-hop reconciliation engine.
pub struct RouteOrch {
    config: RouteOrchConfig,
    reconciler: Reconciler,
    neighbor_handler: NeighborEventHandler,
    domains: DashMap<DomainId, Arc<Mutex<DomainCache>>>,
    /// Resolutions from events without a domain.
    neighbors: Mutex<NeighborTable>,
    pending: VecDeque<OrchEvent>,
}

impl RouteOrch {
    pub fn new(
        config: RouteOrchConfig,
        backend: Arc<dyn RouteBackend>,
        status: Arc<dyn StatusWriter>,
    ) -> Self {
        let hw = Arc::new(
            HardwareSync::new(backend, config.hardware_timeout())
                .with_max_nexthops(config.max_nexthops_per_route),
        );

        Self {
            reconciler: Reconciler::new(Arc::clone(&hw), Arc::clone(&status)),
            neighbor_handler: NeighborEventHandler::new(hw, status),
            config,
            domains: DashMap::new(),
            neighbors: Mutex::new(NeighborTable::default()),
            pending: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &RouteOrchConfig {
        &self.config
    }

    /// Cache of `domain`, created from the engine-wide neighbor table if
    /// missing.
    async fn domain_cache(&self, domain: &str) -> Arc<Mutex<DomainCache>> {
        if let Some(cache) = self.existing_domain_cache(domain) {
            return cache;
        }

        let shared = self.neighbors.lock().await;
        let entry = self.domains.entry(domain.to_string()).or_insert_with(|| {
            debug!("RouteOrch: new domain {} with {} known neighbors", domain, shared.len());
            Arc::new(Mutex::new(DomainCache::with_neighbors(shared.clone())))
        });
        let cache = Arc::clone(entry.value());
        cache
    }

    /// Drops the cache of `domain` if nobody else holds it and it carries no
    /// routes and no neighbor state beyond the engine-wide table.
    async fn prune_if_idle(&self, domain: &str) {
        let shared = self.neighbors.lock().await;
        let pruned = self.domains.remove_if(domain, |_, cache| {
            Arc::strong_count(cache) == 1
                && cache
                    .try_lock()
                    .is_ok_and(|cache| cache.is_empty() && cache.neighbors() == &*shared)
        });
        if pruned.is_some() {
            debug!("RouteOrch: dropped idle domain {}", domain);
        }
    }

    fn existing_domain_cache(&self, domain: &str) -> Option<Arc<Mutex<DomainCache>>> {
        self.domains.get(domain).map(|entry| Arc::clone(entry.value()))
    }

    /// Domains with a cache, sorted.
    pub fn domains(&self) -> Vec<DomainId> {
        let mut domains: Vec<_> = self.domains.iter().map(|e| e.key().clone()).collect();
        domains.sort();
        domains
    }

    /// Reconciles one domain against `snapshot`.
    pub async fn reconcile(&self, domain: &str, snapshot: &RouteSnapshot) -> ReconcileReport {
        let report = {
            let cache = self.domain_cache(domain).await;
            let mut cache = cache.lock().await;
            self.reconciler.reconcile(&mut cache, domain, snapshot).await
        };
        self.prune_if_idle(domain).await;
        report
    }

    /// Reconciles every domain named in `snapshot` or already cached.
    pub async fn reconcile_all(&self, snapshot: &RouteSnapshot) -> Vec<ReconcileReport> {
        let mut domains: BTreeSet<DomainId> = snapshot.domains();
        domains.extend(self.domains());

        let mut reports = Vec::with_capacity(domains.len());
        for domain in domains {
            reports.push(self.reconcile(&domain, snapshot).await);
        }
        reports
    }

    /// Applies a neighbor event to its domain, or, when the event names
    /// none, to every cached domain and to the table later domains start
    /// from.
    pub async fn on_neighbor_change(&self, event: &NeighborEvent) -> Vec<NeighborReport> {
        let domains = match &event.domain {
            Some(domain) => vec![domain.clone()],
            None => {
                let mut shared = self.neighbors.lock().await;
                shared.update(&event.ip, event.resolved, event.egress_id);
                self.domains()
            }
        };

        let mut reports = Vec::with_capacity(domains.len());
        for domain in domains {
            let report = {
                let cache = self.domain_cache(&domain).await;
                let mut cache = cache.lock().await;
                self.neighbor_handler
                    .on_neighbor_change(&mut cache, &domain, event)
                    .await
            };
            self.prune_if_idle(&domain).await;
            reports.push(report);
        }
        reports
    }

    /// Cached route identities of `domain`, sorted.
    pub async fn cached_routes(&self, domain: &str) -> Vec<RouteKey> {
        let Some(cache) = self.existing_domain_cache(domain) else {
            return vec![];
        };
        let cache = cache.lock().await;
        cache.route_keys()
    }

    /// Copy of a cached route.
    pub async fn route(&self, domain: &str, key: &RouteKey) -> Option<Route> {
        let cache = self.existing_domain_cache(domain)?;
        let cache = cache.lock().await;
        cache.route_by_key(key).cloned()
    }

    /// Copy of a cached next-hop.
    pub async fn nexthop(&self, domain: &str, route: &RouteKey, nexthop: &NexthopKey) -> Option<Nexthop> {
        self.route(domain, route).await?.nexthop(nexthop).cloned()
    }

    /// Routes of `domain` indexed under next-hop `ip`, sorted.
    pub async fn neighbor_routes(&self, domain: &str, ip: &str) -> Vec<RouteKey> {
        let Some(cache) = self.existing_domain_cache(domain) else {
            return vec![];
        };
        let cache = cache.lock().await;
        let mut keys: Vec<_> = cache
            .neighbor_index()
            .routes_for(ip)
            .into_iter()
            .filter_map(|id| cache.route(id).map(|r| r.key().clone()))
            .collect();
        keys.sort();
        keys
    }

    /// Queues work for the next `do_task`.
    pub fn enqueue(&mut self, event: OrchEvent) {
        self.pending.push_back(event);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn log_reconcile(report: &ReconcileReport) {
        if !report.is_noop() {
            info!(
                "RouteOrch: {}: {} added, {} deleted, {} modified, {} hardware calls",
                report.domain,
                report.added.len(),
                report.deleted.len(),
                report.modified.len(),
                report.hardware_calls
            );
        }
        for e in &report.errors {
            warn!("RouteOrch: {}: {}", report.domain, e);
        }
    }

    fn log_neighbor(report: &NeighborReport) {
        if !report.updated.is_empty() {
            info!(
                "RouteOrch: {}: neighbor {} updated {} routes",
                report.domain,
                report.ip,
                report.updated.len()
            );
        }
        for e in &report.errors {
            warn!("RouteOrch: {}: neighbor {}: {}", report.domain, report.ip, e);
        }
    }
}

#[async_trait]
impl Orch for RouteOrch {
    fn name(&self) -> &str {
        "RouteOrch"
    }

    fn priority(&self) -> i32 {
        self.config.priority
    }

    async fn do_task(&mut self) {
        let events: Vec<OrchEvent> = self.pending.drain(..).collect();

        for event in events {
            match event {
                OrchEvent::Snapshot(snapshot) => {
                    for report in self.reconcile_all(&snapshot).await {
                        Self::log_reconcile(&report);
                    }
                }
                OrchEvent::Neighbor(event) => {
                    for report in self.on_neighbor_change(&event).await {
                        Self::log_neighbor(&report);
                    }
                }
            }
        }
    }

    fn has_pending_tasks(&self) -> bool {
        !self.pending.is_empty()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.pending.iter().map(OrchEvent::describe).collect()
    }
}
