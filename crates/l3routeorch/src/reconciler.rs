//! Reconciler: converges one domain's cache and hardware to a snapshot.
//!
//! A pass classifies every identity of the domain three ways, snapshot
//! candidates against the cache:
//!
//! - candidate, not cached: ADD (one batched call per route)
//! - cached, not a candidate: DELETE (one DELETE_ROUTE call per route)
//! - both, and flagged by change tracking: MODIFY as an incremental
//!   next-hop diff (DELETE_NEXTHOPS for removals, then ADD for additions)
//!
//! Deletes run first, then adds, then modifies. A failure while handling
//! one identity is recorded in the [`ReconcileReport`] and the pass moves
//! on. A call-level backend failure leaves that identity's cache state as
//! it was, so the next trigger retries it.

use crate::backend::{NexthopDescriptor, NexthopResult, RouteAction};
use crate::cache::{DomainCache, Nexthop, RouteId};
use crate::error::{Result, RouteError};
use crate::hw_sync::HardwareSync;
use crate::snapshot::{RouteRecord, RouteSnapshot};
use crate::status::{StatusChange, StatusWriter};
use crate::types::{AddressFamily, NexthopKey, RouteKey};
use log::{debug, info, log_enabled, warn, Level};
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of one reconciliation pass over one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub domain: String,
    pub added: Vec<RouteKey>,
    pub deleted: Vec<RouteKey>,
    pub modified: Vec<RouteKey>,
    /// Calls that reached the backend, successful or not.
    pub hardware_calls: usize,
    /// Non-fatal errors, in the order they were hit.
    pub errors: Vec<RouteError>,
}

impl ReconcileReport {
    fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            ..Default::default()
        }
    }

    /// Returns true if the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Diff engine for one domain at a time; the caller holds the domain lock.
pub struct Reconciler {
    hw: Arc<HardwareSync>,
    status: Arc<dyn StatusWriter>,
}

impl Reconciler {
    pub fn new(hw: Arc<HardwareSync>, status: Arc<dyn StatusWriter>) -> Self {
        Self { hw, status }
    }

    /// Runs one pass of `domain` against `snapshot`.
    pub async fn reconcile(
        &self,
        cache: &mut DomainCache,
        domain: &str,
        snapshot: &RouteSnapshot,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::new(domain);

        if !self.hw.supports_route_action() {
            debug!(
                "Reconciler: backend {} has no route action, skipping {}",
                self.hw.backend_name(),
                domain
            );
            return report;
        }

        let candidates = snapshot.candidates(domain);

        let to_delete: Vec<RouteKey> = cache
            .route_keys()
            .into_iter()
            .filter(|key| !candidates.contains_key(key))
            .collect();

        let mut to_add = Vec::new();
        let mut to_modify = Vec::new();
        for (key, record) in &candidates {
            match cache.find(key) {
                None => to_add.push(*record),
                Some(id) if record.is_flagged() => to_modify.push((id, *record)),
                Some(_) => {}
            }
        }

        for key in &to_delete {
            self.delete_route(cache, domain, key, &mut report).await;
        }

        for record in to_add {
            self.add_route(cache, domain, record, &mut report).await;
        }

        for (id, record) in to_modify {
            self.modify_route(cache, domain, id, record, &mut report).await;
        }

        if log_enabled!(Level::Debug) {
            debug!("Reconciler: cache of {} after pass", domain);
            for line in cache.dump() {
                debug!("{}", line);
            }
        }

        report
    }

    async fn add_route(
        &self,
        cache: &mut DomainCache,
        domain: &str,
        record: &RouteRecord,
        report: &mut ReconcileReport,
    ) {
        let key = record.key();
        let (keys, route_error) = self.eligible(record, report);

        let nexthops: Vec<Nexthop> = keys
            .into_iter()
            .map(|nh_key| {
                let (state, egress_id) = cache.initial_resolution(&nh_key);
                let mut nexthop = Nexthop::from_key(nh_key);
                nexthop.set_resolution(state, egress_id);
                nexthop
            })
            .collect();

        let descriptors = nexthops.iter().map(Nexthop::descriptor).collect();
        let results = match self
            .call(report, domain, record.family, &key, RouteAction::Add, descriptors)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                report.errors.push(e);
                return;
            }
        };

        let id = match cache.insert_route(key.clone(), record.family) {
            Ok(id) => id,
            Err(e) => {
                report.errors.push(e);
                return;
            }
        };
        for nexthop in nexthops {
            if let Err(e) = cache.insert_nexthop(id, nexthop) {
                report.errors.push(e);
            }
        }

        if cache.set_route_error(id, route_error.clone()) {
            self.status.write_route_status(domain, &key, route_error.as_deref());
        }
        let changes = cache.apply_results(id, &results);
        self.write_changes(domain, &key, changes);

        info!("RouteOrch: Added route {} in {}", key, domain);
        report.added.push(key);
    }

    async fn delete_route(
        &self,
        cache: &mut DomainCache,
        domain: &str,
        key: &RouteKey,
        report: &mut ReconcileReport,
    ) {
        let Some(id) = cache.find(key) else {
            return;
        };
        let Some(route) = cache.route(id) else {
            return;
        };

        let family = route.family();
        let descriptors = route.nexthops().iter().map(Nexthop::descriptor).collect();
        let results = match self
            .call(report, domain, family, key, RouteAction::DeleteRoute, descriptors)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                report.errors.push(e);
                return;
            }
        };
        log_delete_failures(key, &results);

        let Some(route) = cache.remove_route(id) else {
            return;
        };

        // Annotations this engine wrote are no longer backed by cache state
        for nexthop in route.nexthops().iter().filter(|nh| nh.error.is_some()) {
            self.status.write_nexthop_status(domain, key, nexthop.id(), None);
        }
        if route.error().is_some() {
            self.status.write_route_status(domain, key, None);
        }

        info!("RouteOrch: Removed route {} in {}", key, domain);
        report.deleted.push(key.clone());
    }

    async fn modify_route(
        &self,
        cache: &mut DomainCache,
        domain: &str,
        id: RouteId,
        record: &RouteRecord,
        report: &mut ReconcileReport,
    ) {
        let key = record.key();
        let (desired, route_error) = self.eligible(record, report);

        let Some(route) = cache.route(id) else {
            return;
        };
        let family = route.family();

        let desired_set: HashSet<&NexthopKey> = desired.iter().collect();
        let removed: Vec<NexthopKey> = route
            .nexthops()
            .iter()
            .filter(|nh| !desired_set.contains(nh.key()))
            .map(|nh| nh.key().clone())
            .collect();
        let added: Vec<NexthopKey> = desired
            .iter()
            .filter(|nh_key| !route.contains(nh_key))
            .cloned()
            .collect();

        if cache.set_route_error(id, route_error.clone()) {
            self.status.write_route_status(domain, &key, route_error.as_deref());
        }

        if removed.is_empty() && added.is_empty() {
            debug!("Reconciler: no next-hop change for {} in {}", key, domain);
            return;
        }

        if !removed.is_empty() {
            let descriptors = removed
                .iter()
                .filter_map(|nh_key| cache.route(id)?.nexthop(nh_key))
                .map(Nexthop::descriptor)
                .collect();
            let results = match self
                .call(report, domain, family, &key, RouteAction::DeleteNexthops, descriptors)
                .await
            {
                Ok(results) => results,
                Err(e) => {
                    report.errors.push(e);
                    return;
                }
            };
            log_delete_failures(&key, &results);

            for nh_key in &removed {
                if let Some(nexthop) = cache.remove_nexthop(id, nh_key) {
                    if nexthop.error.is_some() {
                        self.status.write_nexthop_status(domain, &key, nexthop.id(), None);
                    }
                }
            }
        }

        if !added.is_empty() {
            let nexthops: Vec<Nexthop> = added
                .into_iter()
                .map(|nh_key| {
                    let (state, egress_id) = cache.initial_resolution(&nh_key);
                    let mut nexthop = Nexthop::from_key(nh_key);
                    nexthop.set_resolution(state, egress_id);
                    nexthop
                })
                .collect();

            let descriptors = nexthops.iter().map(Nexthop::descriptor).collect();
            match self
                .call(report, domain, family, &key, RouteAction::Add, descriptors)
                .await
            {
                Ok(results) => {
                    for nexthop in nexthops {
                        if let Err(e) = cache.insert_nexthop(id, nexthop) {
                            report.errors.push(e);
                        }
                    }
                    let changes = cache.apply_results(id, &results);
                    self.write_changes(domain, &key, changes);
                }
                Err(e) => report.errors.push(e),
            }
        }

        info!("RouteOrch: Updated route {} in {}", key, domain);
        report.modified.push(key);
    }

    /// Eligible next-hop keys of `record`, capped to the per-call limit.
    ///
    /// Malformed rows and an over-limit count are reported; the returned
    /// string is the route-level annotation for them.
    fn eligible(
        &self,
        record: &RouteRecord,
        report: &mut ReconcileReport,
    ) -> (Vec<NexthopKey>, Option<String>) {
        let (mut keys, mut errors) = record.eligible_nexthops();

        let limit = self.hw.max_nexthops();
        if keys.len() > limit {
            errors.push(RouteError::TooManyNexthops {
                route: record.key().to_string(),
                count: keys.len(),
                limit,
            });
            keys.truncate(limit);
        }

        if errors.is_empty() {
            return (keys, None);
        }

        for e in &errors {
            warn!("Invalid next-hop in route {}: {}", record.key(), e);
        }
        let message = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        report.errors.extend(errors);
        (keys, Some(message))
    }

    async fn call(
        &self,
        report: &mut ReconcileReport,
        domain: &str,
        family: AddressFamily,
        key: &RouteKey,
        action: RouteAction,
        descriptors: Vec<NexthopDescriptor>,
    ) -> Result<Vec<NexthopResult>> {
        let issued = self.hw.issues_call(descriptors.len());
        let result = self.hw.sync(domain, family, key, action, descriptors).await;
        if issued {
            report.hardware_calls += 1;
        }
        result
    }

    fn write_changes(&self, domain: &str, key: &RouteKey, changes: Vec<StatusChange>) {
        for change in changes {
            self.status
                .write_nexthop_status(domain, key, &change.nexthop, change.error.as_deref());
        }
    }
}

fn log_delete_failures(key: &RouteKey, results: &[NexthopResult]) {
    for result in results.iter().filter(|r| !r.is_success()) {
        warn!(
            "Failed to unprogram NH {} of route {}: {}",
            result.id,
            key,
            result.error_text()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, RouteBackend, RouteRequest};
    use crate::snapshot::NexthopRecord;
    use crate::status::StatusTable;
    use crate::types::ResolutionState;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<RouteRequest>>,
        fail_ids: Vec<String>,
        unsupported: bool,
    }

    #[async_trait]
    impl RouteBackend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }

        fn supports_route_action(&self) -> bool {
            !self.unsupported
        }

        async fn program_route(
            &self,
            request: &RouteRequest,
        ) -> std::result::Result<Vec<NexthopResult>, BackendError> {
            self.calls.lock().unwrap().push(request.clone());
            Ok(request
                .nexthops
                .iter()
                .map(|nh| {
                    if self.fail_ids.contains(&nh.id) {
                        NexthopResult::failure(nh.id.clone(), -5, "no route resources")
                    } else {
                        NexthopResult::success(nh.id.clone())
                    }
                })
                .collect())
        }
    }

    fn setup(backend: RecordingBackend) -> (Reconciler, Arc<RecordingBackend>, Arc<StatusTable>) {
        let backend = Arc::new(backend);
        let status = Arc::new(StatusTable::new());
        let hw = Arc::new(HardwareSync::new(backend.clone(), Duration::from_secs(1)));
        (Reconciler::new(hw, status.clone()), backend, status)
    }

    fn route(prefix: &str, ips: &[&str]) -> RouteRecord {
        ips.iter().fold(
            RouteRecord::new("vrf_default", "static", prefix),
            |record, ip| record.with_nexthop(NexthopRecord::ip(*ip)),
        )
    }

    #[tokio::test]
    async fn test_add_then_idempotent() {
        let (reconciler, backend, _) = setup(RecordingBackend::default());
        let mut cache = DomainCache::new();
        let snapshot = RouteSnapshot::new(vec![route("10.0.0.0/24", &["10.0.0.1", "10.0.0.2"])]);

        let report = reconciler.reconcile(&mut cache, "vrf_default", &snapshot).await;
        assert_eq!(report.added, vec![RouteKey::new("static", "10.0.0.0/24")]);
        assert_eq!(report.hardware_calls, 1);
        assert_eq!(cache.len(), 1);

        let report = reconciler.reconcile(&mut cache, "vrf_default", &snapshot).await;
        assert!(report.is_noop());
        assert_eq!(report.hardware_calls, 0);
        assert_eq!(backend.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_uses_neighbor_table() {
        let (reconciler, backend, _) = setup(RecordingBackend::default());
        let mut cache = DomainCache::new();
        cache.neighbors_mut().update("10.0.0.1", true, Some(42));
        let snapshot = RouteSnapshot::new(vec![route("10.0.0.0/24", &["10.0.0.1", "10.0.0.2"])]);

        reconciler.reconcile(&mut cache, "vrf_default", &snapshot).await;

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0].nexthops[0].state, ResolutionState::Resolved);
        assert_eq!(calls[0].nexthops[0].egress_id, Some(42));
        assert_eq!(calls[0].nexthops[1].state, ResolutionState::Unresolved);
    }

    #[tokio::test]
    async fn test_route_without_nexthops_is_cached_without_call() {
        let (reconciler, backend, _) = setup(RecordingBackend::default());
        let mut cache = DomainCache::new();
        let snapshot = RouteSnapshot::new(vec![route("10.0.0.0/24", &[])]);

        let report = reconciler.reconcile(&mut cache, "vrf_default", &snapshot).await;

        assert_eq!(report.added.len(), 1);
        assert_eq!(report.hardware_calls, 0);
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unflagged_change_is_skipped() {
        let (reconciler, _, _) = setup(RecordingBackend::default());
        let mut cache = DomainCache::new();
        reconciler
            .reconcile(
                &mut cache,
                "vrf_default",
                &RouteSnapshot::new(vec![route("10.0.0.0/24", &["10.0.0.1"])]),
            )
            .await;

        let report = reconciler
            .reconcile(
                &mut cache,
                "vrf_default",
                &RouteSnapshot::new(vec![route("10.0.0.0/24", &["10.0.0.1", "10.0.0.2"])]),
            )
            .await;

        assert!(report.is_noop());
        let cached = cache.route_by_key(&RouteKey::new("static", "10.0.0.0/24")).unwrap();
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn test_modify_removes_before_adding() {
        let (reconciler, backend, _) = setup(RecordingBackend::default());
        let mut cache = DomainCache::new();
        reconciler
            .reconcile(
                &mut cache,
                "vrf_default",
                &RouteSnapshot::new(vec![route("10.0.0.0/24", &["10.0.0.1", "10.0.0.2"])]),
            )
            .await;

        let snapshot = RouteSnapshot::new(vec![
            route("10.0.0.0/24", &["10.0.0.2", "10.0.0.3"]).with_changed()
        ]);
        let report = reconciler.reconcile(&mut cache, "vrf_default", &snapshot).await;

        assert_eq!(report.modified, vec![RouteKey::new("static", "10.0.0.0/24")]);
        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].action, RouteAction::DeleteNexthops);
        assert_eq!(calls[1].nexthops[0].id, "10.0.0.1");
        assert_eq!(calls[2].action, RouteAction::Add);
        assert_eq!(calls[2].nexthops.len(), 1);
        assert_eq!(calls[2].nexthops[0].id, "10.0.0.3");
        assert!(!cache.neighbor_index().contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_partial_failure_recorded_and_cleared() {
        let (reconciler, _, status) = setup(RecordingBackend {
            fail_ids: vec!["10.0.0.2".to_string()],
            ..Default::default()
        });
        let mut cache = DomainCache::new();
        let key = RouteKey::new("static", "10.0.0.0/24");
        let snapshot = RouteSnapshot::new(vec![route("10.0.0.0/24", &["10.0.0.1", "10.0.0.2"])]);

        let report = reconciler.reconcile(&mut cache, "vrf_default", &snapshot).await;

        assert!(report.is_clean());
        let cached = cache.route_by_key(&key).unwrap();
        assert_eq!(cached.nexthops()[0].error, None);
        assert_eq!(cached.nexthops()[1].error, Some("no route resources".to_string()));
        assert_eq!(
            status.nexthop_error("vrf_default", &key, "10.0.0.2"),
            Some("no route resources".to_string())
        );

        // Deleting the route clears what was written
        reconciler
            .reconcile(&mut cache, "vrf_default", &RouteSnapshot::default())
            .await;
        assert!(status.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_truncates_and_reports() {
        let (reconciler, backend, status) = setup(RecordingBackend::default());
        let mut cache = DomainCache::new();
        let ips: Vec<String> = (1..=33).map(|i| format!("10.0.1.{}", i)).collect();
        let ips: Vec<&str> = ips.iter().map(String::as_str).collect();
        let snapshot = RouteSnapshot::new(vec![route("10.0.0.0/24", &ips)]);

        let report = reconciler.reconcile(&mut cache, "vrf_default", &snapshot).await;

        assert!(report.errors[0].is_malformed_input());
        assert_eq!(backend.calls.lock().unwrap()[0].nexthops.len(), 32);
        let key = RouteKey::new("static", "10.0.0.0/24");
        assert_eq!(cache.route_by_key(&key).unwrap().len(), 32);
        assert_eq!(
            status.route_error("vrf_default", &key),
            Some("Route static:10.0.0.0/24 has 33 next-hops, limit is 32".to_string())
        );
    }

    #[tokio::test]
    async fn test_unsupported_backend_is_noop() {
        let (reconciler, backend, _) = setup(RecordingBackend {
            unsupported: true,
            ..Default::default()
        });
        let mut cache = DomainCache::new();
        let snapshot = RouteSnapshot::new(vec![route("10.0.0.0/24", &["10.0.0.1"])]);

        let report = reconciler.reconcile(&mut cache, "vrf_default", &snapshot).await;

        assert!(report.is_noop());
        assert!(cache.is_empty());
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_domain_untouched() {
        let (reconciler, _, _) = setup(RecordingBackend::default());
        let mut cache = DomainCache::new();
        let snapshot = RouteSnapshot::new(vec![
            RouteRecord::new("vrf_red", "static", "10.0.0.0/24")
                .with_nexthop(NexthopRecord::ip("10.0.0.1")),
        ]);

        let report = reconciler.reconcile(&mut cache, "vrf_default", &snapshot).await;

        assert!(report.is_noop());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_call_not_counted() {
        let (reconciler, backend, _) = setup(RecordingBackend::default());
        let mut report = ReconcileReport::new("vrf_default");
        let descriptors: Vec<NexthopDescriptor> = (0..33)
            .map(|i| Nexthop::from_key(NexthopKey::Ip(format!("10.0.1.{}", i))).descriptor())
            .collect();

        let result = reconciler
            .call(
                &mut report,
                "vrf_default",
                AddressFamily::Ipv4,
                &RouteKey::new("static", "10.0.0.0/24"),
                RouteAction::Add,
                descriptors,
            )
            .await;

        assert!(matches!(result, Err(RouteError::TooManyNexthops { .. })));
        assert_eq!(report.hardware_calls, 0);
        assert!(backend.calls.lock().unwrap().is_empty());

        reconciler
            .call(
                &mut report,
                "vrf_default",
                AddressFamily::Ipv4,
                &RouteKey::new("static", "10.0.0.0/24"),
                RouteAction::Add,
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(report.hardware_calls, 0);
    }
}
