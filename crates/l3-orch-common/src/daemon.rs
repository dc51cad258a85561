//! OrchDaemon implementation.
//!
//! The OrchDaemon is the priority-ordered dispatcher for Orch modules.
//! It manages:
//! - Orch registration and priority ordering
//! - Dispatch passes over Orchs that report pending work

use crate::Orch;
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Configuration for the OrchDaemon.
#[derive(Debug, Clone)]
pub struct OrchDaemonConfig {
    /// Upper bound on passes per `run_until_idle` call
    pub max_passes: usize,
}

impl Default for OrchDaemonConfig {
    fn default() -> Self {
        Self { max_passes: 1024 }
    }
}

/// The dispatcher driving registered Orchs.
pub struct OrchDaemon {
    config: OrchDaemonConfig,
    /// Registered Orchs keyed by priority; registration order within a priority
    orchs: BTreeMap<i32, Vec<Box<dyn Orch>>>,
}

impl OrchDaemon {
    pub fn new(config: OrchDaemonConfig) -> Self {
        Self {
            config,
            orchs: BTreeMap::new(),
        }
    }

    /// Registers an Orch with the daemon.
    ///
    /// Orchs are ordered by priority (lower = runs first).
    pub fn register_orch(&mut self, orch: Box<dyn Orch>) {
        let priority = orch.priority();
        info!("Registering {} with priority {}", orch.name(), priority);
        self.orchs.entry(priority).or_default().push(orch);
    }

    /// Number of registered Orchs.
    pub fn orch_count(&self) -> usize {
        self.orchs.values().map(Vec::len).sum()
    }

    /// Returns true if any registered Orch has pending work.
    pub fn has_pending_tasks(&self) -> bool {
        self.orchs
            .values()
            .flat_map(|orchs| orchs.iter())
            .any(|orch| orch.has_pending_tasks())
    }

    /// Runs one pass over all Orchs in priority order.
    ///
    /// Returns the names of the Orchs whose `do_task()` was called.
    pub async fn run_once(&mut self) -> Vec<String> {
        let mut ran = Vec::new();
        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                if orch.has_pending_tasks() {
                    debug!("Processing tasks for {}", orch.name());
                    orch.do_task().await;
                    ran.push(orch.name().to_string());
                }
            }
        }
        ran
    }

    /// Runs passes until no Orch has pending work.
    ///
    /// Returns the number of passes run.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut passes = 0;
        while self.has_pending_tasks() {
            if passes >= self.config.max_passes {
                warn!(
                    "OrchDaemon: still busy after {} passes, yielding",
                    self.config.max_passes
                );
                break;
            }
            self.run_once().await;
            passes += 1;
        }
        passes
    }

    /// Dumps state for debugging.
    pub fn dump(&self) -> Vec<String> {
        let mut lines = vec![format!("OrchDaemon orchs: {}", self.orch_count())];
        for (priority, orchs) in &self.orchs {
            for orch in orchs {
                lines.push(format!(
                    "  [{:3}] {} - {} pending",
                    priority,
                    orch.name(),
                    orch.dump_pending_tasks().len()
                ));
            }
        }
        lines
    }
}
