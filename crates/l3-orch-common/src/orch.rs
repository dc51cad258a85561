//! Base Orch trait.

use async_trait::async_trait;

/// Base trait for all orchestration agents.
///
/// Each Orch registers with the [`OrchDaemon`](crate::OrchDaemon) at a
/// priority and gets `do_task()` called whenever it reports pending work.
/// The daemon decides *when* an Orch runs; the Orch decides *what* to do.
///
/// # Thread Safety
///
/// Orch implementations must be `Send + Sync` so the daemon can be driven
/// from any tokio worker.
#[async_trait]
pub trait Orch: Send + Sync {
    /// Returns the name of this Orch (for logging and debugging).
    fn name(&self) -> &str;

    /// Processes all queued work.
    ///
    /// Implementations drain their queues, process each entry and handle
    /// failures themselves. Nothing propagates back to the daemon.
    async fn do_task(&mut self);

    /// Returns the priority of this Orch (lower = runs earlier in a pass).
    fn priority(&self) -> i32 {
        0
    }

    /// Returns true if this Orch has queued work.
    fn has_pending_tasks(&self) -> bool {
        false
    }

    /// Human-readable descriptions of queued work.
    fn dump_pending_tasks(&self) -> Vec<String> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingOrch {
        name: String,
        queued: usize,
        processed: usize,
    }

    #[async_trait]
    impl Orch for CountingOrch {
        fn name(&self) -> &str {
            &self.name
        }

        async fn do_task(&mut self) {
            self.processed += self.queued;
            self.queued = 0;
        }

        fn has_pending_tasks(&self) -> bool {
            self.queued > 0
        }
    }

    #[tokio::test]
    async fn test_orch_defaults_and_do_task() {
        let mut orch = CountingOrch {
            name: "counting".to_string(),
            queued: 3,
            processed: 0,
        };

        assert_eq!(orch.name(), "counting");
        assert_eq!(orch.priority(), 0);
        assert!(orch.has_pending_tasks());
        assert!(orch.dump_pending_tasks().is_empty());

        orch.do_task().await;
        assert_eq!(orch.processed, 3);
        assert!(!orch.has_pending_tasks());
    }
}
