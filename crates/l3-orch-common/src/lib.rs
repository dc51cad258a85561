//! Common orchestration abstractions for the L3 control plane.
//!
//! This crate provides the seams shared by orchestration modules:
//!
//! - [`Orch`]: Base trait for orchestration agents
//! - [`OrchDaemon`]: Priority-ordered dispatcher that drives registered Orchs
//! - [`SyncMap`]: Map that never creates entries implicitly
//!
//! # Architecture
//!
//! 1. A configuration-store client or neighbor resolver hands work to an Orch
//! 2. The OrchDaemon walks its Orchs in priority order (lowest value first)
//! 3. Each Orch with pending work gets `do_task()` called once per pass
//! 4. Orchs translate the work into hardware backend calls
//!
//! # Example
//!
//! ```ignore
//! use l3_orch_common::{Orch, OrchDaemon, OrchDaemonConfig};
//!
//! let mut daemon = OrchDaemon::new(OrchDaemonConfig::default());
//! daemon.register_orch(Box::new(my_orch));
//! daemon.run_until_idle().await;
//! ```

mod daemon;
mod orch;
mod sync_map;

pub use daemon::{OrchDaemon, OrchDaemonConfig};
pub use orch::Orch;
pub use sync_map::SyncMap;
