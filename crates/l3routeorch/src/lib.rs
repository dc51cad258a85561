//! L3 route/next-hop reconciliation engine.
//!
//! Keeps the hardware forwarding table of a software-defined switch in sync
//! with the desired route state held in the configuration store.
//!
//! # Architecture
//!
//! ```text
//! [config store] --snapshot--> [Reconciler] --+
//!                                             +--> [HardwareSync] --> [backend]
//! [neighbor resolver] --event--> [NeighborEventHandler] --+
//!                                  |
//!                         [DomainCache per domain]
//!                                  |
//!                      [StatusWriter] --> [config store]
//! ```
//!
//! # Key Components
//!
//! - [`RouteOrch`]: entry points (`reconcile`, `reconcile_all`,
//!   `on_neighbor_change`) and the [`Orch`](l3_orch_common::Orch) integration
//! - [`DomainCache`]: route arena, next-hop sets, neighbor index
//! - [`Reconciler`]: snapshot vs. cache diff (ADD / DELETE / MODIFY)
//! - [`HardwareSync`]: capped, time-bounded backend calls
//! - [`NeighborEventHandler`]: per-route fan-out of neighbor changes
//! - [`BackendRegistry`]: one-time, version-checked backend resolution

mod backend;
mod cache;
mod config;
mod error;
mod hw_sync;
mod neighbor;
mod orch;
mod reconciler;
mod snapshot;
mod status;
mod types;

pub use backend::{
    BackendError, BackendPlugin, BackendRegistry, NexthopDescriptor, NexthopResult, RouteAction,
    RouteBackend, RouteRequest, BACKEND_INTERFACE_MAJOR, BACKEND_INTERFACE_MINOR, RESULT_SUCCESS,
    RESULT_TIMEOUT,
};
pub use cache::{DomainCache, NeighborIndex, NeighborTable, Nexthop, Route, RouteId};
pub use config::RouteOrchConfig;
pub use error::{Result, RouteError};
pub use hw_sync::HardwareSync;
pub use neighbor::{NeighborEventHandler, NeighborReport};
pub use orch::{OrchEvent, RouteOrch};
pub use reconciler::{ReconcileReport, Reconciler};
pub use snapshot::{NeighborEvent, NexthopRecord, RouteRecord, RouteSnapshot};
pub use status::{StatusChange, StatusKey, StatusTable, StatusWriter};
pub use types::{
    AddressFamily, DomainId, EgressId, NexthopKey, NexthopKind, ResolutionState, RouteKey,
    MAX_NEXTHOPS_PER_ROUTE,
};
