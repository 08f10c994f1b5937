//! staticdex Jobs - the Static Index Rebuild
//!
//! The rebuild job sequences the storage and loader layers into one cycle:
//!
//! ```text
//! Idle → Invalidating → GuardCheck → PresenceCheck
//!      → LoadingBuiltins → LoadingPlugins → Releasing → Done
//! ```
//!
//! with early exits to `Done` when invalidation fails, when another worker
//! holds the guard, and when a complete index is already present.
//!
//! Scheduling is left to the host; call [`StaticIndexRebuild::run`] (or
//! [`StaticIndexRebuild::execute`] when the report is not needed) from
//! whatever periodic runner the deployment uses.

pub mod metrics;
pub mod rebuild;
pub mod telemetry;

pub use metrics::{RebuildMetrics, RebuildMetricsSnapshot};
pub use rebuild::{
    BuiltinSources, PluginLoadStatus, PluginReport, RebuildOutcome, RebuildPhase, RebuildReport,
    StaticIndexRebuild,
};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
