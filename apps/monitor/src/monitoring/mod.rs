/// Probing engine
///
/// This module is responsible for:
/// - Performing single HTTP probes against a target
/// - Running one cancellable probe loop per target
/// - Tracking which loops are live so a target is never probed twice
pub mod checker;
pub mod registry;
pub mod task;
pub mod types;

pub use checker::{HttpProber, Prober};
pub use registry::{MonitorHandle, MonitorRegistry, StoppedMonitor};
pub use task::ProbeTask;
pub use types::ProbeResult;
