//! Link health monitoring.
//!
//! Provides:
//! - Resource sampling through `sysinfo`
//! - The clamped health score and reconnect bookkeeping
//! - The periodic link health monitor
//! - A fixed resource sampler behind the `mock` feature

#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod monitor;
pub mod resources;
pub mod score;

pub use monitor::LinkHealthMonitor;
pub use resources::{ResourceSampler, ResourceUsage, SysinfoSampler};
pub use score::{HealthScore, ReconnectState};
