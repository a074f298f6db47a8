pub mod health;
pub mod state_machine;

pub use health::{LatencyMonitor, LatencySample, LatencyVerdict};
pub use state_machine::{InstanceStateMachine, LifecycleEvent};
