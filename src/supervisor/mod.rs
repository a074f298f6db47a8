pub mod crash;
pub mod instance;
pub mod registry;

pub use crash::{CrashCallback, CrashDetector};
pub use instance::{AgentInstance, InstanceSettings};
pub use registry::{AgentControl, SupervisorRegistry};
