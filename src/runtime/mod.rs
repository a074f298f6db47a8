pub mod activity;
pub mod context;
pub mod priority;

pub use activity::{ActivityTracker, IdleVerdict};
pub use context::AgentRuntime;
pub use priority::{PriorityGuard, PriorityToken, Stopped};
