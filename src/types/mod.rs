pub mod agent;

pub use agent::{DataSnapshot, Stats};

use serde::{Deserialize, Serialize};

/// Unique key of a configured agent.
pub type AgentName = String;
pub type SessionId = uuid::Uuid;

/// Which loop of an agent is currently allowed to act.
///
/// Ordered from least to most intrusive. Exactly one value is active per
/// agent at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExecutionPriority {
    Background,
    Normal,
    High,
    Pause,
    Stop,
}

impl ExecutionPriority {
    pub fn as_str(&self) -> &str {
        match self {
            ExecutionPriority::Background => "Background",
            ExecutionPriority::Normal => "Normal",
            ExecutionPriority::High => "High",
            ExecutionPriority::Pause => "Pause",
            ExecutionPriority::Stop => "Stop",
        }
    }
}

/// Status of one agent instance as observed by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SupervisorStatus {
    #[default]
    NotStarted,
    Starting,
    Running,
    Paused,
    Stopping,
    Crashed,
}

impl SupervisorStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SupervisorStatus::NotStarted => "NotStarted",
            SupervisorStatus::Starting => "Starting",
            SupervisorStatus::Running => "Running",
            SupervisorStatus::Paused => "Paused",
            SupervisorStatus::Stopping => "Stopping",
            SupervisorStatus::Crashed => "Crashed",
        }
    }

    /// Whether the scheduler should consider the agent stopped.
    pub fn is_idle(&self) -> bool {
        matches!(self, SupervisorStatus::NotStarted | SupervisorStatus::Crashed)
    }
}

/// Position of the driven entity, used for idle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// How a task or a whole session ended, as reported to notification sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Ok,
    HealthCritical,
    Died,
    Error,
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(ExecutionPriority::Background < ExecutionPriority::Normal);
        assert!(ExecutionPriority::Normal < ExecutionPriority::High);
        assert!(ExecutionPriority::High < ExecutionPriority::Pause);
        assert!(ExecutionPriority::Pause < ExecutionPriority::Stop);
    }

    #[test]
    fn test_idle_statuses() {
        assert!(SupervisorStatus::NotStarted.is_idle());
        assert!(SupervisorStatus::Crashed.is_idle());
        assert!(!SupervisorStatus::Starting.is_idle());
        assert!(!SupervisorStatus::Paused.is_idle());
    }

    #[test]
    fn test_position_distance() {
        let a = Position::new(0, 0);
        let b = Position::new(3, 4);
        assert_eq!(a.distance(&b), 5.0);
    }
}
