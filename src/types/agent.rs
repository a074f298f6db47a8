use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExecutionPriority, Position, SupervisorStatus};

/// Registry-facing summary of one agent instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub status: SupervisorStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub sessions_started: u32,
    pub sessions_failed: u32,
    pub last_error: Option<String>,
    pub current_task: Option<String>,
    pub priority: Option<ExecutionPriority>,
}

/// Read-only view of the driven process, as last refreshed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSnapshot {
    pub in_session: bool,
    pub position: Option<Position>,
    pub level: Option<u32>,
    pub latency_ms: Option<u32>,
}

impl Stats {
    pub fn not_started() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        !self.status.is_idle()
    }
}
