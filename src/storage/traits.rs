use anyhow::Result;
use async_trait::async_trait;

use crate::scheduler::{DurationState, HistoryEntry, SchedulerHistory};

/// Durable per-agent scheduler state.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// `None` means no prior state; the caller plans a fresh day.
    async fn load_state(&self, agent: &str) -> Result<Option<DurationState>>;
    async fn save_state(&self, agent: &str, state: &DurationState) -> Result<()>;

    async fn load_history(&self, agent: &str) -> Result<SchedulerHistory>;
    /// Prepends `entry`, keeping only the most recent days.
    async fn record_history(&self, agent: &str, entry: HistoryEntry) -> Result<()>;
}
