use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::traits::ScheduleStore;
use crate::scheduler::{DurationState, HistoryEntry, SchedulerHistory};
use crate::types::AgentName;

/// Process-local store, used in tests and when no state directory is wanted.
#[derive(Clone, Default)]
pub struct InMemoryScheduleStore {
    states: Arc<RwLock<HashMap<AgentName, DurationState>>>,
    histories: Arc<RwLock<HashMap<AgentName, SchedulerHistory>>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn load_state(&self, agent: &str) -> Result<Option<DurationState>> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(agent).cloned())
    }

    async fn save_state(&self, agent: &str, state: &DurationState) -> Result<()> {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        states.insert(agent.to_string(), state.clone());
        Ok(())
    }

    async fn load_history(&self, agent: &str) -> Result<SchedulerHistory> {
        let histories = self.histories.read().unwrap_or_else(PoisonError::into_inner);
        Ok(histories.get(agent).cloned().unwrap_or_default())
    }

    async fn record_history(&self, agent: &str, entry: HistoryEntry) -> Result<()> {
        let mut histories = self.histories.write().unwrap_or_else(PoisonError::into_inner);
        histories.entry(agent.to_string()).or_default().push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Phase;

    #[tokio::test]
    async fn test_state_roundtrip() {
        let store = InMemoryScheduleStore::new();
        assert!(store.load_state("alpha").await.unwrap().is_none());

        let state = DurationState {
            current_phase: Phase::Playing,
            played_minutes: 42,
            ..Default::default()
        };
        store.save_state("alpha", &state).await.unwrap();

        assert_eq!(store.load_state("alpha").await.unwrap(), Some(state));
        assert!(store.load_state("bravo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let store = InMemoryScheduleStore::new();
        for date in ["2026-06-01", "2026-06-02"] {
            store
                .record_history(
                    "alpha",
                    HistoryEntry {
                        date: date.to_string(),
                        wake_time: "08:00".to_string(),
                        sleep_time: "16:00".to_string(),
                        total_play_minutes: 480,
                        total_break_minutes: 0,
                        breaks: Vec::new(),
                    },
                )
                .await
                .unwrap();
        }

        let history = store.load_history("alpha").await.unwrap();
        assert_eq!(history.history[0].date, "2026-06-02");
        assert_eq!(history.history.len(), 2);
    }
}
