use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::traits::ScheduleStore;
use crate::scheduler::{DurationState, HistoryEntry, SchedulerHistory};

pub const STATE_FILE: &str = "scheduler_state.json";
pub const HISTORY_FILE: &str = "scheduler_history.json";

/// Pretty-printed JSON files under `<root>/<agent>/`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_path(&self, agent: &str) -> PathBuf {
        self.root.join(agent).join(STATE_FILE)
    }

    pub fn history_path(&self, agent: &str) -> PathBuf {
        self.root.join(agent).join(HISTORY_FILE)
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let value = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(value))
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let raw = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, raw)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }
}

#[async_trait]
impl ScheduleStore for JsonFileStore {
    async fn load_state(&self, agent: &str) -> Result<Option<DurationState>> {
        Self::read_json(&self.state_path(agent)).await
    }

    async fn save_state(&self, agent: &str, state: &DurationState) -> Result<()> {
        Self::write_json(&self.state_path(agent), state).await
    }

    async fn load_history(&self, agent: &str) -> Result<SchedulerHistory> {
        Ok(Self::read_json(&self.history_path(agent))
            .await?
            .unwrap_or_default())
    }

    async fn record_history(&self, agent: &str, entry: HistoryEntry) -> Result<()> {
        let mut history = self.load_history(agent).await?;
        history.push(entry);
        Self::write_json(&self.history_path(agent), &history).await
    }
}
