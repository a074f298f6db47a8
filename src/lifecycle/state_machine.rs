use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::types::SupervisorStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    StartRequested,
    SessionReady,
    Paused,
    Resumed,
    StopRequested,
    Stopped,
    ProcessDied,
}

pub struct InstanceStateMachine;

impl InstanceStateMachine {
    pub fn transition(status: &mut SupervisorStatus, event: LifecycleEvent) -> Result<SupervisorStatus> {
        let next = match (*status, event) {
            (
                SupervisorStatus::NotStarted | SupervisorStatus::Crashed,
                LifecycleEvent::StartRequested,
            ) => SupervisorStatus::Starting,
            (SupervisorStatus::Starting | SupervisorStatus::Running, LifecycleEvent::SessionReady) => {
                SupervisorStatus::Running
            }
            (SupervisorStatus::Starting | SupervisorStatus::Running, LifecycleEvent::Paused) => {
                SupervisorStatus::Paused
            }
            // A paused agent entering a session stays paused.
            (SupervisorStatus::Paused, LifecycleEvent::SessionReady) => SupervisorStatus::Paused,
            (SupervisorStatus::Paused, LifecycleEvent::Resumed) => SupervisorStatus::Running,

            (
                SupervisorStatus::Starting
                | SupervisorStatus::Running
                | SupervisorStatus::Paused
                | SupervisorStatus::Crashed,
                LifecycleEvent::StopRequested,
            ) => SupervisorStatus::Stopping,
            (SupervisorStatus::Stopping | SupervisorStatus::Crashed, LifecycleEvent::Stopped) => {
                SupervisorStatus::NotStarted
            }

            (
                SupervisorStatus::Starting | SupervisorStatus::Running | SupervisorStatus::Paused,
                LifecycleEvent::ProcessDied,
            ) => SupervisorStatus::Crashed,

            _ => {
                return Err(anyhow!(
                    "Invalid status transition from {:?} with event {:?}",
                    status,
                    event
                ));
            }
        };

        *status = next;
        Ok(next)
    }

    /// Applies `event`, logging and ignoring invalid transitions.
    pub fn apply(agent: &str, status: &mut SupervisorStatus, event: LifecycleEvent) -> SupervisorStatus {
        if let Err(e) = Self::transition(status, event) {
            log::debug!("{}: {}", agent, e);
        }
        *status
    }
}
