//! Collaborator interfaces consumed by the executor, the instance loop and the
//! registry. Implementations that touch a concrete driven process live
//! outside the core (see `launcher` for the process-backed ones).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::AgentConfig;
use crate::error::{MenuError, SessionError};
use crate::runtime::AgentRuntime;
use crate::types::Position;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Key(String),
    Click { x: i32, y: i32 },
    Text(String),
}

/// Read/write access to the driven process's state.
#[async_trait]
pub trait ProcessDriver: Send + Sync {
    async fn refresh_state(&self) -> Result<()>;
    /// Whether the driven process is currently in a session.
    async fn is_running(&self) -> bool;
    async fn current_position(&self) -> Option<Position>;
    async fn current_level(&self) -> Option<u32>;
    async fn latency_ms(&self) -> Option<u32>;
    async fn send_input(&self, input: Input) -> Result<()>;
    async fn exit_session(&self) -> Result<()>;
}

/// The external OS process watched for crashes.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;
    async fn is_alive(&self) -> bool;
    async fn kill(&self) -> Result<()>;
}

#[async_trait]
pub trait HealthService: Send + Sync {
    /// `Ok` or a classified fatal error such as `HealthCritical` or `Died`.
    async fn check_health_and_react(&self, runtime: &AgentRuntime) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceAction {
    CorrectPosition,
    Pickup,
    Buff,
    Refill,
    ReturnToBase,
}

/// Result of a read-only maintenance peek.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceNeeds {
    pub correct_position: bool,
    pub pickup: bool,
    pub buff: bool,
    pub refill: bool,
    /// Set with the reason, e.g. "no healing potions".
    pub return_to_base: Option<String>,
}

impl MaintenanceNeeds {
    pub fn any(&self) -> bool {
        self.correct_position
            || self.pickup
            || self.buff
            || self.refill
            || self.return_to_base.is_some()
    }

    /// Needed actions in execution order.
    pub fn actions(&self) -> Vec<MaintenanceAction> {
        [
            (self.correct_position, MaintenanceAction::CorrectPosition),
            (self.pickup, MaintenanceAction::Pickup),
            (self.buff, MaintenanceAction::Buff),
            (self.refill, MaintenanceAction::Refill),
            (self.return_to_base.is_some(), MaintenanceAction::ReturnToBase),
        ]
        .into_iter()
        .filter_map(|(needed, action)| needed.then_some(action))
        .collect()
    }
}

#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Must not mutate shared priority.
    async fn peek(&self, runtime: &AgentRuntime) -> MaintenanceNeeds;
    async fn perform(
        &self,
        action: MaintenanceAction,
        runtime: &AgentRuntime,
    ) -> Result<(), SessionError>;
}

#[async_trait]
pub trait RunRoutines: Send + Sync {
    async fn pre_run(&self, runtime: &AgentRuntime, first_run: bool) -> Result<(), SessionError>;
    async fn post_run(&self, runtime: &AgentRuntime, is_last: bool) -> Result<(), SessionError>;
}

/// Menu and session transitions of the driven process.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    async fn in_session(&self) -> bool;
    /// Performs one step towards entering a session.
    async fn advance_menu(&self) -> Result<(), MenuError>;
}

#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, runtime: &AgentRuntime) -> Result<(), SessionError>;
    fn skip_pre_post_routines(&self) -> bool {
        false
    }
}

pub trait TaskCatalog: Send + Sync {
    fn build_tasks(&self) -> Vec<Arc<dyn Task>>;
}

/// Everything an instance needs besides its process handle.
#[derive(Clone)]
pub struct AgentServices {
    pub driver: Arc<dyn ProcessDriver>,
    pub health: Arc<dyn HealthService>,
    pub maintenance: Arc<dyn Maintenance>,
    pub routines: Arc<dyn RunRoutines>,
    pub gateway: Arc<dyn SessionGateway>,
    pub catalog: Arc<dyn TaskCatalog>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub attach_to_existing: bool,
    pub manual_mode: bool,
}

pub struct AgentParts {
    pub services: AgentServices,
    pub process: Arc<dyn ProcessHandle>,
}

/// Wires collaborators for a named agent.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn build(&self, name: &str, config: &AgentConfig, opts: BuildOptions)
        -> Result<AgentParts>;
}

/// Maintenance that never needs anything.
pub struct NoMaintenance;

#[async_trait]
impl Maintenance for NoMaintenance {
    async fn peek(&self, _runtime: &AgentRuntime) -> MaintenanceNeeds {
        MaintenanceNeeds::default()
    }

    async fn perform(
        &self,
        _action: MaintenanceAction,
        _runtime: &AgentRuntime,
    ) -> Result<(), SessionError> {
        Ok(())
    }
}

pub struct NoRoutines;

#[async_trait]
impl RunRoutines for NoRoutines {
    async fn pre_run(&self, _runtime: &AgentRuntime, _first_run: bool) -> Result<(), SessionError> {
        Ok(())
    }

    async fn post_run(&self, _runtime: &AgentRuntime, _is_last: bool) -> Result<(), SessionError> {
        Ok(())
    }
}
