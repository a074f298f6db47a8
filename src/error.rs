use std::time::Duration;

use thiserror::Error;

use crate::types::FinishReason;

/// Broad classes of session termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Ends the session; the normal exit/restart path follows.
    FatalSession,
    /// A higher-priority external workflow must take over. Not a crash.
    Interrupt,
    /// The client is wedged; it is killed and fully restarted.
    UnrecoverableClient,
    /// A single step failed and may be retried.
    Transient,
}

/// Typed outcome of a loop, task or session that did not finish normally.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("health critical: {reason}")]
    HealthCritical { reason: String },

    #[error("died")]
    Died,

    #[error("player globally idle for {idle_for:?}")]
    Idle { idle_for: Duration },

    #[error("max session duration exceeded after {elapsed:?}")]
    MaxDurationExceeded { elapsed: Duration },

    #[error("sustained high latency ({latency_ms} ms for {sustained:?})")]
    HighLatency { latency_ms: u32, sustained: Duration },

    #[error("interrupted by a higher-priority workflow")]
    Interrupt,

    #[error("unrecoverable client state: {reason}")]
    Unrecoverable { reason: String },

    #[error("task {task} failed: {message}")]
    Task { task: String, message: String },

    #[error("loop failed: {message}")]
    LoopFailed { message: String },
}

impl SessionError {
    pub fn health(reason: impl Into<String>) -> Self {
        SessionError::HealthCritical {
            reason: reason.into(),
        }
    }

    pub fn unrecoverable(reason: impl Into<String>) -> Self {
        SessionError::Unrecoverable {
            reason: reason.into(),
        }
    }

    pub fn task(task: impl Into<String>, message: impl Into<String>) -> Self {
        SessionError::Task {
            task: task.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Interrupt => ErrorKind::Interrupt,
            SessionError::Unrecoverable { .. } => ErrorKind::UnrecoverableClient,
            SessionError::HealthCritical { .. }
            | SessionError::Died
            | SessionError::Idle { .. }
            | SessionError::MaxDurationExceeded { .. }
            | SessionError::HighLatency { .. }
            | SessionError::Task { .. }
            | SessionError::LoopFailed { .. } => ErrorKind::FatalSession,
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, SessionError::Interrupt)
    }

    pub fn finish_reason(&self) -> FinishReason {
        match self {
            SessionError::HealthCritical { .. } => FinishReason::HealthCritical,
            SessionError::Died => FinishReason::Died,
            SessionError::Interrupt => FinishReason::Interrupted,
            _ => FinishReason::Error,
        }
    }
}

/// Result of a single menu/session-transition step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MenuError {
    #[error("loading screen")]
    Loading,

    #[error("menu step failed: {0}")]
    Transient(String),

    #[error("menu flow stuck: {0}")]
    Unrecoverable(String),
}

impl MenuError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MenuError::Loading | MenuError::Transient(_) => ErrorKind::Transient,
            MenuError::Unrecoverable(_) => ErrorKind::UnrecoverableClient,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("supervisor {0} is already running")]
    AlreadyRunning(String),

    #[error("agent {0} is not configured")]
    UnknownAgent(String),

    #[error("failed to build agent: {0}")]
    Build(#[from] anyhow::Error),
}
