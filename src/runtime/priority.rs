use thiserror::Error;
use tokio::sync::watch;

use crate::types::ExecutionPriority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("agent is stopping")]
pub struct Stopped;

/// Shared execution priority of one agent.
///
/// This is a cooperative hint, not a lock. Code that performs non-trivial
/// side effects against the driven process must check the token and wait
/// while it is not `Normal`. Only the high-priority loop and the stop/pause
/// control path raise it above `Normal`.
#[derive(Debug, Clone)]
pub struct PriorityToken {
    tx: watch::Sender<ExecutionPriority>,
}

impl PriorityToken {
    pub fn new(initial: ExecutionPriority) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> ExecutionPriority {
        *self.tx.borrow()
    }

    pub fn set(&self, priority: ExecutionPriority) {
        self.tx.send_replace(priority);
    }

    pub fn is(&self, priority: ExecutionPriority) -> bool {
        self.get() == priority
    }

    /// Raises the token to `High` for the lifetime of the returned guard.
    ///
    /// Returns `None` when a control-path value (`Pause` or `Stop`) is active;
    /// maintenance must not override it.
    pub fn raise(&self) -> Option<PriorityGuard> {
        let raised = self.tx.send_if_modified(|current| match current {
            ExecutionPriority::Background | ExecutionPriority::Normal => {
                *current = ExecutionPriority::High;
                true
            }
            _ => false,
        });
        if raised {
            Some(PriorityGuard { tx: self.tx.clone() })
        } else {
            None
        }
    }

    /// Waits until the token equals `wanted`. Fails as soon as it becomes `Stop`.
    pub async fn wait_for_turn(&self, wanted: ExecutionPriority) -> Result<(), Stopped> {
        let mut rx = self.tx.subscribe();
        let seen = rx
            .wait_for(|p| *p == wanted || *p == ExecutionPriority::Stop)
            .await
            .map_err(|_| Stopped)?;
        if *seen == ExecutionPriority::Stop && wanted != ExecutionPriority::Stop {
            return Err(Stopped);
        }
        Ok(())
    }
}

impl Default for PriorityToken {
    fn default() -> Self {
        Self::new(ExecutionPriority::Normal)
    }
}

/// Restores `Normal` on drop unless something else replaced `High` meanwhile.
#[derive(Debug)]
pub struct PriorityGuard {
    tx: watch::Sender<ExecutionPriority>,
}

impl Drop for PriorityGuard {
    fn drop(&mut self) {
        self.tx.send_if_modified(|current| {
            if *current == ExecutionPriority::High {
                *current = ExecutionPriority::Normal;
                true
            } else {
                false
            }
        });
    }
}
