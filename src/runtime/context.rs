use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::activity::{ActivityTracker, IdleVerdict};
use super::priority::PriorityToken;
use crate::types::{AgentName, ExecutionPriority, Position};

/// Per-agent state shared by the executor loops, the instance and the registry.
#[derive(Debug)]
pub struct AgentRuntime {
    name: AgentName,
    priority: PriorityToken,
    activity: Mutex<ActivityTracker>,
    cancel: CancellationToken,
    manual_mode: bool,
    clean_stop_requested: AtomicBool,
    restart_with: Mutex<Option<AgentName>>,
    session_started: Mutex<Option<Instant>>,
    current_task: Mutex<Option<String>>,
}

impl AgentRuntime {
    pub fn new(name: impl Into<AgentName>, manual_mode: bool) -> Self {
        Self {
            name: name.into(),
            priority: PriorityToken::default(),
            activity: Mutex::new(ActivityTracker::new(Instant::now())),
            cancel: CancellationToken::new(),
            manual_mode,
            clean_stop_requested: AtomicBool::new(false),
            restart_with: Mutex::new(None),
            session_started: Mutex::new(None),
            current_task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> &PriorityToken {
        &self.priority
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn manual_mode(&self) -> bool {
        self.manual_mode
    }

    pub fn clean_stop_requested(&self) -> bool {
        self.clean_stop_requested.load(Ordering::SeqCst)
    }

    pub fn restart_with(&self) -> Option<AgentName> {
        lock(&self.restart_with).clone()
    }

    /// Asks the instance to wind down without being restarted, optionally
    /// handing over to `next`.
    pub fn request_stop(&self, next: Option<AgentName>) {
        log::info!("{}: clean stop requested (next: {:?})", self.name, next);
        *lock(&self.restart_with) = next;
        self.clean_stop_requested.store(true, Ordering::SeqCst);
        self.priority.set(ExecutionPriority::Stop);
        self.cancel.cancel();
    }

    pub fn mark_session_start(&self, now: Instant) {
        *lock(&self.session_started) = Some(now);
        lock(&self.activity).reset(now);
    }

    pub fn session_elapsed(&self, now: Instant) -> Option<Duration> {
        lock(&self.session_started).map(|start| now.saturating_duration_since(start))
    }

    pub fn touch_activity(&self, now: Instant) {
        lock(&self.activity).touch(now);
    }

    pub fn observe_position(
        &self,
        position: Option<Position>,
        now: Instant,
        min_movement: f64,
        idle_threshold: Duration,
    ) -> IdleVerdict {
        lock(&self.activity).observe(position, now, min_movement, idle_threshold)
    }

    pub fn last_activity(&self) -> Instant {
        lock(&self.activity).last_activity()
    }

    pub fn current_task(&self) -> Option<String> {
        lock(&self.current_task).clone()
    }

    pub fn set_current_task(&self, task: Option<String>) {
        *lock(&self.current_task) = task;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
