use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use super::loops::{self, LoopContext};
use crate::config::AgentConfig;
use crate::error::SessionError;
use crate::events::NotificationSink;
use crate::lifecycle::LatencyMonitor;
use crate::runtime::AgentRuntime;
use crate::services::{AgentServices, Task};
use crate::types::ExecutionPriority;

/// Configuration for the Priority Executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Lower bound of the randomized loop tick
    pub tick_min: Duration,
    /// Upper bound of the randomized loop tick
    pub tick_max: Duration,
    /// How long the position may stay within `min_movement` before the session is abandoned
    pub idle_threshold: Duration,
    pub min_movement: f64,
    pub max_session: Option<Duration>,
    pub max_level: Option<u32>,
    /// Absent when latency monitoring is disabled
    pub latency: Option<LatencyMonitor>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tick_min: Duration::from_millis(70),
            tick_max: Duration::from_millis(130),
            idle_threshold: Duration::from_secs(120),
            min_movement: 30.0,
            max_session: None,
            max_level: None,
            latency: None,
        }
    }
}

impl From<&AgentConfig> for ExecutorConfig {
    fn from(config: &AgentConfig) -> Self {
        let settings = &config.executor;
        Self {
            tick_min: Duration::from_millis(settings.tick_min_ms),
            tick_max: Duration::from_millis(settings.tick_max_ms),
            idle_threshold: Duration::from_secs(settings.idle_threshold_secs),
            min_movement: settings.min_movement,
            max_session: settings.max_session_secs.map(Duration::from_secs),
            max_level: settings.max_level,
            latency: LatencyMonitor::from_settings(&config.latency),
        }
    }
}

/// Runs one agent's loop set (data refresh, health watchdog, high-priority
/// maintenance, task runner) under one cancellation scope.
pub struct PriorityExecutor {
    runtime: Arc<AgentRuntime>,
    services: AgentServices,
    sink: Arc<dyn NotificationSink>,
    config: ExecutorConfig,
}

impl PriorityExecutor {
    pub fn new(
        runtime: Arc<AgentRuntime>,
        services: AgentServices,
        sink: Arc<dyn NotificationSink>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            runtime,
            services,
            sink,
            config,
        }
    }

    /// Runs all loops until one of them ends.
    ///
    /// The first error observed wins; loops that end because the scope was
    /// cancelled report `Ok`. A loop that panics surfaces as `LoopFailed`.
    pub async fn run(&self, tasks: Vec<Arc<dyn Task>>, first_run: bool) -> Result<(), SessionError> {
        let scope = self.runtime.cancel_token().child_token();
        let priority = self.runtime.priority();
        if !priority.is(ExecutionPriority::Pause) {
            priority.set(ExecutionPriority::Normal);
        }
        self.runtime.mark_session_start(Instant::now());

        let ctx = Arc::new(LoopContext {
            runtime: self.runtime.clone(),
            services: self.services.clone(),
            sink: self.sink.clone(),
            config: self.config.clone(),
            scope: scope.clone(),
        });

        let mut group = JoinSet::new();
        group.spawn(loops::refresh_loop(ctx.clone()));
        group.spawn(loops::watchdog_loop(ctx.clone()));
        group.spawn(loops::maintenance_loop(ctx.clone()));
        group.spawn(loops::task_loop(ctx, tasks, first_run));

        let mut outcome = Ok(());
        while let Some(joined) = group.join_next().await {
            scope.cancel();
            let result = joined.unwrap_or_else(|e| {
                Err(SessionError::LoopFailed {
                    message: e.to_string(),
                })
            });
            if outcome.is_ok() {
                if let Err(e) = result {
                    outcome = Err(e);
                }
            }
        }

        if !priority.is(ExecutionPriority::Pause) {
            priority.set(ExecutionPriority::Stop);
        }

        match &outcome {
            Ok(()) => log::info!("{}: session loops finished", self.runtime.name()),
            Err(e) => log::info!("{}: session loops ended: {}", self.runtime.name(), e),
        }
        outcome
    }
}
