use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::engine::{ExecutorConfig, PriorityExecutor};
use crate::error::{MenuError, SessionError};
use crate::events::{Event, NotificationSink};
use crate::lifecycle::{InstanceStateMachine, LifecycleEvent};
use crate::runtime::AgentRuntime;
use crate::services::{AgentServices, ProcessHandle};
use crate::types::{DataSnapshot, ExecutionPriority, FinishReason, SessionId, Stats, SupervisorStatus};

/// Timing of the session loop.
#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub menu_timeout: Duration,
    pub max_out_of_session: Duration,
    pub menu_retry_budget: u32,
    pub exit_timeout: Duration,
    pub exit_poll: Duration,
    pub loading_retry: Duration,
    pub transient_retry: Duration,
    pub interrupt_settle: Duration,
    pub idle_min: Duration,
    pub idle_max: Duration,
    pub randomize_tasks: bool,
    pub kill_client_on_stop: bool,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for InstanceSettings {
    fn from(config: &AgentConfig) -> Self {
        let session = &config.session;
        Self {
            menu_timeout: Duration::from_secs(session.menu_timeout_secs),
            max_out_of_session: Duration::from_secs(session.max_out_of_session_secs),
            menu_retry_budget: session.menu_retry_budget,
            exit_timeout: Duration::from_secs(session.exit_timeout_secs),
            exit_poll: Duration::from_millis(500),
            loading_retry: Duration::from_millis(100),
            transient_retry: Duration::from_secs(1),
            interrupt_settle: Duration::from_secs(2),
            idle_min: Duration::from_millis(session.idle_min_ms),
            idle_max: Duration::from_millis(session.idle_max_ms),
            randomize_tasks: config.randomize_tasks,
            kill_client_on_stop: config.kill_client_on_stop,
        }
    }
}

/// One running agent: drives the client in and out of sessions and runs the
/// priority executor for each session.
pub struct AgentInstance {
    runtime: Arc<AgentRuntime>,
    services: AgentServices,
    process: Arc<dyn ProcessHandle>,
    sink: Arc<dyn NotificationSink>,
    executor_config: ExecutorConfig,
    settings: InstanceSettings,
    stats: Mutex<Stats>,
}

impl AgentInstance {
    pub fn new(
        runtime: Arc<AgentRuntime>,
        services: AgentServices,
        process: Arc<dyn ProcessHandle>,
        sink: Arc<dyn NotificationSink>,
        executor_config: ExecutorConfig,
        settings: InstanceSettings,
    ) -> Self {
        let mut stats = Stats::not_started();
        InstanceStateMachine::apply(runtime.name(), &mut stats.status, LifecycleEvent::StartRequested);
        Self {
            runtime,
            services,
            process,
            sink,
            executor_config,
            settings,
            stats: Mutex::new(stats),
        }
    }

    pub fn name(&self) -> &str {
        self.runtime.name()
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    pub fn stats(&self) -> Stats {
        let mut stats = self.lock_stats().clone();
        stats.current_task = self.runtime.current_task();
        stats.priority = Some(self.runtime.priority().get());
        stats
    }

    pub fn status(&self) -> SupervisorStatus {
        self.lock_stats().status
    }

    pub async fn data(&self) -> DataSnapshot {
        let driver = &self.services.driver;
        DataSnapshot {
            in_session: driver.is_running().await,
            position: driver.current_position().await,
            level: driver.current_level().await,
            latency_ms: driver.latency_ms().await,
        }
    }

    /// Runs until stopped. Blocks for the whole lifetime of the instance.
    pub async fn run(&self) -> Result<(), SessionError> {
        self.lock_stats().started_at = Some(Utc::now());

        if self.runtime.manual_mode() {
            log::info!("{}: manual mode, waiting for stop", self.name());
            self.transition(LifecycleEvent::SessionReady);
            self.runtime.cancel_token().cancelled().await;
            return Ok(());
        }

        let result = self.session_cycle().await;
        if let Err(e) = &result {
            log::error!("{}: supervisor loop ended: {}", self.name(), e);
            self.lock_stats().last_error = Some(e.to_string());
        }
        if self.runtime.clean_stop_requested() {
            // The crash detector picks this up and applies the clean-stop policy.
            self.kill_client().await;
        }
        result
    }

    async fn session_cycle(&self) -> Result<(), SessionError> {
        let mut first_run = true;

        loop {
            if !self.enter_session().await? {
                return Ok(());
            }
            self.transition(LifecycleEvent::SessionReady);

            let mut tasks = self.services.catalog.build_tasks();
            if self.settings.randomize_tasks {
                tasks.shuffle(&mut rand::thread_rng());
            }

            let session_id = Uuid::new_v4();
            self.lock_stats().sessions_started += 1;
            log::info!("{}: session {} created with {} tasks", self.name(), session_id, tasks.len());
            self.sink.send(Event::SessionCreated {
                agent: self.name().to_string(),
                session_id,
                at: Utc::now(),
            });

            let executor = PriorityExecutor::new(
                self.runtime.clone(),
                self.services.clone(),
                self.sink.clone(),
                self.executor_config.clone(),
            );
            let result = executor.run(tasks, first_run).await;
            first_run = false;

            if self.runtime.is_cancelled() {
                self.finish_session(session_id, &result);
                return Ok(());
            }

            match result {
                Err(SessionError::Interrupt) => {
                    log::info!("{}: session interrupted, handing over", self.name());
                    self.finish_session(session_id, &Err(SessionError::Interrupt));
                    self.leave_session().await?;
                    if !self.pause_for(self.settings.interrupt_settle).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    log::warn!("{}: session ended with error: {}", self.name(), e);
                    {
                        let mut stats = self.lock_stats();
                        stats.sessions_failed += 1;
                        stats.last_error = Some(e.to_string());
                    }
                    let result = Err(e);
                    self.finish_session(session_id, &result);
                    self.leave_session().await?;
                }
                Ok(()) => {
                    self.finish_session(session_id, &Ok(()));
                    self.leave_session().await?;
                    let idle = self.inter_session_idle();
                    log::debug!("{}: idling {:?} before next session", self.name(), idle);
                    if !self.pause_for(idle).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Drives the menus until a session is entered. `Ok(false)` on stop.
    async fn enter_session(&self) -> Result<bool, SessionError> {
        let gateway = &self.services.gateway;
        let mut deadline = Instant::now() + self.settings.max_out_of_session;
        let mut transient_failures = 0u32;

        loop {
            if self.runtime.is_cancelled() {
                return Ok(false);
            }
            if gateway.in_session().await {
                return Ok(true);
            }
            if self.runtime.priority().is(ExecutionPriority::Pause) {
                // Time spent paused does not count against the menu deadline.
                let started = Instant::now();
                if !self.pause_for(self.settings.loading_retry).await {
                    return Ok(false);
                }
                deadline += started.elapsed();
                continue;
            }
            if Instant::now() >= deadline {
                return Err(self
                    .escalate(format!(
                        "outside a session for more than {:?}",
                        self.settings.max_out_of_session
                    ))
                    .await);
            }

            let step = tokio::select! {
                _ = self.runtime.cancel_token().cancelled() => return Ok(false),
                step = tokio::time::timeout(self.settings.menu_timeout, gateway.advance_menu()) => step,
            };

            let retry_after = match step {
                Err(_) => {
                    return Err(self
                        .escalate(format!("menu step timed out after {:?}", self.settings.menu_timeout))
                        .await);
                }
                Ok(Ok(())) => {
                    transient_failures = 0;
                    continue;
                }
                Ok(Err(MenuError::Loading)) => self.settings.loading_retry,
                Ok(Err(MenuError::Transient(msg))) => {
                    transient_failures += 1;
                    log::warn!(
                        "{}: menu step failed ({}/{}): {}",
                        self.name(),
                        transient_failures,
                        self.settings.menu_retry_budget,
                        msg
                    );
                    if transient_failures > self.settings.menu_retry_budget {
                        return Err(self
                            .escalate(format!("menu flow failed {} times: {}", transient_failures, msg))
                            .await);
                    }
                    self.settings.transient_retry
                }
                Ok(Err(MenuError::Unrecoverable(msg))) => return Err(self.escalate(msg).await),
            };

            if !self.pause_for(retry_after).await {
                return Ok(false);
            }
        }
    }

    /// Exits the current session and waits for the client to leave it.
    async fn leave_session(&self) -> Result<(), SessionError> {
        if let Err(e) = self.services.driver.exit_session().await {
            return Err(self.escalate(format!("failed to exit session: {}", e)).await);
        }

        let deadline = Instant::now() + self.settings.exit_timeout;
        while self.services.gateway.in_session().await {
            if Instant::now() >= deadline {
                return Err(self
                    .escalate(format!(
                        "still in session {:?} after exit",
                        self.settings.exit_timeout
                    ))
                    .await);
            }
            if !self.pause_for(self.settings.exit_poll).await {
                break;
            }
        }
        Ok(())
    }

    /// Kills the client and turns `reason` into an unrecoverable error.
    async fn escalate(&self, reason: String) -> SessionError {
        log::error!("{}: {}, killing client", self.name(), reason);
        self.kill_client().await;
        SessionError::Unrecoverable { reason }
    }

    fn finish_session(&self, session_id: SessionId, result: &Result<(), SessionError>) {
        let (reason, message) = match result {
            Ok(()) => (FinishReason::Ok, None),
            Err(e) => (e.finish_reason(), Some(e.to_string())),
        };
        self.sink.send(Event::SessionFinished {
            agent: self.name().to_string(),
            session_id,
            reason,
            message,
            at: Utc::now(),
        });
    }

    fn inter_session_idle(&self) -> Duration {
        let (lo, hi) = (
            self.settings.idle_min.as_millis() as u64,
            self.settings.idle_max.as_millis() as u64,
        );
        if hi <= lo {
            return self.settings.idle_min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }

    /// Sleeps unless stopped first. Returns false when stopped.
    async fn pause_for(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.runtime.cancel_token().cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn kill_client(&self) {
        if let Err(e) = self.process.kill().await {
            log::warn!("{}: failed to kill client: {}", self.name(), e);
        }
    }

    pub async fn stop(&self) {
        log::info!("{}: stopping instance", self.name());
        self.transition(LifecycleEvent::StopRequested);
        self.runtime.priority().set(ExecutionPriority::Stop);
        self.runtime.cancel_token().cancel();
        if self.settings.kill_client_on_stop {
            self.kill_client().await;
        }
        self.transition(LifecycleEvent::Stopped);
    }

    pub fn mark_crashed(&self) {
        self.transition(LifecycleEvent::ProcessDied);
    }

    /// Flips between `Pause` and `Normal`. Returns whether the agent is now
    /// paused. `Stop` between sessions counts as not paused; only a stopped
    /// instance ignores the request.
    pub fn toggle_pause(&self) -> bool {
        if self.runtime.is_cancelled() {
            return false;
        }
        let priority = self.runtime.priority();
        let paused = match priority.get() {
            ExecutionPriority::Pause => {
                priority.set(ExecutionPriority::Normal);
                self.transition(LifecycleEvent::Resumed);
                false
            }
            _ => {
                priority.set(ExecutionPriority::Pause);
                self.transition(LifecycleEvent::Paused);
                true
            }
        };

        log::info!("{}: {}", self.name(), if paused { "paused" } else { "resumed" });
        self.sink.send(Event::AgentPaused {
            agent: self.name().to_string(),
            paused,
            at: Utc::now(),
        });
        paused
    }

    fn transition(&self, event: LifecycleEvent) {
        let mut stats = self.lock_stats();
        InstanceStateMachine::apply(self.runtime.name(), &mut stats.status, event);
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, Stats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
