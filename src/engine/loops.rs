use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::executor::ExecutorConfig;
use crate::error::SessionError;
use crate::events::{Event, NotificationSink};
use crate::lifecycle::LatencyVerdict;
use crate::runtime::{AgentRuntime, IdleVerdict};
use crate::services::{AgentServices, MaintenanceAction, Task};
use crate::types::{ExecutionPriority, FinishReason};

pub(crate) struct LoopContext {
    pub runtime: Arc<AgentRuntime>,
    pub services: AgentServices,
    pub sink: Arc<dyn NotificationSink>,
    pub config: ExecutorConfig,
    pub scope: CancellationToken,
}

impl LoopContext {
    fn name(&self) -> &str {
        self.runtime.name()
    }

    fn paused(&self) -> bool {
        self.runtime.priority().is(ExecutionPriority::Pause)
    }

    /// Sleeps one randomized tick. Returns false once the scope is cancelled.
    async fn next_tick(&self) -> bool {
        let delay = jittered(self.config.tick_min, self.config.tick_max);
        tokio::select! {
            _ = self.scope.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

pub(crate) fn jittered(min: Duration, max: Duration) -> Duration {
    let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

pub(crate) async fn refresh_loop(ctx: Arc<LoopContext>) -> Result<(), SessionError> {
    while ctx.next_tick().await {
        if ctx.paused() {
            continue;
        }
        if let Err(e) = ctx.services.driver.refresh_state().await {
            log::warn!("{}: state refresh failed: {}", ctx.name(), e);
            continue;
        }
        ctx.runtime.touch_activity(Instant::now());
    }
    Ok(())
}

pub(crate) async fn watchdog_loop(ctx: Arc<LoopContext>) -> Result<(), SessionError> {
    let driver = &ctx.services.driver;
    let mut latency = ctx.config.latency.clone();

    while ctx.next_tick().await {
        if ctx.paused() {
            continue;
        }
        // Out of session the health data is not valid yet.
        if !driver.is_running().await {
            continue;
        }

        if let Err(e) = ctx.services.health.check_health_and_react(&ctx.runtime).await {
            log::info!("{}: health watchdog detected a critical condition: {}", ctx.name(), e);
            return Err(e);
        }

        let now = Instant::now();
        ctx.runtime.touch_activity(now);

        if let Some(monitor) = latency.as_mut().filter(|m| m.due(now)) {
            if let Some(reading) = driver.latency_ms().await {
                match monitor.record(reading, now) {
                    LatencyVerdict::Sustained { latency_ms, since } => {
                        log::error!(
                            "{}: sustained high latency ({} ms for {:?}, recent average {:?} ms), ending session",
                            ctx.name(),
                            latency_ms,
                            since,
                            monitor.average_ms(5)
                        );
                        return Err(SessionError::HighLatency {
                            latency_ms,
                            sustained: since,
                        });
                    }
                    LatencyVerdict::Elevated { latency_ms, since } if since.is_zero() => {
                        log::warn!("{}: latency above threshold ({} ms)", ctx.name(), latency_ms);
                    }
                    _ => {}
                }
            }
        }

        let position = driver.current_position().await;
        match ctx.runtime.observe_position(
            position,
            now,
            ctx.config.min_movement,
            ctx.config.idle_threshold,
        ) {
            IdleVerdict::Moved(distance) => {
                log::debug!("{}: moved {:.2} units, idle timer reset", ctx.name(), distance);
            }
            IdleVerdict::Idle(idle_for) => {
                log::error!(
                    "{}: player globally idle for {:?} (no significant movement), quitting session",
                    ctx.name(),
                    idle_for
                );
                return Err(SessionError::Idle { idle_for });
            }
            IdleVerdict::Active => {}
        }

        if let (Some(max), Some(elapsed)) = (ctx.config.max_session, ctx.runtime.session_elapsed(now)) {
            if elapsed > max {
                log::info!(
                    "{}: max session duration reached after {:?}, exiting",
                    ctx.name(),
                    elapsed
                );
                return Err(SessionError::MaxDurationExceeded { elapsed });
            }
        }
    }
    Ok(())
}

pub(crate) async fn maintenance_loop(ctx: Arc<LoopContext>) -> Result<(), SessionError> {
    let maintenance = &ctx.services.maintenance;

    while ctx.next_tick().await {
        if ctx.paused() {
            continue;
        }
        ctx.runtime.touch_activity(Instant::now());

        if let Some(max_level) = ctx.config.max_level {
            if let Some(level) = ctx.services.driver.current_level().await {
                if level >= max_level {
                    log::info!(
                        "{}: reached level {} (max {}), requesting supervisor stop",
                        ctx.name(),
                        level,
                        max_level
                    );
                    ctx.runtime.request_stop(None);
                    return Ok(());
                }
            }
        }

        let needs = maintenance.peek(&ctx.runtime).await;
        if !needs.any() {
            continue;
        }
        let Some(_guard) = ctx.runtime.priority().raise() else {
            continue;
        };

        for action in needs.actions() {
            if ctx.scope.is_cancelled() {
                break;
            }
            if let (MaintenanceAction::ReturnToBase, Some(reason)) = (action, &needs.return_to_base) {
                log::info!("{}: returning to base: {}", ctx.name(), reason);
            }

            match maintenance.perform(action, &ctx.runtime).await {
                Ok(()) => {}
                Err(e) if action == MaintenanceAction::ReturnToBase => {
                    log::warn!("{}: failed returning to base, ending session: {}", ctx.name(), e);
                    return Err(e);
                }
                Err(e @ (SessionError::Died | SessionError::HealthCritical { .. })) => {
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("{}: maintenance {:?} failed: {}", ctx.name(), action, e);
                }
            }
        }
    }
    Ok(())
}

pub(crate) async fn task_loop(
    ctx: Arc<LoopContext>,
    tasks: Vec<Arc<dyn Task>>,
    mut first_run: bool,
) -> Result<(), SessionError> {
    let total = tasks.len();

    for (idx, task) in tasks.into_iter().enumerate() {
        // Wait until maintenance and pause have released the token.
        tokio::select! {
            _ = ctx.scope.cancelled() => return Ok(()),
            turn = ctx.runtime.priority().wait_for_turn(ExecutionPriority::Normal) => {
                if turn.is_err() {
                    return Ok(());
                }
            }
        }

        let skip_routines = task.skip_pre_post_routines();
        ctx.runtime.set_current_task(Some(task.name().to_string()));
        ctx.runtime.touch_activity(Instant::now());
        ctx.sink.send(Event::TaskStarted {
            agent: ctx.name().to_string(),
            task: task.name().to_string(),
            at: Utc::now(),
        });

        let result = tokio::select! {
            _ = ctx.scope.cancelled() => {
                ctx.runtime.set_current_task(None);
                return Ok(());
            }
            result = run_one(&ctx, task.as_ref(), skip_routines, first_run) => result,
        };
        if !skip_routines {
            first_run = false;
        }
        ctx.runtime.set_current_task(None);

        if let Err(e) = &result {
            if e.is_interrupt() {
                log::info!(
                    "{}: interrupt acknowledged, ending {} to hand over",
                    ctx.name(),
                    task.name()
                );
                return Err(SessionError::Interrupt);
            }
        }

        let reason = result
            .as_ref()
            .err()
            .map_or(FinishReason::Ok, SessionError::finish_reason);
        ctx.sink.send(Event::TaskFinished {
            agent: ctx.name().to_string(),
            task: task.name().to_string(),
            reason,
            at: Utc::now(),
        });
        result?;

        if !skip_routines {
            ctx.services
                .routines
                .post_run(&ctx.runtime, idx + 1 == total)
                .await?;
        }
    }
    Ok(())
}

async fn run_one(
    ctx: &LoopContext,
    task: &dyn Task,
    skip_routines: bool,
    first_run: bool,
) -> Result<(), SessionError> {
    if !skip_routines {
        ctx.services.routines.pre_run(&ctx.runtime, first_run).await?;
    }
    ctx.runtime.touch_activity(Instant::now());
    task.run(&ctx.runtime).await
}
