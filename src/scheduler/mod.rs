pub mod breaks;
pub mod duration;
pub mod offset;
pub mod window;

pub use breaks::{apply_jitter, pick_meal_slots, random_in_range, BreakKind, BreakPlanner, PlannedBreak};
pub use duration::{
    Directive, DurationState, Evaluation, HistoryEntry, Phase, ScheduledBreak, SchedulerHistory,
    HISTORY_LIMIT, RESUME_GAP_MINUTES,
};
pub use offset::deterministic_offset;
pub use window::{parse_hhmm, ranges_on, simple_window_contains, JitteredRange, SimpleWindow};

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Local};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{read_config, DurationConfig, ScheduleConfig, ScheduleMode, SharedConfig};
use crate::storage::ScheduleStore;
use crate::supervisor::AgentControl;
use crate::types::AgentName;

/// How often every scheduled agent is evaluated.
pub const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Days ahead searched for the next time-slot window.
const LOOKAHEAD_DAYS: i64 = 7;

/// Read-only schedule view of one agent.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSummary {
    pub agent: AgentName,
    pub enabled: bool,
    pub mode: ScheduleMode,
    pub within_schedule: bool,
    pub next_window_start: Option<DateTime<Local>>,
    pub duration_state: Option<DurationState>,
}

/// Starts and stops agents according to their configured schedules.
///
/// One driver evaluates every agent in turn. Starts are dispatched in the
/// background so a slow startup never delays the rest of the tick; stops are
/// awaited.
pub struct Scheduler {
    config: SharedConfig,
    control: Arc<dyn AgentControl>,
    store: Arc<dyn ScheduleStore>,
    states: RwLock<HashMap<AgentName, DurationState>>,
    rng: Mutex<StdRng>,
    interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Creates the scheduler and loads persisted duration state of every
    /// configured agent.
    pub async fn new(
        config: SharedConfig,
        control: Arc<dyn AgentControl>,
        store: Arc<dyn ScheduleStore>,
    ) -> Self {
        let scheduler = Self {
            config,
            control,
            store,
            states: RwLock::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
            interval: TICK_INTERVAL,
            cancel: CancellationToken::new(),
        };

        let names: Vec<AgentName> = read_config(&scheduler.config).agents.keys().cloned().collect();
        for name in names {
            scheduler.ensure_loaded(&name).await;
        }
        scheduler
    }

    /// Replaces the random source, for reproducible day plans.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Ticks until [`Scheduler::shutdown`] is called.
    pub async fn run(&self) {
        log::info!("scheduler started, evaluating every {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.tick_at(Local::now()).await,
            }
        }
        log::info!("scheduler stopped");
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Evaluates every agent with scheduling enabled as of `now`.
    pub async fn tick_at(&self, now: DateTime<Local>) {
        let scheduled: Vec<(AgentName, ScheduleConfig)> = read_config(&self.config)
            .agents
            .iter()
            .filter(|(_, agent)| agent.scheduler.enabled)
            .map(|(name, agent)| (name.clone(), agent.scheduler.clone()))
            .collect();

        for (name, schedule) in scheduled {
            match schedule.mode {
                ScheduleMode::Simple => self.check_simple(&name, &schedule, now).await,
                ScheduleMode::TimeSlots => self.check_time_slots(&name, &schedule, now).await,
                ScheduleMode::Duration => self.check_duration(&name, &schedule.duration, now).await,
            }
        }
    }

    async fn check_simple(&self, name: &str, schedule: &ScheduleConfig, now: DateTime<Local>) {
        let Some(window) = SimpleWindow::from_config(schedule) else {
            log::warn!(
                "{}: invalid simple schedule {:?}-{:?}, skipping",
                name,
                schedule.simple_start_time,
                schedule.simple_stop_time
            );
            return;
        };

        let running = self.is_running(name);
        if window.contains(&now) {
            if !running {
                log::info!("{}: inside schedule window {}, starting", name, window.label());
                self.start_agent(name);
            }
        } else if running {
            log::info!("{}: outside schedule window {}, stopping", name, window.label());
            self.stop_agent(name).await;
        }
    }

    /// The first range containing `now` decides; at most one start or stop
    /// happens per tick. A day without usable ranges leaves the agent alone.
    async fn check_time_slots(&self, name: &str, schedule: &ScheduleConfig, now: DateTime<Local>) {
        let ranges = ranges_on(name, schedule, now.date_naive());
        if ranges.is_empty() {
            return;
        }
        let running = self.is_running(name);

        match ranges.iter().find(|range| range.contains(&now)) {
            Some(range) if !running => {
                log::info!("{}: inside time slot {}, starting", name, range.label());
                self.start_agent(name);
            }
            Some(_) => {}
            None if running => {
                log::info!("{}: outside all time slots for today, stopping", name);
                self.stop_agent(name).await;
            }
            None => {}
        }
    }

    async fn check_duration(&self, name: &str, cfg: &DurationConfig, now: DateTime<Local>) {
        self.ensure_loaded(name).await;
        let running = self.is_running(name);

        let (evaluation, snapshot) = {
            let mut states = self.states_mut();
            let state = states.entry(name.to_string()).or_default();
            let mut rng = self.rng();
            let evaluation = state.evaluate(name, cfg, now, running, &mut *rng);
            let snapshot = evaluation.dirty.then(|| state.clone());
            (evaluation, snapshot)
        };

        if let Some(entry) = evaluation.closed_day {
            if let Err(e) = self.store.record_history(name, entry).await {
                log::error!("{}: failed to record schedule history: {:#}", name, e);
            }
        }
        if let Some(state) = snapshot {
            if let Err(e) = self.store.save_state(name, &state).await {
                log::error!("{}: failed to save scheduler state: {:#}", name, e);
            }
        }

        match evaluation.directive {
            Some(Directive::Start) => self.start_agent(name),
            Some(Directive::Stop) => self.stop_agent(name).await,
            None => {}
        }
    }

    /// Whether `name` may be active at `now`. Agents without a schedule, or
    /// with one that cannot be parsed, are always allowed.
    pub fn is_within_schedule(&self, name: &str, now: DateTime<Local>) -> bool {
        let Some(schedule) = self.schedule(name) else {
            return true;
        };
        if !schedule.enabled {
            return true;
        }

        match schedule.mode {
            ScheduleMode::Simple => SimpleWindow::from_config(&schedule)
                .map_or(true, |window| window.contains(&now)),
            ScheduleMode::TimeSlots => ranges_on(name, &schedule, now.date_naive())
                .iter()
                .any(|range| range.contains(&now)),
            ScheduleMode::Duration => self
                .states()
                .get(name)
                .map_or(true, |state| state.current_phase == Phase::Playing),
        }
    }

    /// When the next permitted window opens, if there is a known one after
    /// `now`.
    pub fn next_window_start(&self, name: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let schedule = self.schedule(name)?;
        if !schedule.enabled {
            return None;
        }

        match schedule.mode {
            ScheduleMode::Simple => SimpleWindow::from_config(&schedule)?.next_start(&now),
            ScheduleMode::TimeSlots => (0..=LOOKAHEAD_DAYS).find_map(|days| {
                let date = (now + ChronoDuration::days(days)).date_naive();
                ranges_on(name, &schedule, date)
                    .iter()
                    .map(|range| range.start)
                    .filter(|start| *start > now)
                    .min()
            }),
            ScheduleMode::Duration => {
                let states = self.states();
                let state = states.get(name)?;
                match state.current_phase {
                    Phase::Resting => state.today_wake_time.filter(|wake| *wake > now),
                    Phase::OnBreak => state.phase_end_time.filter(|end| *end > now),
                    Phase::Playing => None,
                }
            }
        }
    }

    pub fn duration_state(&self, name: &str) -> Option<DurationState> {
        self.states().get(name).cloned()
    }

    pub async fn history(&self, name: &str) -> Result<SchedulerHistory> {
        self.store.load_history(name).await
    }

    /// `None` when `name` is not configured.
    pub fn summary(&self, name: &str, now: DateTime<Local>) -> Option<ScheduleSummary> {
        let schedule = self.schedule(name)?;
        Some(ScheduleSummary {
            agent: name.to_string(),
            enabled: schedule.enabled,
            mode: schedule.mode,
            within_schedule: self.is_within_schedule(name, now),
            next_window_start: self.next_window_start(name, now),
            duration_state: self.duration_state(name),
        })
    }

    fn schedule(&self, name: &str) -> Option<ScheduleConfig> {
        read_config(&self.config)
            .agent(name)
            .map(|agent| agent.scheduler.clone())
    }

    fn is_running(&self, name: &str) -> bool {
        !self.control.status(name).status.is_idle()
    }

    fn start_agent(&self, name: &str) {
        if self.is_running(name) {
            return;
        }
        let control = self.control.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            if !control.status(&name).status.is_idle() {
                return;
            }
            if let Err(e) = control.start(&name, false).await {
                log::warn!("{}: scheduled start failed: {}", name, e);
            }
        });
    }

    async fn stop_agent(&self, name: &str) {
        if self.is_running(name) {
            self.control.stop(name).await;
        }
    }

    async fn ensure_loaded(&self, name: &str) {
        if self.states().contains_key(name) {
            return;
        }
        match self.store.load_state(name).await {
            Ok(Some(state)) => {
                log::debug!("{}: loaded scheduler state ({:?})", name, state.current_phase);
                self.states_mut().entry(name.to_string()).or_insert(state);
            }
            Ok(None) => {}
            Err(e) => log::warn!("{}: ignoring unreadable scheduler state: {:#}", name, e),
        }
    }

    fn states(&self) -> RwLockReadGuard<'_, HashMap<AgentName, DurationState>> {
        self.states.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn states_mut(&self) -> RwLockWriteGuard<'_, HashMap<AgentName, DurationState>> {
        self.states.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
