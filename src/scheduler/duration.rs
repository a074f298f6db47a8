use chrono::{DateTime, Duration, Local, NaiveTime};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::breaks::{random_in_range, BreakKind, BreakPlanner, PlannedBreak};
use super::window::{local_at, parse_hhmm};
use crate::config::{DurationConfig, MAX_PLAY_HOURS};

/// Completed days kept in the rolling history.
pub const HISTORY_LIMIT: usize = 30;

/// Gap in observed running after which play is treated as a fresh session.
pub const RESUME_GAP_MINUTES: i64 = 2;

const DEFAULT_WAKE_TIME: (u32, u32) = (8, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Resting,
    Playing,
    OnBreak,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBreak {
    #[serde(rename = "type")]
    pub kind: BreakKind,
    pub start_time: DateTime<Local>,
    /// Minutes.
    pub duration: i64,
}

impl ScheduledBreak {
    pub fn at(session_start: DateTime<Local>, planned: &PlannedBreak) -> Self {
        Self {
            kind: planned.kind,
            start_time: session_start + Duration::minutes(planned.start_minute),
            duration: planned.duration_minutes,
        }
    }

    pub fn end_time(&self) -> DateTime<Local> {
        self.start_time + Duration::minutes(self.duration)
    }
}

/// Day plan of one agent in duration mode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DurationState {
    pub current_phase: Phase,
    pub phase_start_time: Option<DateTime<Local>>,
    /// Only meaningful while on a break.
    pub phase_end_time: Option<DateTime<Local>>,
    pub today_wake_time: Option<DateTime<Local>>,
    pub today_rest_time: Option<DateTime<Local>>,
    pub played_minutes: i64,
    pub played_minutes_at_phase_start: i64,
    pub scheduled_breaks: Vec<ScheduledBreak>,
    pub current_break_idx: usize,
    pub last_updated: Option<DateTime<Local>>,
    pub last_seen_running: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Start,
    Stop,
}

/// Outcome of evaluating a duration plan for one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub directive: Option<Directive>,
    /// The state changed and must be persisted.
    pub dirty: bool,
    /// The previous day, closed out by a day rollover.
    pub closed_day: Option<HistoryEntry>,
}

impl DurationState {
    pub fn is_new_day(&self, now: DateTime<Local>) -> bool {
        self.today_wake_time
            .map_or(true, |wake| wake.date_naive() != now.date_naive())
    }

    pub fn next_break(&self) -> Option<&ScheduledBreak> {
        self.scheduled_breaks.get(self.current_break_idx)
    }

    pub fn total_break_minutes(&self) -> i64 {
        self.scheduled_breaks.iter().map(|b| b.duration).sum()
    }

    /// Advances the plan by one tick. `running` is whether the agent is up.
    pub fn evaluate(
        &mut self,
        agent: &str,
        cfg: &DurationConfig,
        now: DateTime<Local>,
        running: bool,
        rng: &mut impl Rng,
    ) -> Evaluation {
        let mut eval = Evaluation::default();

        if self.is_new_day(now) {
            eval.closed_day = self.initialize_day(agent, cfg, now, rng);
            eval.dirty = true;
        }

        match self.current_phase {
            Phase::Resting => self.evaluate_resting(agent, cfg, now, running, rng, &mut eval),
            Phase::Playing => self.evaluate_playing(agent, now, running, &mut eval),
            Phase::OnBreak => self.evaluate_on_break(agent, now, &mut eval),
        }
        eval
    }

    /// Plans a fresh day. Returns the closed-out previous day when it had
    /// any play time.
    pub fn initialize_day(
        &mut self,
        agent: &str,
        cfg: &DurationConfig,
        now: DateTime<Local>,
        rng: &mut impl Rng,
    ) -> Option<HistoryEntry> {
        let closed = if self.played_minutes > 0 {
            HistoryEntry::from_state(self)
        } else {
            None
        };

        let planner = BreakPlanner::from(cfg);
        let wake_clock = parse_hhmm(&cfg.wake_up_time).unwrap_or_else(|| {
            if !cfg.wake_up_time.is_empty() {
                log::warn!(
                    "{}: invalid wake-up time {:?}, using 08:00",
                    agent,
                    cfg.wake_up_time
                );
            }
            default_wake_time()
        });

        let today = now.date_naive();
        let wake_variance = planner.jitter(cfg.wake_up_variance.abs(), rng);
        let wake_offset = random_in_range(-wake_variance, wake_variance, rng);
        let day_start = local_at(today, NaiveTime::default());
        let day_end = local_at(today, NaiveTime::from_hms_opt(23, 59, 0).unwrap_or_default());
        let wake = (local_at(today, wake_clock) + Duration::minutes(wake_offset)).clamp(day_start, day_end);

        let base_hours = cfg.play_hours.clamp(1, MAX_PLAY_HOURS);
        let hours_variance = planner.jitter(cfg.play_hours_variance.abs() * 60, rng) / 60;
        let play_hours = (base_hours + random_in_range(-hours_variance, hours_variance, rng)).max(1);

        self.plan_from(wake, play_hours, &planner, rng);
        self.current_phase = Phase::Resting;
        self.phase_start_time = None;
        self.phase_end_time = None;
        self.played_minutes = 0;
        self.played_minutes_at_phase_start = 0;
        self.last_seen_running = None;
        self.last_updated = Some(now);

        log::info!(
            "{}: new day planned, wake {}, rest {}, {}h play, {} breaks ({} min)",
            agent,
            wake.format("%H:%M"),
            self.today_rest_time.map(|t| t.format("%H:%M").to_string()).unwrap_or_default(),
            play_hours,
            self.scheduled_breaks.len(),
            self.total_break_minutes()
        );
        closed
    }

    /// Sets wake, breaks and rest for a session of `play_hours` from `wake`.
    fn plan_from(
        &mut self,
        wake: DateTime<Local>,
        play_hours: i64,
        planner: &BreakPlanner,
        rng: &mut impl Rng,
    ) {
        self.scheduled_breaks = planner
            .plan(play_hours, rng)
            .iter()
            .map(|planned| ScheduledBreak::at(wake, planned))
            .collect();
        self.current_break_idx = 0;
        self.today_wake_time = Some(wake);
        self.today_rest_time = Some(
            wake + Duration::hours(play_hours) + Duration::minutes(self.total_break_minutes()),
        );
    }

    fn evaluate_resting(
        &mut self,
        agent: &str,
        cfg: &DurationConfig,
        now: DateTime<Local>,
        running: bool,
        rng: &mut impl Rng,
        eval: &mut Evaluation,
    ) {
        if running {
            let budget = cfg.play_hours.clamp(1, MAX_PLAY_HOURS) * 60;
            if self.played_minutes >= budget {
                log::info!(
                    "{}: started manually while resting, budget already met ({} of {} min), stopping",
                    agent,
                    self.played_minutes,
                    budget
                );
                eval.directive = Some(Directive::Stop);
                return;
            }

            if self.played_minutes > 0 {
                let remaining = budget - self.played_minutes;
                log::info!(
                    "{}: started manually while resting, {} min of budget left, playing until {}",
                    agent,
                    remaining,
                    (now + Duration::minutes(remaining)).format("%H:%M")
                );
                self.today_rest_time = Some(now + Duration::minutes(remaining));
                self.scheduled_breaks.clear();
                self.current_break_idx = 0;
            } else {
                log::info!(
                    "{}: started manually before playing today, replanning from {}",
                    agent,
                    now.format("%H:%M")
                );
                let play_hours = cfg.play_hours.clamp(1, MAX_PLAY_HOURS);
                self.plan_from(now, play_hours, &BreakPlanner::from(cfg), rng);
                self.played_minutes = 0;
            }
            self.enter_playing(agent, now);
            eval.dirty = true;
            return;
        }

        let (Some(wake), Some(rest)) = (self.today_wake_time, self.today_rest_time) else {
            return;
        };
        if now >= wake && now < rest {
            self.enter_playing(agent, now);
            eval.directive = Some(Directive::Start);
            eval.dirty = true;
        }
    }

    fn evaluate_playing(
        &mut self,
        agent: &str,
        now: DateTime<Local>,
        running: bool,
        eval: &mut Evaluation,
    ) {
        let mut skipped = 0;
        while self.next_break().is_some_and(|b| b.end_time() < now) {
            self.current_break_idx += 1;
            skipped += 1;
        }
        if skipped > 0 {
            log::info!("{}: skipped {} elapsed breaks", agent, skipped);
            eval.dirty = true;
        }

        if running {
            let resumed = self
                .last_seen_running
                .map_or(true, |seen| now - seen > Duration::minutes(RESUME_GAP_MINUTES));
            if resumed {
                log::info!(
                    "{}: running again after a gap, counting from {} played minutes",
                    agent,
                    self.played_minutes
                );
                self.phase_start_time = Some(now);
                self.played_minutes_at_phase_start = self.played_minutes;
            }
            self.last_seen_running = Some(now);

            let elapsed = self
                .phase_start_time
                .map_or(0, |start| (now - start).num_minutes().max(0));
            self.played_minutes = self
                .played_minutes
                .max(self.played_minutes_at_phase_start + elapsed);
            self.last_updated = Some(now);
            eval.dirty = true;
        }

        if let Some(next) = self.next_break().cloned() {
            if now >= next.start_time {
                self.enter_break(agent, &next, now);
                eval.directive = Some(Directive::Stop);
                eval.dirty = true;
                return;
            }
        }

        if self.today_rest_time.is_some_and(|rest| now >= rest) {
            self.enter_resting(agent, now);
            eval.directive = Some(Directive::Stop);
            eval.dirty = true;
        }
    }

    fn evaluate_on_break(&mut self, agent: &str, now: DateTime<Local>, eval: &mut Evaluation) {
        if self.phase_end_time.map_or(true, |end| now >= end) {
            self.current_break_idx += 1;
            self.enter_playing(agent, now);
            eval.directive = Some(Directive::Start);
            eval.dirty = true;
        }
    }

    fn enter_playing(&mut self, agent: &str, now: DateTime<Local>) {
        self.current_phase = Phase::Playing;
        self.phase_start_time = Some(now);
        self.phase_end_time = None;
        self.played_minutes_at_phase_start = self.played_minutes;
        self.last_updated = Some(now);
        log::info!(
            "{}: playing until {}",
            agent,
            self.today_rest_time
                .map(|t| t.format("%H:%M").to_string())
                .unwrap_or_default()
        );
    }

    fn enter_break(&mut self, agent: &str, brk: &ScheduledBreak, now: DateTime<Local>) {
        self.current_phase = Phase::OnBreak;
        self.phase_start_time = Some(now);
        self.phase_end_time = Some(now + Duration::minutes(brk.duration));
        self.last_seen_running = None;
        self.last_updated = Some(now);
        log::info!(
            "{}: taking a {:?} break for {} min",
            agent,
            brk.kind,
            brk.duration
        );
    }

    fn enter_resting(&mut self, agent: &str, now: DateTime<Local>) {
        self.current_phase = Phase::Resting;
        self.phase_start_time = Some(now);
        self.phase_end_time = None;
        self.last_seen_running = None;
        self.last_updated = Some(now);
        log::info!(
            "{}: day complete after {} min of play, resting until tomorrow",
            agent,
            self.played_minutes
        );
    }
}

fn default_wake_time() -> NaiveTime {
    NaiveTime::from_hms_opt(DEFAULT_WAKE_TIME.0, DEFAULT_WAKE_TIME.1, 0).unwrap_or_default()
}

/// One completed day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub date: String,
    pub wake_time: String,
    pub sleep_time: String,
    pub total_play_minutes: i64,
    pub total_break_minutes: i64,
    pub breaks: Vec<ScheduledBreak>,
}

impl HistoryEntry {
    /// `None` when the state never had a planned day.
    pub fn from_state(state: &DurationState) -> Option<Self> {
        let wake = state.today_wake_time?;
        let rest = state.today_rest_time?;
        Some(Self {
            date: wake.format("%Y-%m-%d").to_string(),
            wake_time: wake.format("%H:%M").to_string(),
            sleep_time: rest.format("%H:%M").to_string(),
            total_play_minutes: state.played_minutes,
            total_break_minutes: state.total_break_minutes(),
            breaks: state.scheduled_breaks.clone(),
        })
    }
}

/// Rolling log of completed days, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerHistory {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl SchedulerHistory {
    pub fn push(&mut self, entry: HistoryEntry) {
        self.history.insert(0, entry);
        self.history.truncate(HISTORY_LIMIT);
    }
}
