use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::types::AgentName;

pub type SharedConfig = Arc<RwLock<Config>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub agents: BTreeMap<AgentName, AgentConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            api_port: default_api_port(),
            registry: RegistrySettings::default(),
            agents: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(raw)?;
        for (name, agent) in config.agents.iter_mut() {
            agent.scheduler.clamp_limits(name);
        }
        Ok(config)
    }

    /// Loads the file named by `OVERSEER_CONFIG` (default `overseer.yaml`) and
    /// applies `OVERSEER_STATE_DIR` / `OVERSEER_API_PORT` overrides.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("OVERSEER_CONFIG").unwrap_or_else(|_| "overseer.yaml".to_string());
        let mut config = Self::load(&path)?;

        if let Ok(dir) = std::env::var("OVERSEER_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Ok(port) = std::env::var("OVERSEER_API_PORT") {
            config.api_port = port
                .parse()
                .with_context(|| format!("invalid OVERSEER_API_PORT {port}"))?;
        }

        Ok(config)
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.get(name)
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    /// Replaces the shared config in place so running components pick up the
    /// new values on their next read.
    pub fn reload(shared: &SharedConfig, path: impl AsRef<Path>) -> Result<()> {
        let fresh = Self::load(path)?;
        *shared.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        Ok(())
    }
}

pub fn read_config(shared: &SharedConfig) -> std::sync::RwLockReadGuard<'_, Config> {
    shared.read().unwrap_or_else(PoisonError::into_inner)
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("config")
}

fn default_api_port() -> u16 {
    8087
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Delay between stopping a crashed instance and starting it again.
    pub restart_settle_ms: u64,
    /// Poll interval while another token-auth client is starting.
    pub auth_poll_ms: u64,
    pub crash_poll_ms: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            restart_settle_ms: 5000,
            auth_poll_ms: 5000,
            crash_poll_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    None,
    Password,
    Token,
}

impl AuthMethod {
    /// Token logins must never run concurrently with another starting client.
    pub fn requires_exclusive_login(&self) -> bool {
        matches!(self, AuthMethod::Token)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub auth_method: AuthMethod,
    pub client: ClientConfig,
    pub tasks: Vec<TaskConfig>,
    pub randomize_tasks: bool,
    pub kill_client_on_stop: bool,
    pub executor: ExecutorSettings,
    pub session: SessionSettings,
    pub latency: LatencySettings,
    pub scheduler: ScheduleConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub skip_routines: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub tick_min_ms: u64,
    pub tick_max_ms: u64,
    pub idle_threshold_secs: u64,
    pub min_movement: f64,
    pub max_session_secs: Option<u64>,
    pub max_level: Option<u32>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            tick_min_ms: 70,
            tick_max_ms: 130,
            idle_threshold_secs: 120,
            min_movement: 30.0,
            max_session_secs: None,
            max_level: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub menu_timeout_secs: u64,
    pub max_out_of_session_secs: u64,
    pub menu_retry_budget: u32,
    pub exit_timeout_secs: u64,
    pub idle_min_ms: u64,
    pub idle_max_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            menu_timeout_secs: 30,
            max_out_of_session_secs: 180,
            menu_retry_budget: 5,
            exit_timeout_secs: 15,
            idle_min_ms: 4000,
            idle_max_ms: 20000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencySettings {
    pub enabled: bool,
    pub threshold_ms: u32,
    pub sustained_secs: u64,
}

impl Default for LatencySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_ms: 500,
            sustained_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    #[default]
    Simple,
    TimeSlots,
    Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub mode: ScheduleMode,
    /// "HH:MM", local clock.
    pub simple_start_time: String,
    pub simple_stop_time: String,
    pub days: Vec<DaySchedule>,
    pub global_variance_min: i64,
    pub duration: DurationConfig,
}

/// Longest day plan, in hours.
pub const MAX_PLAY_HOURS: i64 = 24;
/// Upper bound for any minute-valued variance or break length.
pub const MAX_MINUTES: i64 = 12 * 60;
pub const MAX_BREAKS_PER_KIND: usize = 24;
/// Upper bound for the jitter multiplier, in percent.
pub const MAX_JITTER_PERCENT: i64 = 500;

fn clamp_value<T>(agent: &str, field: &str, value: &mut T, lo: T, hi: T)
where
    T: Copy + Ord + std::fmt::Display,
{
    let clamped = (*value).clamp(lo, hi);
    if clamped != *value {
        log::warn!("{}: scheduler {} = {} out of range, using {}", agent, field, value, clamped);
        *value = clamped;
    }
}

impl ScheduleConfig {
    /// Pulls every numeric knob into a range the planner can work with.
    pub fn clamp_limits(&mut self, agent: &str) {
        clamp_value(agent, "global_variance_min", &mut self.global_variance_min, 0, MAX_MINUTES);
        for day in &mut self.days {
            for range in &mut day.time_ranges {
                clamp_value(agent, "start_variance_min", &mut range.start_variance_min, 0, MAX_MINUTES);
                clamp_value(agent, "end_variance_min", &mut range.end_variance_min, 0, MAX_MINUTES);
            }
        }

        let d = &mut self.duration;
        clamp_value(agent, "wake_up_variance", &mut d.wake_up_variance, 0, MAX_MINUTES);
        clamp_value(agent, "play_hours", &mut d.play_hours, 1, MAX_PLAY_HOURS);
        clamp_value(agent, "play_hours_variance", &mut d.play_hours_variance, 0, MAX_PLAY_HOURS);
        clamp_value(agent, "meal_break_count", &mut d.meal_break_count, 0, MAX_BREAKS_PER_KIND);
        clamp_value(agent, "meal_break_duration", &mut d.meal_break_duration, 1, MAX_MINUTES);
        clamp_value(agent, "meal_break_variance", &mut d.meal_break_variance, 0, MAX_MINUTES);
        clamp_value(agent, "short_break_count", &mut d.short_break_count, 0, MAX_BREAKS_PER_KIND);
        clamp_value(agent, "short_break_duration", &mut d.short_break_duration, 1, MAX_MINUTES);
        clamp_value(agent, "short_break_variance", &mut d.short_break_variance, 0, MAX_MINUTES);
        clamp_value(agent, "break_timing_variance", &mut d.break_timing_variance, 0, MAX_MINUTES);
        clamp_value(agent, "jitter_min", &mut d.jitter_min, 0, MAX_JITTER_PERCENT);
        clamp_value(agent, "jitter_max", &mut d.jitter_max, 0, MAX_JITTER_PERCENT);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaySchedule {
    /// 0 = Sunday.
    pub day_of_week: u32,
    #[serde(default)]
    pub time_ranges: Vec<TimeRangeConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeRangeConfig {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub start_variance_min: i64,
    #[serde(default)]
    pub end_variance_min: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationConfig {
    pub wake_up_time: String,
    pub wake_up_variance: i64,
    pub play_hours: i64,
    pub play_hours_variance: i64,
    pub meal_break_count: usize,
    pub meal_break_duration: i64,
    pub meal_break_variance: i64,
    pub short_break_count: usize,
    pub short_break_duration: i64,
    pub short_break_variance: i64,
    pub break_timing_variance: i64,
    /// Jitter multiplier bounds in percent.
    pub jitter_min: i64,
    pub jitter_max: i64,
}

impl Default for DurationConfig {
    fn default() -> Self {
        Self {
            wake_up_time: "08:00".to_string(),
            wake_up_variance: 0,
            play_hours: 8,
            play_hours_variance: 0,
            meal_break_count: 0,
            meal_break_duration: 30,
            meal_break_variance: 0,
            short_break_count: 0,
            short_break_duration: 8,
            short_break_variance: 0,
            break_timing_variance: 0,
            jitter_min: 0,
            jitter_max: 0,
        }
    }
}
