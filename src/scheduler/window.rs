use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, TimeZone};

use super::offset::deterministic_offset;
use crate::config::ScheduleConfig;

/// Parses a wall-clock "HH:MM" string.
pub fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// `time` on `date` in the local zone. Inside a DST gap the first valid
/// instant after it is used.
pub fn local_at(date: NaiveDate, time: NaiveTime) -> DateTime<Local> {
    let naive = date.and_time(time);
    Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .unwrap_or_else(|| Local.from_utc_datetime(&naive))
}

/// Whether `now` lies in `[start, stop)`. A `stop` not after `start` wraps
/// past midnight.
pub fn simple_window_contains<Tz: TimeZone>(
    now: &DateTime<Tz>,
    start: &DateTime<Tz>,
    stop: &DateTime<Tz>,
) -> bool {
    if stop > start {
        now >= start && now < stop
    } else {
        now >= start || now < stop
    }
}

/// Daily `[start, stop)` window of simple mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleWindow {
    pub start: NaiveTime,
    pub stop: NaiveTime,
}

impl SimpleWindow {
    pub fn from_config(schedule: &ScheduleConfig) -> Option<Self> {
        Some(Self {
            start: parse_hhmm(&schedule.simple_start_time)?,
            stop: parse_hhmm(&schedule.simple_stop_time)?,
        })
    }

    pub fn contains(&self, now: &DateTime<Local>) -> bool {
        let today = now.date_naive();
        simple_window_contains(now, &local_at(today, self.start), &local_at(today, self.stop))
    }

    /// The next start strictly after `now`, or `None` while inside the window.
    pub fn next_start(&self, now: &DateTime<Local>) -> Option<DateTime<Local>> {
        if self.contains(now) {
            return None;
        }
        let today = now.date_naive();
        let start = local_at(today, self.start);
        if start > *now {
            return Some(start);
        }
        today.succ_opt().map(|tomorrow| local_at(tomorrow, self.start))
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.start.format("%H:%M"), self.stop.format("%H:%M"))
    }
}

/// One time-slot range after its deterministic daily offsets were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitteredRange {
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
}

impl JitteredRange {
    pub fn contains(&self, now: &DateTime<Local>) -> bool {
        simple_window_contains(now, &self.start, &self.end)
    }

    pub fn label(&self) -> String {
        format!("{} - {}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// Time-slot ranges configured for `date`'s weekday, in configuration order.
/// Ranges with unparsable times are skipped.
pub fn ranges_on(agent: &str, schedule: &ScheduleConfig, date: NaiveDate) -> Vec<JitteredRange> {
    let weekday = date.weekday().num_days_from_sunday();
    let mut ranges = Vec::new();

    for day in schedule.days.iter().filter(|d| d.day_of_week == weekday) {
        for range in &day.time_ranges {
            let (Some(start), Some(end)) = (parse_hhmm(&range.start), parse_hhmm(&range.end)) else {
                log::warn!(
                    "{}: invalid time range {}-{}, skipping",
                    agent,
                    range.start,
                    range.end
                );
                continue;
            };

            let start_variance = non_zero_or(range.start_variance_min, schedule.global_variance_min);
            let end_variance = non_zero_or(range.end_variance_min, schedule.global_variance_min);
            let start_offset = deterministic_offset(agent, date, "start", start_variance);
            let end_offset = deterministic_offset(agent, date, "end", end_variance);

            ranges.push(JitteredRange {
                start: local_at(date, start) + Duration::minutes(start_offset),
                end: local_at(date, end) + Duration::minutes(end_offset),
            });
        }
    }
    ranges
}

fn non_zero_or(value: i64, fallback: i64) -> i64 {
    if value == 0 {
        fallback
    } else {
        value
    }
}
