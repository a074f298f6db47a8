use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::LatencySettings;

/// Readings below this are treated as a measurement glitch.
const MIN_PLAUSIBLE_MS: u32 = 10;
const GLITCH_SUBSTITUTE_MS: u32 = 50;
const HISTORY_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyVerdict {
    Normal,
    Elevated { latency_ms: u32, since: Duration },
    Sustained { latency_ms: u32, since: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct LatencySample {
    pub at: Instant,
    pub latency_ms: u32,
}

/// Detects latency staying above a threshold for a sustained period.
#[derive(Debug, Clone)]
pub struct LatencyMonitor {
    pub threshold_ms: u32,
    pub sustained: Duration,
    pub check_interval: Duration,
    high_since: Option<Instant>,
    last_check: Option<Instant>,
    history: VecDeque<LatencySample>,
}

impl LatencyMonitor {
    pub fn new(threshold_ms: u32, sustained: Duration) -> Self {
        Self {
            threshold_ms,
            sustained,
            check_interval: Duration::from_secs(2),
            high_since: None,
            last_check: None,
            history: VecDeque::new(),
        }
    }

    pub fn from_settings(settings: &LatencySettings) -> Option<Self> {
        settings.enabled.then(|| {
            Self::new(
                settings.threshold_ms,
                Duration::from_secs(settings.sustained_secs),
            )
        })
    }

    /// Whether enough time passed since the previous reading.
    pub fn due(&self, now: Instant) -> bool {
        self.last_check
            .map_or(true, |last| now.saturating_duration_since(last) >= self.check_interval)
    }

    pub fn record(&mut self, reading_ms: u32, now: Instant) -> LatencyVerdict {
        let latency_ms = if reading_ms < MIN_PLAUSIBLE_MS {
            GLITCH_SUBSTITUTE_MS
        } else {
            reading_ms
        };

        self.last_check = Some(now);
        self.history.push_back(LatencySample { at: now, latency_ms });
        if self.history.len() > HISTORY_LEN {
            self.history.pop_front();
        }

        if latency_ms <= self.threshold_ms {
            self.high_since = None;
            return LatencyVerdict::Normal;
        }

        let since = now.saturating_duration_since(*self.high_since.get_or_insert(now));
        if since >= self.sustained {
            LatencyVerdict::Sustained { latency_ms, since }
        } else {
            LatencyVerdict::Elevated { latency_ms, since }
        }
    }

    pub fn average_ms(&self, window: usize) -> Option<u32> {
        let recent: Vec<_> = self.history.iter().rev().take(window).collect();
        if recent.is_empty() {
            return None;
        }
        let sum: u64 = recent.iter().map(|s| s.latency_ms as u64).sum();
        Some((sum / recent.len() as u64) as u32)
    }
}

impl Default for LatencyMonitor {
    fn default() -> Self {
        Self::new(500, Duration::from_secs(30))
    }
}
