use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::DurationConfig;

/// Offsets into the play session (minutes) meal breaks gravitate to.
pub const IDEAL_MEAL_OFFSETS: [i64; 2] = [240, 660];

const DEFAULT_JITTER_MIN: i64 = 50;
const DEFAULT_JITTER_MAX: i64 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakKind {
    Meal,
    Short,
}

/// A break relative to the start of the play session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedBreak {
    pub kind: BreakKind,
    pub start_minute: i64,
    pub duration_minutes: i64,
}

impl PlannedBreak {
    pub fn end_minute(&self) -> i64 {
        self.start_minute + self.duration_minutes
    }
}

/// Scales `variance` by a random multiplier drawn from
/// `[jitter_min%, jitter_max%]`. With both bounds at zero the variance is
/// returned untouched; a single zero bound falls back to 50% or 150%.
pub fn apply_jitter(variance: i64, jitter_min: i64, jitter_max: i64, rng: &mut impl Rng) -> i64 {
    if jitter_min == 0 && jitter_max == 0 {
        return variance;
    }
    let lo = non_zero(jitter_min, DEFAULT_JITTER_MIN) as f64 / 100.0;
    let hi = non_zero(jitter_max, DEFAULT_JITTER_MAX) as f64 / 100.0;
    let multiplier = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
    (variance as f64 * multiplier) as i64
}

fn non_zero(value: i64, fallback: i64) -> i64 {
    if value == 0 {
        fallback
    } else {
        value
    }
}

/// Uniform integer in `[lo, hi]`, or `lo` when the range is empty.
pub fn random_in_range(lo: i64, hi: i64, rng: &mut impl Rng) -> i64 {
    if lo >= hi {
        return lo;
    }
    rng.gen_range(lo..=hi)
}

/// Symmetric jitter in `[-variance, variance]`.
fn symmetric(variance: i64, rng: &mut impl Rng) -> i64 {
    let variance = variance.abs();
    random_in_range(-variance, variance, rng)
}

/// Lays meal and short breaks over a play session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakPlanner {
    pub meal_count: usize,
    pub meal_duration: i64,
    pub meal_variance: i64,
    pub short_count: usize,
    pub short_duration: i64,
    pub short_variance: i64,
    pub timing_variance: i64,
    pub jitter_min: i64,
    pub jitter_max: i64,
}

impl From<&DurationConfig> for BreakPlanner {
    fn from(cfg: &DurationConfig) -> Self {
        Self {
            meal_count: cfg.meal_break_count,
            meal_duration: cfg.meal_break_duration,
            meal_variance: cfg.meal_break_variance,
            short_count: cfg.short_break_count,
            short_duration: cfg.short_break_duration,
            short_variance: cfg.short_break_variance,
            timing_variance: cfg.break_timing_variance,
            jitter_min: cfg.jitter_min,
            jitter_max: cfg.jitter_max,
        }
    }
}

impl BreakPlanner {
    pub fn jitter(&self, variance: i64, rng: &mut impl Rng) -> i64 {
        apply_jitter(variance, self.jitter_min, self.jitter_max, rng)
    }

    /// Plans breaks for `play_hours` of play, sorted by start.
    ///
    /// Every break ends no later than `play_hours * 60` minutes into the
    /// session; a slot pushed past either edge by timing jitter is pulled back
    /// inside.
    pub fn plan(&self, play_hours: i64, rng: &mut impl Rng) -> Vec<PlannedBreak> {
        let total = self.meal_count + self.short_count;
        if total == 0 {
            return Vec::new();
        }

        let total_minutes = play_hours.max(1) * 60;
        let segment = total_minutes / (total as i64 + 1);

        let mut slots = Vec::with_capacity(total);
        for i in 1..=total {
            let variance = self.jitter(self.timing_variance, rng);
            slots.push(segment * i as i64 + symmetric(variance, rng));
        }
        slots.sort_unstable();

        let meals = pick_meal_slots(&slots, self.meal_count);

        let mut breaks = Vec::with_capacity(total);
        for (i, &slot) in slots.iter().enumerate() {
            let (kind, base, variance) = if meals.contains(&i) {
                (BreakKind::Meal, self.meal_duration, self.meal_variance)
            } else {
                (BreakKind::Short, self.short_duration, self.short_variance)
            };
            let variance = self.jitter(variance, rng);
            let duration = (base + symmetric(variance, rng)).max(1).min(total_minutes);
            breaks.push(PlannedBreak {
                kind,
                start_minute: slot.clamp(0, total_minutes - duration),
                duration_minutes: duration,
            });
        }
        breaks.sort_by_key(|b| b.start_minute);
        breaks
    }
}

/// Indices of the slots closest to each ideal meal offset, claimed greedily.
/// Ties go to the earlier slot.
pub fn pick_meal_slots(slots: &[i64], meal_count: usize) -> Vec<usize> {
    let mut picked: Vec<usize> = Vec::new();
    for ideal in IDEAL_MEAL_OFFSETS {
        if picked.len() >= meal_count {
            break;
        }
        let closest = slots
            .iter()
            .enumerate()
            .filter(|(i, _)| !picked.contains(i))
            .fold(None::<(usize, i64)>, |best, (i, &slot)| {
                let distance = (slot - ideal).abs();
                match best {
                    Some((_, d)) if d <= distance => best,
                    _ => Some((i, distance)),
                }
            });
        match closest {
            Some((i, _)) => picked.push(i),
            None => break,
        }
    }
    picked
}
