use std::f64::consts::PI;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Offset in minutes for `(agent, date, context)`, drawn from
/// Normal(0, variance/2) and clamped to `±variance`.
///
/// The generator is seeded from the inputs only, so the same agent gets the
/// same offset all day and across restarts, while different days and agents
/// drift apart.
pub fn deterministic_offset(agent: &str, date: NaiveDate, context: &str, variance: i64) -> i64 {
    let variance = variance.abs();
    if variance == 0 {
        return 0;
    }

    let key = format!("{}{}{}", agent, date.format("%Y-%m-%d"), context);
    let seed = key
        .chars()
        .fold(0i64, |acc, c| acc.wrapping_mul(31).wrapping_add(c as i64));

    let mut rng = StdRng::seed_from_u64(seed as u64);
    let u1: f64 = rng.gen::<f64>().max(1e-10);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();

    let offset = (z * variance as f64 / 2.0).round() as i64;
    offset.clamp(-variance, variance)
}
