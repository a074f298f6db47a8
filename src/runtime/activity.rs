use std::time::{Duration, Instant};

use crate::types::Position;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IdleVerdict {
    Active,
    Moved(f64),
    Idle(Duration),
}

/// Tracks the last activity instant and the position anchor used to detect
/// an entity that has stopped moving.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    last_activity: Instant,
    anchor: Option<(Position, Instant)>,
}

impl ActivityTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            last_activity: now,
            anchor: None,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn reset(&mut self, now: Instant) {
        self.last_activity = now;
        self.anchor = None;
    }

    /// Compares `position` against the anchor. The anchor only moves when the
    /// entity travelled further than `min_movement`; a missing anchor or a
    /// missing position re-anchors without a verdict of idleness.
    pub fn observe(
        &mut self,
        position: Option<Position>,
        now: Instant,
        min_movement: f64,
        idle_threshold: Duration,
    ) -> IdleVerdict {
        let Some(position) = position else {
            self.anchor = None;
            return IdleVerdict::Active;
        };

        let Some((anchor, since)) = self.anchor else {
            self.anchor = Some((position, now));
            return IdleVerdict::Active;
        };

        let distance = anchor.distance(&position);
        if distance > min_movement {
            self.anchor = Some((position, now));
            self.last_activity = now;
            return IdleVerdict::Moved(distance);
        }

        let still_for = now.saturating_duration_since(since);
        if still_for > idle_threshold {
            IdleVerdict::Idle(still_for)
        } else {
            IdleVerdict::Active
        }
    }
}
