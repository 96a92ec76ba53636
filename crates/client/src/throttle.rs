use std::time::{Duration, Instant};

use glam::Vec3;

/// Client-side rate limit for `RecordMove`.
///
/// A move is dropped only when it is both too soon after the last sent move
/// and too close to it; any other move goes out and becomes the new reference.
#[derive(Debug, Clone)]
pub struct MoveThrottle {
    interval: Duration,
    epsilon_sq: f32,
    last: Option<(Instant, Vec3)>,
}

impl MoveThrottle {
    pub fn new(interval: Duration, epsilon: f32) -> Self {
        Self {
            interval,
            epsilon_sq: epsilon * epsilon,
            last: None,
        }
    }

    pub fn should_send(&mut self, now: Instant, position: Vec3) -> bool {
        if let Some((sent_at, sent_pos)) = self.last {
            let too_soon = now.saturating_duration_since(sent_at) < self.interval;
            if too_soon && position.distance_squared(sent_pos) < self.epsilon_sq {
                return false;
            }
        }
        self.last = Some((now, position));
        true
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
