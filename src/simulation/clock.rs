use std::time::Instant;

use crate::config::MAX_FRAME_DT;

/// Per-frame delta time, clamped so a long pause is absorbed as one short step.
pub struct FrameClock {
    last_update: Instant,
    last_dt: f32,
}

impl FrameClock {
    pub fn new(now: Instant) -> Self {
        Self {
            last_update: now,
            last_dt: 0.0,
        }
    }

    /// Advance to `now` and return the step size in seconds, in `[0, MAX_FRAME_DT]`
    pub fn tick(&mut self, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f32();
        self.last_update = now;
        self.last_dt = elapsed.clamp(0.0, MAX_FRAME_DT);
        self.last_dt
    }

    pub fn last_dt(&self) -> f32 {
        self.last_dt
    }
}
