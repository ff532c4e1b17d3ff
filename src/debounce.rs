// Time hysteresis for boolean signals
//
// The filtered value only changes once the raw input has disagreed with it
// continuously for the activation (false -> true) or deactivation
// (true -> false) duration.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TimedDebounce {
    active: bool,
    change_time: Instant,
    activation: Duration,
    deactivation: Duration,
}

impl TimedDebounce {
    pub fn new(activation: Duration, deactivation: Duration) -> Self {
        Self::new_at(activation, deactivation, Instant::now())
    }

    /// Start inactive with the change timer anchored at `now`
    pub fn new_at(activation: Duration, deactivation: Duration, now: Instant) -> Self {
        Self {
            active: false,
            change_time: now,
            activation,
            deactivation,
        }
    }

    /// Feed a raw sample, returning the filtered value
    pub fn update(&mut self, value: bool) -> bool {
        self.update_at(value, Instant::now())
    }

    pub fn update_at(&mut self, value: bool, now: Instant) -> bool {
        if value == self.active {
            self.change_time = now;
        } else {
            let required = if self.active {
                self.deactivation
            } else {
                self.activation
            };
            if now.saturating_duration_since(self.change_time) >= required {
                self.active = value;
                self.change_time = now;
            }
        }
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}
