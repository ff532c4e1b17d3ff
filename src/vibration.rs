// Operator feedback through controller rumble
//
// A model is evaluated every control tick and the resulting intensity is
// published to the operator's controller.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Rumble intensity per side, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VibrationStatus {
    pub left: f64,
    pub right: f64,
}

impl VibrationStatus {
    pub const OFF: VibrationStatus = VibrationStatus {
        left: 0.0,
        right: 0.0,
    };

    pub fn new(left: f64, right: f64) -> Self {
        Self {
            left: left.clamp(0.0, 1.0),
            right: right.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum VibrationModel {
    #[default]
    Off,
    Constant(VibrationStatus),
    /// Constant until `until`, then off
    Timed {
        status: VibrationStatus,
        until: Instant,
    },
    /// Sides alternate between `high` and `low` every half period
    AlternatePulse {
        period: Duration,
        start: Instant,
        low: f64,
        high: f64,
    },
    /// Both sides pulse together, `high` for the first half of each period
    SyncPulse {
        period: Duration,
        start: Instant,
        low: f64,
        high: f64,
    },
}

impl VibrationModel {
    pub fn constant(intensity: f64) -> Self {
        Self::Constant(VibrationStatus::new(intensity, intensity))
    }

    pub fn timed(left: f64, right: f64, duration: Duration, now: Instant) -> Self {
        Self::Timed {
            status: VibrationStatus::new(left, right),
            until: now + duration,
        }
    }

    pub fn alternate_pulse(period: Duration, low: f64, high: f64, now: Instant) -> Self {
        Self::AlternatePulse {
            period,
            start: now,
            low,
            high,
        }
    }

    pub fn sync_pulse(period: Duration, low: f64, high: f64, now: Instant) -> Self {
        Self::SyncPulse {
            period,
            start: now,
            low,
            high,
        }
    }

    pub fn intensity_at(&self, now: Instant) -> VibrationStatus {
        match *self {
            VibrationModel::Off => VibrationStatus::OFF,
            VibrationModel::Constant(status) => status,
            VibrationModel::Timed { status, until } => {
                if now >= until {
                    VibrationStatus::OFF
                } else {
                    status
                }
            }
            VibrationModel::AlternatePulse {
                period,
                start,
                low,
                high,
            } => {
                if first_half(period, start, now) {
                    VibrationStatus::new(high, low)
                } else {
                    VibrationStatus::new(low, high)
                }
            }
            VibrationModel::SyncPulse {
                period,
                start,
                low,
                high,
            } => {
                let level = if first_half(period, start, now) { high } else { low };
                VibrationStatus::new(level, level)
            }
        }
    }
}

fn first_half(period: Duration, start: Instant, now: Instant) -> bool {
    let period_ns = period.as_nanos();
    if period_ns == 0 {
        return true;
    }
    let phase = now.saturating_duration_since(start).as_nanos() % period_ns;
    phase < period_ns / 2
}
