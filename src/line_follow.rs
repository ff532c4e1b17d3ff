// Line following on top of the swerve platform
//
// Runs once per control tick while line-follow mode is held. A full-width
// reading marks a course boundary: the first one in a direction is driven
// across, the second one in the same direction ends the run.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::hardware::SwerveHardware;
use crate::line_sensor::LineIntensity;
use crate::platform::{self, ChassisVelocityCommand, SwervePlatform, Translation2d};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineFollowConfig {
    /// Forward speed while tracking, fraction of max velocity
    pub nominal_speed: f64,
    /// Rotation per unit of line error, fraction of max rotation rate
    pub turn_gain: f64,
    /// All channels below this: line lost
    pub lost_threshold: f64,
    /// All channels above this: full-width line
    pub full_threshold: f64,
    /// Lateral offset of the rotation center (m, positive right)
    pub rotation_offset: f64,
}

impl Default for LineFollowConfig {
    fn default() -> Self {
        Self {
            nominal_speed: 0.15,
            turn_gain: 0.15,
            lost_threshold: 0.05,
            full_threshold: 0.5,
            rotation_offset: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowDirection {
    Forward,
    Reverse,
}

impl FollowDirection {
    /// Direction requested by the two buttons; none when both or neither
    pub fn from_request(forward: bool, reverse: bool) -> Option<Self> {
        match (forward, reverse) {
            (true, false) => Some(Self::Forward),
            (false, true) => Some(Self::Reverse),
            _ => None,
        }
    }

    fn sign(self) -> f64 {
        match self {
            Self::Forward => 1.0,
            Self::Reverse => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowState {
    #[default]
    Normal,
    /// On or just across a full-width line
    EndStop,
    /// Tracking resumed past the end line in the end direction; held stopped
    PastEnd,
}

#[derive(Debug, Clone, Default)]
pub struct LineFollowController {
    config: LineFollowConfig,
    state: FollowState,
    direction: Option<FollowDirection>,
}

impl LineFollowController {
    pub fn new(config: LineFollowConfig) -> Self {
        Self {
            config,
            state: FollowState::Normal,
            direction: None,
        }
    }

    pub fn state(&self) -> FollowState {
        self.state
    }

    /// Direction latched by the last tracking tick
    pub fn direction(&self) -> Option<FollowDirection> {
        self.direction
    }

    /// Line-follow mode was released
    pub fn reset(&mut self) {
        if self.state != FollowState::Normal {
            debug!("Line follow reset from {:?}", self.state);
        }
        self.state = FollowState::Normal;
    }

    pub fn line_follow<H: SwerveHardware>(
        &mut self,
        platform: &mut SwervePlatform<H>,
        forward_requested: bool,
        reverse_requested: bool,
        intensity: Option<LineIntensity>,
    ) -> platform::Result<()> {
        let requested = FollowDirection::from_request(forward_requested, reverse_requested);

        let (requested, intensity) = match (requested, intensity) {
            (Some(requested), Some(intensity))
                if !intensity.all_below(self.config.lost_threshold) =>
            {
                (requested, intensity)
            }
            _ => {
                self.state = FollowState::Normal;
                return platform.stop();
            }
        };

        if intensity.all_above(self.config.full_threshold) {
            if self.direction == Some(requested) {
                if self.state != FollowState::EndStop {
                    info!("End of line reached ({:?})", requested);
                }
                self.state = FollowState::EndStop;
                return platform.stop();
            }
            // Crossing the start line, or leaving the end line the other way
            self.state = FollowState::EndStop;
            return platform.drive(
                ChassisVelocityCommand::new(self.config.nominal_speed * requested.sign(), 0.0, 0.0),
                Translation2d::ORIGIN,
            );
        }

        match self.state {
            FollowState::EndStop | FollowState::PastEnd if self.direction == Some(requested) => {
                self.state = FollowState::PastEnd;
                return platform.stop();
            }
            FollowState::EndStop | FollowState::PastEnd => {
                debug!("Line follow resuming {:?}", requested);
                self.state = FollowState::Normal;
            }
            FollowState::Normal => {}
        }

        self.direction = Some(requested);
        platform.drive(
            self.steering(&intensity, requested),
            Translation2d::new(0.0, self.config.rotation_offset),
        )
    }

    /// Tracking command for a partial line reading
    pub fn steering(
        &self,
        intensity: &LineIntensity,
        direction: FollowDirection,
    ) -> ChassisVelocityCommand {
        let lost = self.config.lost_threshold;
        // Positive rotation is clockwise; a line under the left channel needs a left turn
        let error = if intensity.left > lost {
            -(intensity.left + (intensity.left - intensity.center).clamp(0.0, 1.0))
        } else if intensity.right > lost {
            intensity.right + (intensity.right - intensity.center).clamp(0.0, 1.0)
        } else {
            0.0
        };

        ChassisVelocityCommand::new(
            self.config.nominal_speed * direction.sign(),
            0.0,
            self.config.turn_gain * error * direction.sign(),
        )
    }
}
