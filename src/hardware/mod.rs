// Actuator and encoder interface for the swerve platform
//
// Provides:
// - The `SwerveHardware` trait the platform drives (4 drive + 4 steer actuators,
//   4 absolute steering encoders)
// - An in-process simulation backend
// - A bridge backend that exchanges commands and feedback over pub/sub

mod bridge;
mod sim;

pub use bridge::BridgeHardware;
pub use sim::SimHardware;

use serde::{Deserialize, Serialize};

use crate::platform::ModuleIndex;

/// Error types for actuator / encoder access
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HardwareError {
    #[error("Hardware unavailable: {0}")]
    Unavailable(String),

    #[error("No feedback from {module} {device}")]
    NoFeedback {
        module: &'static str,
        device: &'static str,
    },

    #[error("Command rejected by {module} {device}: {reason}")]
    Rejected {
        module: &'static str,
        device: &'static str,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Setpoint for a drive or steering actuator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum ActuatorCommand {
    /// Open-loop output in [-1, 1]
    PercentOutput(f64),
    /// Closed-loop velocity (m/s for drive, deg/s for steering)
    Velocity(f64),
    /// Closed-loop position (degrees, steering only)
    Position(f64),
}

impl ActuatorCommand {
    pub const STOP: ActuatorCommand = ActuatorCommand::PercentOutput(0.0);

    pub fn is_stop(&self) -> bool {
        matches!(self, ActuatorCommand::PercentOutput(v) if *v == 0.0)
    }
}

impl Default for ActuatorCommand {
    fn default() -> Self {
        Self::STOP
    }
}

/// Fault flags reported by an actuator controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Faults {
    pub remote_loss_of_signal: bool,
    pub hardware_failure: bool,
    pub api_error: bool,
    pub under_voltage: bool,
    pub reset_during_enable: bool,
}

impl Faults {
    /// Faults that make the commanded steering angle untrustworthy
    pub fn is_fatal(&self) -> bool {
        self.remote_loss_of_signal || self.hardware_failure || self.api_error
    }
}

/// Measured state of one actuator
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActuatorFeedback {
    /// Degrees for steering, meters travelled for drive
    pub position: f64,
    /// deg/s for steering, m/s for drive
    pub velocity: f64,
    pub faults: Faults,
}

/// The platform's actuators and steering encoders
///
/// Every call reports failure explicitly so the caller can fall back to a
/// safe stop on the same tick.
pub trait SwerveHardware: Send {
    fn set_drive(&mut self, module: ModuleIndex, command: ActuatorCommand) -> Result<()>;

    fn set_steer(&mut self, module: ModuleIndex, command: ActuatorCommand) -> Result<()>;

    fn drive_feedback(&mut self, module: ModuleIndex) -> Result<ActuatorFeedback>;

    /// Steering position is the encoder's running (relative) position
    fn steer_feedback(&mut self, module: ModuleIndex) -> Result<ActuatorFeedback>;

    /// Raw absolute angle of the steering encoder (degrees, [0, 360))
    fn absolute_angle(&mut self, module: ModuleIndex) -> Result<f64>;

    /// Re-zero the encoder so its running position reads `position` right now
    fn set_encoder_position(&mut self, module: ModuleIndex, position: f64) -> Result<()>;
}

impl<H: SwerveHardware + ?Sized> SwerveHardware for Box<H> {
    fn set_drive(&mut self, module: ModuleIndex, command: ActuatorCommand) -> Result<()> {
        (**self).set_drive(module, command)
    }

    fn set_steer(&mut self, module: ModuleIndex, command: ActuatorCommand) -> Result<()> {
        (**self).set_steer(module, command)
    }

    fn drive_feedback(&mut self, module: ModuleIndex) -> Result<ActuatorFeedback> {
        (**self).drive_feedback(module)
    }

    fn steer_feedback(&mut self, module: ModuleIndex) -> Result<ActuatorFeedback> {
        (**self).steer_feedback(module)
    }

    fn absolute_angle(&mut self, module: ModuleIndex) -> Result<f64> {
        (**self).absolute_angle(module)
    }

    fn set_encoder_position(&mut self, module: ModuleIndex, position: f64) -> Result<()> {
        (**self).set_encoder_position(module, position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_faults() {
        assert!(!Faults::default().is_fatal());
        let under_voltage = Faults {
            under_voltage: true,
            ..Default::default()
        };
        assert!(!under_voltage.is_fatal());
        for faults in [
            Faults {
                remote_loss_of_signal: true,
                ..Default::default()
            },
            Faults {
                hardware_failure: true,
                ..Default::default()
            },
            Faults {
                api_error: true,
                ..Default::default()
            },
        ] {
            assert!(faults.is_fatal(), "{:?}", faults);
        }
    }

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_string(&ActuatorCommand::Position(12.5)).unwrap();
        assert_eq!(json, r#"{"mode":"position","value":12.5}"#);
        assert!(ActuatorCommand::STOP.is_stop());
        assert!(!ActuatorCommand::Velocity(0.0).is_stop());
    }
}
