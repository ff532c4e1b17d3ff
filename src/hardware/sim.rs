// In-process swerve hardware model
//
// Steering follows position setpoints instantly, drive velocity tracks percent
// output, and each absolute encoder reads the mechanical angle plus a mounting
// offset. Used by the `--simulate` runtime mode and by tests.

use tracing::debug;

use super::{ActuatorCommand, ActuatorFeedback, Faults, HardwareError, Result, SwerveHardware};
use crate::platform::{ModuleIndex, ModuleSet};

#[derive(Debug, Clone, Copy, Default)]
struct SimModule {
    drive: ActuatorCommand,
    steer: ActuatorCommand,
    /// Wheel heading, continuous (degrees)
    mechanical_angle: f64,
    /// Absolute encoder reading when the wheel points forward
    mount_offset: f64,
    /// Mechanical angle at which the running position reads zero
    encoder_zero: f64,
    drive_velocity: f64,
    drive_faults: Faults,
    steer_faults: Faults,
}

impl SimModule {
    fn relative_position(&self) -> f64 {
        self.mechanical_angle - self.encoder_zero
    }
}

/// Simulated actuators and encoders for all four modules
#[derive(Debug, Clone)]
pub struct SimHardware {
    modules: ModuleSet<SimModule>,
    max_velocity: f64,
    available: bool,
    command_count: usize,
}

impl SimHardware {
    /// Create a simulation whose drives reach `max_velocity` (m/s) at full output
    pub fn new(max_velocity: f64) -> Self {
        Self {
            modules: ModuleSet::default(),
            max_velocity,
            available: true,
            command_count: 0,
        }
    }

    /// Set the absolute reading of each encoder when its wheel points forward
    pub fn with_mount_offsets(mut self, offsets: ModuleSet<f64>) -> Self {
        for (m, &offset) in offsets.iter() {
            self.modules[m].mount_offset = offset;
        }
        self
    }

    /// Rotate a wheel by hand (does not move the encoder zero)
    pub fn set_mechanical_angle(&mut self, module: ModuleIndex, angle: f64) {
        self.modules[module].mechanical_angle = angle;
    }

    pub fn mechanical_angle(&self, module: ModuleIndex) -> f64 {
        self.modules[module].mechanical_angle
    }

    pub fn set_steer_faults(&mut self, module: ModuleIndex, faults: Faults) {
        self.modules[module].steer_faults = faults;
    }

    pub fn set_drive_faults(&mut self, module: ModuleIndex, faults: Faults) {
        self.modules[module].drive_faults = faults;
    }

    /// Make every call fail with `HardwareError::Unavailable`
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    pub fn last_drive(&self, module: ModuleIndex) -> ActuatorCommand {
        self.modules[module].drive
    }

    pub fn last_steer(&self, module: ModuleIndex) -> ActuatorCommand {
        self.modules[module].steer
    }

    /// Running encoder position as the steering controller sees it
    pub fn encoder_position(&self, module: ModuleIndex) -> f64 {
        self.modules[module].relative_position()
    }

    /// Number of actuator commands accepted so far
    pub fn command_count(&self) -> usize {
        self.command_count
    }

    fn check_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(HardwareError::Unavailable("simulated bus offline".to_string()))
        }
    }
}

impl SwerveHardware for SimHardware {
    fn set_drive(&mut self, module: ModuleIndex, command: ActuatorCommand) -> Result<()> {
        self.check_available()?;
        let max_velocity = self.max_velocity;
        let state = &mut self.modules[module];
        state.drive_velocity = match command {
            ActuatorCommand::PercentOutput(p) => p.clamp(-1.0, 1.0) * max_velocity,
            ActuatorCommand::Velocity(v) => v,
            ActuatorCommand::Position(_) => {
                return Err(HardwareError::Rejected {
                    module: module.name(),
                    device: "drive",
                    reason: "position mode not supported on drive".to_string(),
                });
            }
        };
        state.drive = command;
        self.command_count += 1;
        Ok(())
    }

    fn set_steer(&mut self, module: ModuleIndex, command: ActuatorCommand) -> Result<()> {
        self.check_available()?;
        let state = &mut self.modules[module];
        if let ActuatorCommand::Position(setpoint) = command {
            let relative = state.relative_position();
            state.mechanical_angle += setpoint - relative;
        }
        state.steer = command;
        self.command_count += 1;
        debug!("sim {} steer {:?}", module.name(), command);
        Ok(())
    }

    fn drive_feedback(&mut self, module: ModuleIndex) -> Result<ActuatorFeedback> {
        self.check_available()?;
        let state = &self.modules[module];
        Ok(ActuatorFeedback {
            position: 0.0,
            velocity: state.drive_velocity,
            faults: state.drive_faults,
        })
    }

    fn steer_feedback(&mut self, module: ModuleIndex) -> Result<ActuatorFeedback> {
        self.check_available()?;
        let state = &self.modules[module];
        Ok(ActuatorFeedback {
            position: state.relative_position(),
            velocity: 0.0,
            faults: state.steer_faults,
        })
    }

    fn absolute_angle(&mut self, module: ModuleIndex) -> Result<f64> {
        self.check_available()?;
        let state = &self.modules[module];
        Ok((state.mechanical_angle + state.mount_offset).rem_euclid(360.0))
    }

    fn set_encoder_position(&mut self, module: ModuleIndex, position: f64) -> Result<()> {
        self.check_available()?;
        let state = &mut self.modules[module];
        state.encoder_zero = state.mechanical_angle - position;
        Ok(())
    }
}
