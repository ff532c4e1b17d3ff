// Swerve platform: kinematics, module optimization and actuator dispatch
//
// Combines the inverse kinematics model, the hardware interface and the home
// position store to provide a simple drive / stop / home API.

pub mod kinematics;
mod module;

pub use kinematics::{
    ChassisVelocityCommand, GeometryError, ModuleInset, ModuleState, PlatformCommand,
    PlatformDimensions, SwerveKinematics, Translation2d,
};
pub use module::{ModuleIndex, ModuleSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::hardware::{ActuatorCommand, HardwareError, SwerveHardware};
use crate::homing::{CalibrationOffsets, HomingError, HomingStore};
use kinematics::{continuous_setpoint, wrap_degrees};

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Home position storage error: {0}")]
    Homing(#[from] HomingError),

    #[error("Invalid platform geometry: {0}")]
    Geometry(#[from] GeometryError),

    #[error("No stored home positions, platform is uncalibrated")]
    NoCalibration,

    #[error("Platform is not calibrated, refusing to drive")]
    NotCalibrated,

    #[error("Field-centric control requires an orientation sensor and is not supported")]
    FieldCentricUnsupported,
}

pub type Result<T> = std::result::Result<T, PlatformError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Commands are in the platform's own frame
    RobotCentric,
    /// Commands are in the field frame (needs heading, not available)
    FieldCentric,
}

/// Four-module swerve platform
pub struct SwervePlatform<H: SwerveHardware> {
    hardware: H,
    homing: Box<dyn HomingStore>,
    kinematics: SwerveKinematics,
    control_mode: ControlMode,
    calibrated: bool,
    calibration_pending: bool,
}

impl<H: SwerveHardware> SwervePlatform<H> {
    /// Build the platform and apply any stored home positions
    ///
    /// A missing or unreadable calibration is logged as an error and leaves the
    /// platform uncalibrated; it does not fail construction. If the encoders
    /// cannot be read yet, the load is left pending for a later
    /// `initialize_turn_encoder_angles` call.
    pub fn new(
        dimensions: &PlatformDimensions,
        max_velocity: f64,
        homing: Box<dyn HomingStore>,
        hardware: H,
    ) -> Result<Self> {
        let kinematics = SwerveKinematics::new(dimensions, max_velocity)?;
        info!(
            "Swerve platform: max velocity {:.3} m/s, max rotation {:.1} deg/s",
            kinematics.max_velocity(),
            kinematics.max_angular_rate()
        );

        let mut platform = Self {
            hardware,
            homing,
            kinematics,
            control_mode: ControlMode::RobotCentric,
            calibrated: false,
            calibration_pending: false,
        };

        match platform.initialize_turn_encoder_angles() {
            Ok(()) => {}
            Err(PlatformError::Hardware(e)) => {
                info!("Steering calibration waiting for encoders: {}", e);
            }
            Err(e) => error!("Steering calibration not applied: {}", e),
        }

        Ok(platform)
    }

    /// Load the home positions and re-zero each steering encoder against them
    ///
    /// A hardware error leaves the load pending; see `calibration_pending`.
    pub fn initialize_turn_encoder_angles(&mut self) -> Result<()> {
        let result = self.apply_stored_homes();
        self.calibration_pending = matches!(result, Err(PlatformError::Hardware(_)));
        result
    }

    fn apply_stored_homes(&mut self) -> Result<()> {
        self.calibrated = false;

        let homes = self.homing.load()?.ok_or(PlatformError::NoCalibration)?;

        let positions = ModuleSet::try_from_fn(|m| {
            let absolute = self.hardware.absolute_angle(m)?;
            Ok::<_, HardwareError>(wrap_degrees(absolute - homes[m]))
        })?;

        for (m, &position) in positions.iter() {
            self.hardware.set_encoder_position(m, position)?;
            debug!("{} steering starts at {:.2} deg", m.name(), position);
        }

        self.calibrated = true;
        info!("Steering calibration applied");
        Ok(())
    }

    /// Record the current wheel alignment as `reference` and persist it
    ///
    /// Each stored offset is `absolute + reference`, and the running encoders
    /// are re-zeroed to `reference`. Reloading those offsets later yields
    /// `-reference` at the same wheel angle, so the session and the reloaded
    /// origin agree only for a zero reference (the runtime homes at 0).
    ///
    /// The encoders are re-zeroed even if persisting fails, so the current
    /// session stays calibrated; the storage error is still returned.
    pub fn home(&mut self, reference: f64) -> Result<CalibrationOffsets> {
        let offsets = ModuleSet::try_from_fn(|m| {
            let absolute = self.hardware.absolute_angle(m)?;
            Ok::<_, HardwareError>((absolute + reference).rem_euclid(360.0))
        })?;

        for m in ModuleIndex::ALL {
            self.hardware.set_encoder_position(m, reference)?;
        }
        self.calibrated = true;
        self.calibration_pending = false;
        info!("Homed all modules at {:.1} deg: {:?}", reference, offsets);

        if let Err(e) = self.homing.save(&offsets) {
            error!("Home positions not saved: {}", e);
            return Err(e.into());
        }
        Ok(offsets)
    }

    pub fn set_control_mode(&mut self, mode: ControlMode) {
        match mode {
            ControlMode::FieldCentric => info!("Switching to field-centric control"),
            ControlMode::RobotCentric => info!("Switching to robot-centric control"),
        }
        self.control_mode = mode;
    }

    pub fn control_mode(&self) -> ControlMode {
        self.control_mode
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Stored homes could not be applied because the encoders were unreadable
    pub fn calibration_pending(&self) -> bool {
        self.calibration_pending
    }

    pub fn kinematics(&self) -> &SwerveKinematics {
        &self.kinematics
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    /// Drive with fractional commands about the platform center
    ///
    /// # Arguments
    /// * `forward` - Forward fraction of max velocity
    /// * `lateral` - Rightward fraction of max velocity
    /// * `rotation` - Clockwise fraction of max rotation rate
    pub fn swerve_drive(&mut self, forward: f64, lateral: f64, rotation: f64) -> Result<()> {
        self.drive(
            ChassisVelocityCommand::new(forward, lateral, rotation),
            Translation2d::ORIGIN,
        )
    }

    /// Drive with fractional commands about an arbitrary center of rotation
    ///
    /// Any failure leaves the platform commanded to stop.
    pub fn drive(&mut self, command: ChassisVelocityCommand, center: Translation2d) -> Result<()> {
        if command.is_zero() {
            return self.stop();
        }

        let result = self.try_drive(command, center);
        if result.is_err() {
            let _ = self.stop();
        }
        result
    }

    fn try_drive(&mut self, command: ChassisVelocityCommand, center: Translation2d) -> Result<()> {
        if !self.calibrated {
            return Err(PlatformError::NotCalibrated);
        }
        if self.control_mode == ControlMode::FieldCentric {
            return Err(PlatformError::FieldCentricUnsupported);
        }

        let steer = ModuleSet::try_from_fn(|m| self.hardware.steer_feedback(m))?;
        let drive = ModuleSet::try_from_fn(|m| self.hardware.drive_feedback(m))?;
        let measured = steer.map(|feedback| feedback.position);

        let states = match self
            .kinematics
            .compute_module_commands(command, &measured, center)
        {
            PlatformCommand::Stop => return self.stop(),
            PlatformCommand::Drive(states) => states,
        };

        let max_velocity = self.kinematics.max_velocity();
        for m in ModuleIndex::ALL {
            let state = states[m];
            let steer_faults = steer[m].faults;
            let drive_faults = drive[m].faults;
            let drive_output = if steer_faults.is_fatal() {
                warn!("{} steering fault {:?}, holding drive", m.name(), steer_faults);
                0.0
            } else if drive_faults.is_fatal() {
                warn!("{} drive fault {:?}, holding drive", m.name(), drive_faults);
                0.0
            } else {
                (state.speed / max_velocity).clamp(-1.0, 1.0)
            };
            let setpoint = continuous_setpoint(state.angle, measured[m]);

            debug!(
                "{}: target {:.2} m/s @ {:.1} deg, output {:.3}, steer {:.1}",
                m.name(),
                state.speed,
                state.angle,
                drive_output,
                setpoint
            );

            self.hardware
                .set_drive(m, ActuatorCommand::PercentOutput(drive_output))?;
            self.hardware
                .set_steer(m, ActuatorCommand::Position(setpoint))?;
        }

        Ok(())
    }

    /// Zero output on all eight actuators
    ///
    /// Every actuator is attempted even if an earlier one fails.
    pub fn stop(&mut self) -> Result<()> {
        let mut first_error = None;
        for m in ModuleIndex::ALL {
            for result in [
                self.hardware.set_drive(m, ActuatorCommand::STOP),
                self.hardware.set_steer(m, ActuatorCommand::STOP),
            ] {
                if let Err(e) = result {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl<H: SwerveHardware> Drop for SwervePlatform<H> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop platform on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{Faults, SimHardware};
    use crate::homing::MemoryHomingStore;

    const MAX_VELOCITY: f64 = 0.6;
    const MOUNT: [f64; 4] = [17.0, 250.0, 301.5, 5.0];

    fn dimensions() -> PlatformDimensions {
        let inset = ModuleInset {
            lateral_inset: 0.17,
            longitudinal_inset: 0.13,
        };
        PlatformDimensions {
            lateral_width: 1.22,
            longitudinal_length: 2.44,
            modules: ModuleSet::splat(inset),
        }
    }

    fn mounts() -> ModuleSet<f64> {
        ModuleSet::new(MOUNT[0], MOUNT[1], MOUNT[2], MOUNT[3])
    }

    fn sim() -> SimHardware {
        SimHardware::new(MAX_VELOCITY).with_mount_offsets(mounts())
    }

    fn calibrated_platform() -> SwervePlatform<SimHardware> {
        let store = MemoryHomingStore::with_offsets(mounts());
        SwervePlatform::new(&dimensions(), MAX_VELOCITY, Box::new(store), sim()).unwrap()
    }

    fn assert_all_stopped(platform: &SwervePlatform<SimHardware>) {
        for m in ModuleIndex::ALL {
            assert!(platform.hardware().last_drive(m).is_stop(), "{:?} drive", m);
            assert!(platform.hardware().last_steer(m).is_stop(), "{:?} steer", m);
        }
    }

    #[test]
    fn test_zero_command_stops_all_actuators() {
        let mut platform = calibrated_platform();
        platform.swerve_drive(0.5, 0.0, 0.0).unwrap();
        platform.swerve_drive(0.0, 0.0, 0.0).unwrap();
        assert_all_stopped(&platform);
        assert_eq!(platform.hardware().command_count(), 16);
    }

    #[test]
    fn test_stored_homes_rezero_encoders() {
        let mut hardware = sim();
        hardware.set_mechanical_angle(ModuleIndex::RearRight, 30.0);
        let store = MemoryHomingStore::with_offsets(mounts());
        let platform =
            SwervePlatform::new(&dimensions(), MAX_VELOCITY, Box::new(store), hardware).unwrap();

        assert!(platform.is_calibrated());
        assert!(platform.hardware().encoder_position(ModuleIndex::FrontLeft).abs() < 1e-9);
        assert!(
            (platform.hardware().encoder_position(ModuleIndex::RearRight) - 30.0).abs() < 1e-9
        );
    }

    #[test]
    fn test_missing_calibration_refuses_to_drive() {
        let mut platform = SwervePlatform::new(
            &dimensions(),
            MAX_VELOCITY,
            Box::new(MemoryHomingStore::new()),
            sim(),
        )
        .unwrap();
        assert!(!platform.is_calibrated());
        assert!(matches!(
            platform.initialize_turn_encoder_angles(),
            Err(PlatformError::NoCalibration)
        ));

        let result = platform.swerve_drive(0.5, 0.0, 0.0);
        assert!(matches!(result, Err(PlatformError::NotCalibrated)));
        assert_all_stopped(&platform);
    }

    #[test]
    fn test_unreadable_calibration_is_uncalibrated() {
        let mut store = MemoryHomingStore::with_offsets(mounts());
        store.set_fail_loads(true);
        let platform =
            SwervePlatform::new(&dimensions(), MAX_VELOCITY, Box::new(store), sim()).unwrap();
        assert!(!platform.is_calibrated());
    }

    #[test]
    fn test_home_persists_absolute_angles() {
        let mut platform = SwervePlatform::new(
            &dimensions(),
            MAX_VELOCITY,
            Box::new(MemoryHomingStore::new()),
            sim(),
        )
        .unwrap();
        platform
            .hardware_mut()
            .set_mechanical_angle(ModuleIndex::FrontRight, 15.0);

        let offsets = platform.home(0.0).unwrap();
        assert!(platform.is_calibrated());
        assert!((offsets.front_left - MOUNT[0]).abs() < 1e-9);
        assert!((offsets.front_right - (MOUNT[1] + 15.0)).abs() < 1e-9);
        for m in ModuleIndex::ALL {
            assert!(platform.hardware().encoder_position(m).abs() < 1e-9);
        }

        // Reloading the same homes reproduces the same origin
        platform.initialize_turn_encoder_angles().unwrap();
        for m in ModuleIndex::ALL {
            assert!(platform.hardware().encoder_position(m).abs() < 1e-9, "{:?}", m);
        }
    }

    #[test]
    fn test_home_with_reference_angle() {
        let mut platform = calibrated_platform();
        let offsets = platform.home(90.0).unwrap();
        assert!((offsets.rear_left - (MOUNT[3] + 90.0)).abs() < 1e-9);
        assert!((platform.hardware().encoder_position(ModuleIndex::RearLeft) - 90.0).abs() < 1e-9);

        // Reloading a nonzero reference lands on the opposite origin
        platform.initialize_turn_encoder_angles().unwrap();
        for m in ModuleIndex::ALL {
            let position = platform.hardware().encoder_position(m);
            assert!((position + 90.0).abs() < 1e-9, "{:?} at {}", m, position);
        }
    }

    #[test]
    fn test_unreadable_encoders_leave_calibration_pending() {
        let mut hardware = sim();
        hardware.set_available(false);
        let store = MemoryHomingStore::with_offsets(mounts());
        let mut platform =
            SwervePlatform::new(&dimensions(), MAX_VELOCITY, Box::new(store), hardware).unwrap();
        assert!(!platform.is_calibrated());
        assert!(platform.calibration_pending());

        platform.hardware_mut().set_available(true);
        platform.initialize_turn_encoder_angles().unwrap();
        assert!(platform.is_calibrated());
        assert!(!platform.calibration_pending());
        for m in ModuleIndex::ALL {
            assert!(platform.hardware().encoder_position(m).abs() < 1e-9, "{:?}", m);
        }
    }

    #[test]
    fn test_missing_store_is_not_pending() {
        let platform = SwervePlatform::new(
            &dimensions(),
            MAX_VELOCITY,
            Box::new(MemoryHomingStore::new()),
            sim(),
        )
        .unwrap();
        assert!(!platform.is_calibrated());
        assert!(!platform.calibration_pending());
    }

    #[test]
    fn test_home_save_failure_reported() {
        let mut store = MemoryHomingStore::new();
        store.set_fail_saves(true);
        let mut platform =
            SwervePlatform::new(&dimensions(), MAX_VELOCITY, Box::new(store), sim()).unwrap();
        assert!(matches!(platform.home(0.0), Err(PlatformError::Homing(_))));
        // Session calibration still applies
        assert!(platform.is_calibrated());
    }

    #[test]
    fn test_forward_drive_outputs() {
        let mut platform = calibrated_platform();
        platform.swerve_drive(0.5, 0.0, 0.0).unwrap();
        for m in ModuleIndex::ALL {
            assert_eq!(
                platform.hardware().last_drive(m),
                ActuatorCommand::PercentOutput(0.5)
            );
            match platform.hardware().last_steer(m) {
                ActuatorCommand::Position(p) => assert!(p.abs() < 1e-9),
                other => panic!("unexpected steer command {:?}", other),
            }
        }
    }

    #[test]
    fn test_reversed_wheel_drives_backward() {
        let mut platform = calibrated_platform();
        platform
            .hardware_mut()
            .set_steer(ModuleIndex::FrontLeft, ActuatorCommand::Position(180.0))
            .unwrap();

        platform.swerve_drive(0.5, 0.0, 0.0).unwrap();
        assert_eq!(
            platform.hardware().last_drive(ModuleIndex::FrontLeft),
            ActuatorCommand::PercentOutput(-0.5)
        );
        match platform.hardware().last_steer(ModuleIndex::FrontLeft) {
            ActuatorCommand::Position(p) => assert!((p - 180.0).abs() < 1e-9),
            other => panic!("unexpected steer command {:?}", other),
        }
    }

    #[test]
    fn test_steering_fault_zeroes_drive() {
        let mut platform = calibrated_platform();
        platform.hardware_mut().set_steer_faults(
            ModuleIndex::FrontRight,
            Faults {
                hardware_failure: true,
                ..Default::default()
            },
        );

        platform.swerve_drive(0.0, 0.8, 0.0).unwrap();
        assert_eq!(
            platform.hardware().last_drive(ModuleIndex::FrontRight),
            ActuatorCommand::PercentOutput(0.0)
        );
        assert!(matches!(
            platform.hardware().last_steer(ModuleIndex::FrontRight),
            ActuatorCommand::Position(_)
        ));
        match platform.hardware().last_drive(ModuleIndex::RearLeft) {
            ActuatorCommand::PercentOutput(p) => assert!((p - 0.8).abs() < 1e-9),
            other => panic!("unexpected drive command {:?}", other),
        }
    }

    #[test]
    fn test_drive_fault_zeroes_drive() {
        let mut platform = calibrated_platform();
        platform.hardware_mut().set_drive_faults(
            ModuleIndex::RearRight,
            Faults {
                remote_loss_of_signal: true,
                ..Default::default()
            },
        );

        platform.swerve_drive(0.6, 0.0, 0.0).unwrap();
        assert_eq!(
            platform.hardware().last_drive(ModuleIndex::RearRight),
            ActuatorCommand::PercentOutput(0.0)
        );
        match platform.hardware().last_drive(ModuleIndex::FrontLeft) {
            ActuatorCommand::PercentOutput(p) => assert!((p - 0.6).abs() < 1e-9),
            other => panic!("unexpected drive command {:?}", other),
        }
    }

    #[test]
    fn test_field_centric_not_supported() {
        let mut platform = calibrated_platform();
        platform.set_control_mode(ControlMode::FieldCentric);
        assert_eq!(platform.control_mode(), ControlMode::FieldCentric);
        assert!(matches!(
            platform.swerve_drive(0.2, 0.0, 0.0),
            Err(PlatformError::FieldCentricUnsupported)
        ));
        assert_all_stopped(&platform);

        platform.set_control_mode(ControlMode::RobotCentric);
        platform.swerve_drive(0.2, 0.0, 0.0).unwrap();
    }

    #[test]
    fn test_unavailable_hardware_reports_error() {
        let mut platform = calibrated_platform();
        platform.hardware_mut().set_available(false);
        assert!(matches!(
            platform.swerve_drive(0.3, 0.3, 0.0),
            Err(PlatformError::Hardware(HardwareError::Unavailable(_)))
        ));
        assert!(platform.stop().is_err());
    }
}
