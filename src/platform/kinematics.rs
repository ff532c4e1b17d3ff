// Swerve inverse kinematics for the four-module platform
// Converts body-frame velocities (forward, lateral, rotation) into per-module
// (speed, angle) targets and optimizes each target against the measured angle.
//
// Frame: x forward, y toward the right side, rotation positive clockwise
// seen from above. Module angles are measured clockwise from forward.

use serde::{Deserialize, Serialize};

use super::module::{ModuleIndex, ModuleSet};

/// Speeds below this are treated as "no motion" for a single module (m/s)
const MIN_MODULE_SPEED: f64 = 1e-9;

/// Largest angle change the optimizer is allowed to request before flipping (degrees)
const MAX_ROTATION_BEFORE_FLIP: f64 = 90.0;

#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("Module {module} sits on the platform center, max rotation rate is undefined")]
    DegenerateLeverArm { module: &'static str },

    #[error("Max velocity must be positive, got {0}")]
    InvalidMaxVelocity(f64),
}

/// Inset of a module's contact point from the platform corners (meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModuleInset {
    pub lateral_inset: f64,
    pub longitudinal_inset: f64,
}

/// Outer dimensions of the platform plus the inset of every module (meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlatformDimensions {
    pub lateral_width: f64,
    pub longitudinal_length: f64,
    pub modules: ModuleSet<ModuleInset>,
}

/// 2D point or vector in the platform frame (meters)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Translation2d {
    pub x: f64,
    pub y: f64,
}

impl Translation2d {
    pub const ORIGIN: Translation2d = Translation2d { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Commanded body velocity, each component a fraction in [-1, 1] of the platform maxima
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChassisVelocityCommand {
    pub forward: f64,
    pub lateral: f64,
    pub rotational: f64,
}

impl ChassisVelocityCommand {
    pub fn new(forward: f64, lateral: f64, rotational: f64) -> Self {
        Self {
            forward,
            lateral,
            rotational,
        }
    }

    /// Exact zero on all three axes (the halt fast path)
    pub fn is_zero(&self) -> bool {
        self.forward == 0.0 && self.lateral == 0.0 && self.rotational == 0.0
    }
}

/// Target for one module: signed speed (m/s) and heading (degrees, (-180, 180])
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleState {
    pub speed: f64,
    pub angle: f64,
}

impl ModuleState {
    pub fn new(speed: f64, angle: f64) -> Self {
        Self {
            speed,
            angle: wrap_degrees(angle),
        }
    }

    /// Net velocity vector `(x, y)` this state produces
    pub fn velocity(&self) -> (f64, f64) {
        let rad = self.angle.to_radians();
        (self.speed * rad.cos(), self.speed * rad.sin())
    }
}

/// Output of the kinematics engine for one control tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlatformCommand {
    /// All inputs were exactly zero: stop all eight actuators
    Stop,
    /// Optimized per-module targets
    Drive(ModuleSet<ModuleState>),
}

/// Wrap an angle into (-180, 180]
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Shortest signed rotation taking `from` to `to` (degrees)
pub fn shortest_delta(from: f64, to: f64) -> f64 {
    wrap_degrees(to - from)
}

/// Flip target by 180° and reverse its speed when that needs less rotation
pub fn optimize(target: ModuleState, current_angle: f64) -> ModuleState {
    let delta = shortest_delta(current_angle, target.angle);
    if delta.abs() > MAX_ROTATION_BEFORE_FLIP {
        ModuleState::new(-target.speed, target.angle + 180.0)
    } else {
        target
    }
}

/// Steering position setpoint for `angle` nearest a (possibly multi-turn) measured position
pub fn continuous_setpoint(angle: f64, measured_position: f64) -> f64 {
    measured_position + shortest_delta(measured_position, angle)
}

/// Lever arms of each module from the platform center
pub fn lever_arms(dimensions: &PlatformDimensions) -> ModuleSet<Translation2d> {
    let half_length = dimensions.longitudinal_length / 2.0;
    let half_width = dimensions.lateral_width / 2.0;
    let insets = &dimensions.modules;

    ModuleSet::new(
        Translation2d::new(
            half_length - insets.front_left.longitudinal_inset,
            -half_width + insets.front_left.lateral_inset,
        ),
        Translation2d::new(
            half_length - insets.front_right.longitudinal_inset,
            half_width - insets.front_right.lateral_inset,
        ),
        Translation2d::new(
            -half_length + insets.rear_right.longitudinal_inset,
            half_width - insets.rear_right.lateral_inset,
        ),
        Translation2d::new(
            -half_length + insets.rear_left.longitudinal_inset,
            -half_width + insets.rear_left.lateral_inset,
        ),
    )
}

/// Inverse kinematics model built once from the platform geometry
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    lever_arms: ModuleSet<Translation2d>,
    max_velocity: f64,
    max_angular_rate: f64,
}

impl SwerveKinematics {
    /// # Arguments
    /// * `dimensions` - Platform and module insets in meters
    /// * `max_velocity` - Linear speed (m/s) reached at a full-scale command
    pub fn new(dimensions: &PlatformDimensions, max_velocity: f64) -> Result<Self, GeometryError> {
        if !(max_velocity > 0.0) {
            return Err(GeometryError::InvalidMaxVelocity(max_velocity));
        }

        let lever_arms = lever_arms(dimensions);

        let (shortest_module, shortest) = lever_arms
            .iter()
            .map(|(m, arm)| (m, arm.norm()))
            .fold((ModuleIndex::FrontLeft, f64::INFINITY), |best, next| {
                if next.1 < best.1 { next } else { best }
            });
        if shortest <= f64::EPSILON {
            return Err(GeometryError::DegenerateLeverArm {
                module: shortest_module.name(),
            });
        }

        // One full turn of the closest module at max speed
        let turn_circumference = 2.0 * std::f64::consts::PI * shortest;
        let max_angular_rate = 360.0 * max_velocity / turn_circumference;

        Ok(Self {
            lever_arms,
            max_velocity,
            max_angular_rate,
        })
    }

    pub fn lever_arms(&self) -> &ModuleSet<Translation2d> {
        &self.lever_arms
    }

    /// Linear speed at full-scale command (m/s)
    pub fn max_velocity(&self) -> f64 {
        self.max_velocity
    }

    /// Rotation rate at full-scale command (deg/s)
    pub fn max_angular_rate(&self) -> f64 {
        self.max_angular_rate
    }

    /// Raw module states for a physical body velocity
    ///
    /// # Arguments
    /// * `forward` - Forward velocity in m/s
    /// * `lateral` - Rightward velocity in m/s
    /// * `rotation` - Clockwise rotation in deg/s
    /// * `center` - Center of rotation in the platform frame
    pub fn module_states(
        &self,
        forward: f64,
        lateral: f64,
        rotation: f64,
        center: Translation2d,
    ) -> ModuleSet<ModuleState> {
        let omega = rotation.to_radians();

        self.lever_arms.map(|arm| {
            let rx = arm.x - center.x;
            let ry = arm.y - center.y;
            let vx = forward - omega * ry;
            let vy = lateral + omega * rx;

            ModuleState::new(vx.hypot(vy), vy.atan2(vx).to_degrees())
        })
    }

    /// Full pipeline: scale, solve, optimize against measured angles
    ///
    /// Returns `PlatformCommand::Stop` without touching the solver when every
    /// input is exactly zero.
    pub fn compute_module_commands(
        &self,
        command: ChassisVelocityCommand,
        current_angles: &ModuleSet<f64>,
        center: Translation2d,
    ) -> PlatformCommand {
        if command.is_zero() {
            return PlatformCommand::Stop;
        }

        let raw = self.module_states(
            command.forward * self.max_velocity,
            command.lateral * self.max_velocity,
            command.rotational * self.max_angular_rate,
            center,
        );

        PlatformCommand::Drive(ModuleSet::from_fn(|m| {
            let current = current_angles[m];
            let state = raw[m];
            if state.speed.abs() < MIN_MODULE_SPEED {
                // No direction to follow, hold the wheel where it is
                ModuleState::new(0.0, current)
            } else {
                optimize(state, current)
            }
        }))
    }
}
