// Message types exchanged over zenoh

use serde::{Deserialize, Serialize};

use crate::hardware::{ActuatorCommand, ActuatorFeedback};
use crate::line_sensor::{LineIntensity, RawSensorArrayStatus, RecoveryDirection};
use crate::platform::{ModuleIndex, ModuleSet};

pub use crate::vibration::VibrationStatus as VibrationCommand;

// Operator controller snapshot, teleop -> runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonStates {
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub lb: bool,
    pub rb: bool,
    pub back: bool,
    pub start: bool,
    pub stick_left: bool,
    pub stick_right: bool,
    pub lt: bool,
    pub rt: bool,
    pub d_up: bool,
    pub d_right: bool,
    pub d_down: bool,
    pub d_left: bool,
}

/// Axis values in [-1, 1]; triggers in [0, 1]. Left Y is positive forward.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisStates {
    pub left_x: f64,
    pub left_y: f64,
    pub lt: f64,
    pub rt: f64,
    pub right_x: f64,
    pub right_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorInput {
    pub buttons: ButtonStates,
    pub axes: AxisStates,
}

// Actuation output, runtime -> actuator bridge
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlatformActuation {
    pub drive: ModuleSet<ActuatorCommand>,
    pub steer: ModuleSet<ActuatorCommand>,
}

impl PlatformActuation {
    pub fn is_stop(&self) -> bool {
        self.drive.iter().all(|(_, c)| c.is_stop()) && self.steer.iter().all(|(_, c)| c.is_stop())
    }
}

/// Per-module feedback, actuator bridge -> runtime
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleFeedback {
    pub drive: ActuatorFeedback,
    pub steer: ActuatorFeedback,
    /// Raw absolute encoder reading in degrees [0, 360)
    pub absolute_angle: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlatformFeedback {
    pub modules: ModuleSet<ModuleFeedback>,
}

// Steering encoder re-zero request, runtime -> actuator bridge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderZeroCommand {
    pub module: ModuleIndex,
    pub position: f64,
}

/// Line sensor telemetry published by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineSensorState {
    pub connected: bool,
    pub frame_count: u64,
    pub raw: Option<RawSensorArrayStatus>,
    pub intensity: Option<LineIntensity>,
    pub recovery: RecoveryDirection,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    FeedbackStale,
    Uncalibrated,
}
