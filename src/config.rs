// Timeouts, topics, geometry and tuning
//
// The constants are the built-in defaults. `RuntimeConfig` collects them into
// a structure that can be overridden from a TOML file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::interpolation::{InterpolationError, InterpolationMap, MapPoint};
use crate::line_follow::LineFollowConfig;
use crate::line_sensor::{LineSensorConfig, SerialSettings};
use crate::platform::{ModuleInset, ModuleSet, PlatformDimensions};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;
pub const MAX_LOOP_HZ: u64 = 1000; // period resolution is 1 ms

// Operator input watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Actuator feedback watchdog
pub const FEEDBACK_TIMEOUT: Duration = Duration::from_millis(100);

// Zenoh topics
pub const TOPIC_CMD_OPERATOR: &str = "swerve/cmd/operator"; // operator controller
pub const TOPIC_FEEDBACK: &str = "swerve/state/feedback"; // actuator feedback
pub const TOPIC_RT_ACTUATION: &str = "swerve/rt/actuation"; // actuator commands
pub const TOPIC_RT_ENCODER_ZERO: &str = "swerve/rt/encoder_zero"; // encoder re-zero
pub const TOPIC_RT_VIBRATION: &str = "swerve/rt/vibration"; // controller rumble
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status
pub const TOPIC_LINE: &str = "swerve/state/line"; // line sensor telemetry

// Platform geometry (meters), 48 x 96 in frame
pub const PLATFORM_LATERAL_WIDTH: f64 = 1.2192;
pub const PLATFORM_LONGITUDINAL_LENGTH: f64 = 2.4384;
pub const MODULE_LATERAL_INSET: f64 = 0.17145;
pub const FRONT_MODULE_LONGITUDINAL_INSET: f64 = 0.1317625;
pub const REAR_MODULE_LONGITUDINAL_INSET: f64 = 0.9858375;

// Drive speed at full output (m/s)
pub const MAX_VELOCITY: f64 = 0.6096;

// Operator combos
pub const HOMING_MODE_ACTIVATE: Duration = Duration::from_secs(2);
pub const HOMING_CONFIRM_ACTIVATE: Duration = Duration::from_secs(1);

// Line sensor serial link
pub const LINE_SENSOR_DISCOVERY_DIR: &str = "/dev/serial/by-id";
pub const LINE_SENSOR_KEYWORD: &str = "arduino";
pub const LINE_SENSOR_BAUD: u32 = 115_200;
pub const LINE_SENSOR_READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const LINE_SENSOR_DATA_TIMEOUT: Duration = Duration::from_millis(100);
pub const LINE_DISCOVERY_RETRY: Duration = Duration::from_millis(100);
pub const LINE_CONNECT_RETRY: Duration = Duration::from_millis(50);
pub const LINE_RECOVERY_TIME: Duration = Duration::from_secs(1);

// Line sensor calibration (raw counts, lower is darker)
pub const LINE_ACTIVATE_THRESHOLD: u16 = 400;
pub const LINE_DEACTIVATE_THRESHOLD: u16 = 700;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid axis map: {0}")]
    AxisMap(#[from] InterpolationError),

    #[error("loop_hz must be between 1 and {max}, got {0}", max = MAX_LOOP_HZ)]
    LoopRate(u64),
}

pub fn default_dimensions() -> PlatformDimensions {
    let front = ModuleInset {
        lateral_inset: MODULE_LATERAL_INSET,
        longitudinal_inset: FRONT_MODULE_LONGITUDINAL_INSET,
    };
    let rear = ModuleInset {
        lateral_inset: MODULE_LATERAL_INSET,
        longitudinal_inset: REAR_MODULE_LONGITUDINAL_INSET,
    };
    PlatformDimensions {
        lateral_width: PLATFORM_LATERAL_WIDTH,
        longitudinal_length: PLATFORM_LONGITUDINAL_LENGTH,
        modules: ModuleSet::new(front, front, rear, rear),
    }
}

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub runtime: LoopConfig,
    pub platform: PlatformConfig,
    pub axes: AxisMapConfig,
    pub line_sensor: LineSensorSection,
    pub line_follow: LineFollowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub loop_hz: u64,
    pub cmd_timeout_ms: u64,
    pub feedback_timeout_ms: u64,
    /// Run against the in-process simulator instead of the actuator bridge
    pub simulate: bool,
    /// Home positions file; defaults under $HOME/.config
    pub homes_file: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            loop_hz: LOOP_HZ,
            cmd_timeout_ms: CMD_TIMEOUT.as_millis() as u64,
            feedback_timeout_ms: FEEDBACK_TIMEOUT.as_millis() as u64,
            simulate: false,
            homes_file: None,
        }
    }
}

impl LoopConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(1000 / self.loop_hz.clamp(1, MAX_LOOP_HZ))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_LOOP_HZ).contains(&self.loop_hz) {
            return Err(ConfigError::LoopRate(self.loop_hz));
        }
        Ok(())
    }

    pub fn cmd_timeout(&self) -> Duration {
        Duration::from_millis(self.cmd_timeout_ms)
    }

    pub fn feedback_timeout(&self) -> Duration {
        Duration::from_millis(self.feedback_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub dimensions: PlatformDimensions,
    pub max_velocity: f64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
            max_velocity: MAX_VELOCITY,
        }
    }
}

/// Joystick shaping tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisMapConfig {
    pub longitudinal: InterpolationMap,
    pub lateral: InterpolationMap,
    pub rotational: InterpolationMap,
}

impl AxisMapConfig {
    pub fn defaults() -> Result<Self, ConfigError> {
        let speed = || {
            InterpolationMap::new(vec![
                MapPoint::new(-1.0, -1.0),
                MapPoint::new(-0.75, -0.4),
                MapPoint::new(-0.15, 0.0),
                MapPoint::new(0.15, 0.0),
                MapPoint::new(0.75, 0.4),
                MapPoint::new(1.0, 1.0),
            ])
        };
        let rotation = InterpolationMap::new(vec![
            MapPoint::new(-1.0, -1.0),
            MapPoint::new(-0.15, 0.0),
            MapPoint::new(0.15, 0.0),
            MapPoint::new(1.0, 1.0),
        ])?;
        Ok(Self {
            longitudinal: speed()?,
            lateral: speed()?,
            rotational: rotation,
        })
    }
}

impl Default for AxisMapConfig {
    fn default() -> Self {
        // The built-in tables are sorted and non-empty
        Self::defaults().unwrap_or_else(|e| unreachable!("built-in axis map rejected: {e}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSensorSection {
    pub enabled: bool,
    /// Fixed device path; discovered under `discovery_dir` when unset
    pub device: Option<PathBuf>,
    pub discovery_dir: PathBuf,
    pub device_keyword: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub data_timeout_ms: u64,
    pub recovery_time_ms: u64,
    pub activate_threshold: u16,
    pub deactivate_threshold: u16,
    pub swap_sides: bool,
}

impl Default for LineSensorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            device: None,
            discovery_dir: PathBuf::from(LINE_SENSOR_DISCOVERY_DIR),
            device_keyword: LINE_SENSOR_KEYWORD.to_owned(),
            baud_rate: LINE_SENSOR_BAUD,
            read_timeout_ms: LINE_SENSOR_READ_TIMEOUT.as_millis() as u64,
            data_timeout_ms: LINE_SENSOR_DATA_TIMEOUT.as_millis() as u64,
            recovery_time_ms: LINE_RECOVERY_TIME.as_millis() as u64,
            activate_threshold: LINE_ACTIVATE_THRESHOLD,
            deactivate_threshold: LINE_DEACTIVATE_THRESHOLD,
            swap_sides: true,
        }
    }
}

impl LineSensorSection {
    pub fn sensor_config(&self) -> LineSensorConfig {
        LineSensorConfig {
            serial: SerialSettings {
                device: self.device.clone(),
                discovery_dir: self.discovery_dir.clone(),
                device_keyword: self.device_keyword.clone(),
                baud_rate: self.baud_rate,
                read_timeout: Duration::from_millis(self.read_timeout_ms),
            },
            activate_threshold: self.activate_threshold,
            deactivate_threshold: self.deactivate_threshold,
            swap_sides: self.swap_sides,
            data_timeout: Duration::from_millis(self.data_timeout_ms),
            recovery_time: Duration::from_millis(self.recovery_time_ms),
            ..LineSensorConfig::default()
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.runtime.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.runtime.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry() {
        let dims = default_dimensions();
        assert_eq!(dims.modules.front_left, dims.modules.front_right);
        assert_eq!(dims.modules.rear_left.longitudinal_inset, REAR_MODULE_LONGITUDINAL_INSET);
        // 48 in wide, 96 in long
        assert!((dims.lateral_width - 48.0 * 0.0254).abs() < 1e-9);
        assert!((dims.longitudinal_length - 96.0 * 0.0254).abs() < 1e-9);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = RuntimeConfig::from_toml("").unwrap();
        assert_eq!(config.runtime.loop_hz, LOOP_HZ);
        assert_eq!(config.runtime.period(), Duration::from_millis(20));
        assert_eq!(config.platform.max_velocity, MAX_VELOCITY);
        assert!(config.line_sensor.enabled);
        assert_eq!(config.axes.rotational.map(0.1), 0.0);
    }

    #[test]
    fn test_partial_override() {
        let config = RuntimeConfig::from_toml(
            r#"
            [runtime]
            simulate = true
            cmd_timeout_ms = 500

            [line_sensor]
            device = "/dev/ttyACM1"
            swap_sides = false

            [axes]
            rotational = [
                { input = -1.0, output = -0.5 },
                { input = 1.0, output = 0.5 },
            ]
            "#,
        )
        .unwrap();

        assert!(config.runtime.simulate);
        assert_eq!(config.runtime.cmd_timeout(), Duration::from_millis(500));
        assert_eq!(config.runtime.feedback_timeout(), FEEDBACK_TIMEOUT);

        let sensor = config.line_sensor.sensor_config();
        assert_eq!(sensor.serial.device, Some(PathBuf::from("/dev/ttyACM1")));
        assert!(!sensor.swap_sides);
        assert_eq!(sensor.serial.baud_rate, LINE_SENSOR_BAUD);

        assert_eq!(config.axes.rotational.map(1.0), 0.5);
        assert_eq!(config.axes.longitudinal.map(1.0), 1.0);
    }

    #[test]
    fn test_unsorted_axis_map_rejected() {
        let result = RuntimeConfig::from_toml(
            r#"
            [axes]
            lateral = [
                { input = 1.0, output = 1.0 },
                { input = -1.0, output = -1.0 },
            ]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_loop_rate_bounds() {
        for hz in [0, 1001, 5000] {
            let result = RuntimeConfig::from_toml(&format!("[runtime]\nloop_hz = {}", hz));
            assert!(matches!(result, Err(ConfigError::LoopRate(rate)) if rate == hz), "{}", hz);
        }

        let config = RuntimeConfig::from_toml("[runtime]\nloop_hz = 1000").unwrap();
        assert_eq!(config.runtime.period(), Duration::from_millis(1));

        // Built directly, out-of-range rates still give a usable period
        let fast = LoopConfig {
            loop_hz: 10_000,
            ..LoopConfig::default()
        };
        assert_eq!(fast.period(), Duration::from_millis(1));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            RuntimeConfig::from_file("/nonexistent/swerve.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
