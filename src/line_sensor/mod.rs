// Serial line sensor array
//
// A background thread keeps a connection to the sensor board, parses every
// frame and publishes the latest reading into a locked snapshot. Readers
// never block on I/O; they get the latest snapshot or None when it is stale.

mod discovery;
mod frame;
mod transport;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config;

pub use discovery::discover_device;
pub use frame::{FRAME_LEN, FrameError, parse_frame};
pub use transport::{Connector, FrameSource, SerialConnector, SerialFrameSource, SerialSettings};

#[derive(Debug, thiserror::Error)]
pub enum LineSensorError {
    #[error("No line sensor found in {}", .0.display())]
    NoDevice(PathBuf),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to spawn line sensor thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Raw channel values; lower reads darker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawSensorArrayStatus {
    pub left: u16,
    pub center: u16,
    pub right: u16,
}

impl RawSensorArrayStatus {
    pub fn swapped(self) -> Self {
        Self {
            left: self.right,
            center: self.center,
            right: self.left,
        }
    }
}

/// Per-channel line detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorArrayStatus {
    pub left: bool,
    pub center: bool,
    pub right: bool,
}

impl SensorArrayStatus {
    pub fn any(&self) -> bool {
        self.left || self.center || self.right
    }
}

/// Per-channel line coverage in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LineIntensity {
    pub left: f64,
    pub center: f64,
    pub right: f64,
}

impl LineIntensity {
    pub const fn new(left: f64, center: f64, right: f64) -> Self {
        Self {
            left,
            center,
            right,
        }
    }

    pub fn all_above(&self, threshold: f64) -> bool {
        self.left > threshold && self.center > threshold && self.right > threshold
    }

    pub fn all_below(&self, threshold: f64) -> bool {
        self.left < threshold && self.center < threshold && self.right < threshold
    }
}

/// Hint for finding the line again after losing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryDirection {
    LineDetected,
    /// Line was last seen leaving the left channel
    Left,
    /// Line was last seen leaving the right channel
    Right,
    #[default]
    Timeout,
}

#[derive(Debug, Clone)]
pub struct LineSensorConfig {
    pub serial: SerialSettings,
    /// Raw values below this count as line detected
    pub activate_threshold: u16,
    /// Raw values at or above this count as no contact
    pub deactivate_threshold: u16,
    /// The board reports left and right mirrored
    pub swap_sides: bool,
    /// Readings older than this are stale; also the silent-link timeout
    pub data_timeout: Duration,
    pub recovery_time: Duration,
    pub discovery_retry: Duration,
    pub connect_retry: Duration,
}

impl Default for LineSensorConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings {
                device: None,
                discovery_dir: PathBuf::from(config::LINE_SENSOR_DISCOVERY_DIR),
                device_keyword: config::LINE_SENSOR_KEYWORD.to_owned(),
                baud_rate: config::LINE_SENSOR_BAUD,
                read_timeout: config::LINE_SENSOR_READ_TIMEOUT,
            },
            activate_threshold: config::LINE_ACTIVATE_THRESHOLD,
            deactivate_threshold: config::LINE_DEACTIVATE_THRESHOLD,
            swap_sides: true,
            data_timeout: config::LINE_SENSOR_DATA_TIMEOUT,
            recovery_time: config::LINE_RECOVERY_TIME,
            discovery_retry: config::LINE_DISCOVERY_RETRY,
            connect_retry: config::LINE_CONNECT_RETRY,
        }
    }
}

impl LineSensorConfig {
    pub fn status(&self, raw: RawSensorArrayStatus) -> SensorArrayStatus {
        SensorArrayStatus {
            left: raw.left < self.activate_threshold,
            center: raw.center < self.activate_threshold,
            right: raw.right < self.activate_threshold,
        }
    }

    pub fn contact(&self, raw: RawSensorArrayStatus) -> SensorArrayStatus {
        SensorArrayStatus {
            left: raw.left < self.deactivate_threshold,
            center: raw.center < self.deactivate_threshold,
            right: raw.right < self.deactivate_threshold,
        }
    }

    pub fn proportional(&self, raw: RawSensorArrayStatus) -> LineIntensity {
        let deactivate = f64::from(self.deactivate_threshold);
        let range = deactivate - f64::from(self.activate_threshold);
        let scale = |value: u16| {
            if range <= 0.0 {
                // Degenerate calibration: plain step at the deactivate threshold
                return if value < self.deactivate_threshold { 1.0 } else { 0.0 };
            }
            ((deactivate - f64::from(value)) / range).clamp(0.0, 1.0)
        };
        LineIntensity::new(scale(raw.left), scale(raw.center), scale(raw.right))
    }
}

#[derive(Debug)]
struct Snapshot {
    raw: Option<RawSensorArrayStatus>,
    updated_at: Option<Instant>,
    recovery: RecoveryDirection,
    recovery_start: Instant,
}

impl Snapshot {
    fn new(now: Instant) -> Self {
        Self {
            raw: None,
            updated_at: None,
            recovery: RecoveryDirection::Timeout,
            recovery_start: now,
        }
    }

    fn apply(&mut self, reading: RawSensorArrayStatus, config: &LineSensorConfig, now: Instant) {
        let prev = self
            .raw
            .map(|raw| config.contact(raw))
            .unwrap_or_default();
        let next = config.contact(reading);

        if prev.left && !next.left && next.right {
            self.recovery = RecoveryDirection::Left;
        } else if prev.right && !next.right && next.left {
            self.recovery = RecoveryDirection::Right;
        } else if !next.any() {
            // Line lost entirely: remember the side that had it last
            if prev.left && !prev.right {
                self.recovery = RecoveryDirection::Left;
            } else if prev.right && !prev.left {
                self.recovery = RecoveryDirection::Right;
            }
        } else if (next.left && !prev.left)
            || (next.center && !prev.center)
            || (next.right && !prev.right)
        {
            self.recovery = RecoveryDirection::LineDetected;
        }

        if next.any() {
            self.recovery_start = now;
        }
        self.raw = Some(reading);
        self.updated_at = Some(now);
    }

    fn fresh(&self, now: Instant, timeout: Duration) -> Option<RawSensorArrayStatus> {
        let updated_at = self.updated_at?;
        if now.saturating_duration_since(updated_at) > timeout {
            return None;
        }
        self.raw
    }

    fn recovery_at(&mut self, now: Instant, recovery_time: Duration) -> RecoveryDirection {
        if now.saturating_duration_since(self.recovery_start) > recovery_time {
            self.recovery = RecoveryDirection::Timeout;
        }
        self.recovery
    }
}

struct Shared {
    snapshot: Mutex<Snapshot>,
    stop: AtomicBool,
    connected: AtomicBool,
    frames: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        // A panicked writer leaves a complete snapshot behind
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// Handle to the acquisition thread. Dropping it stops and joins the thread.
pub struct LineSensor {
    shared: Arc<Shared>,
    config: LineSensorConfig,
    handle: Option<JoinHandle<()>>,
}

impl LineSensor {
    /// Start acquisition on the serial port described by `config`
    pub fn start(config: LineSensorConfig) -> Result<Self, LineSensorError> {
        let connector = SerialConnector::new(config.serial.clone());
        Self::start_with(config, connector)
    }

    pub fn start_with<C>(config: LineSensorConfig, connector: C) -> Result<Self, LineSensorError>
    where
        C: Connector + 'static,
    {
        let shared = Arc::new(Shared {
            snapshot: Mutex::new(Snapshot::new(Instant::now())),
            stop: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            frames: AtomicU64::new(0),
        });

        let handle = {
            let shared = shared.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("line-sensor".into())
                .spawn(move || acquisition_loop(connector, &shared, &config))
                .map_err(LineSensorError::Spawn)?
        };

        info!("Line sensor service started");
        Ok(Self {
            shared,
            config,
            handle: Some(handle),
        })
    }

    /// Latest raw reading, None when absent or stale
    pub fn raw(&self) -> Option<RawSensorArrayStatus> {
        self.shared
            .lock()
            .fresh(Instant::now(), self.config.data_timeout)
    }

    pub fn array_status(&self) -> Option<SensorArrayStatus> {
        self.raw().map(|raw| self.config.status(raw))
    }

    pub fn proportional(&self) -> Option<LineIntensity> {
        self.raw().map(|raw| self.config.proportional(raw))
    }

    pub fn recovery_direction(&self) -> RecoveryDirection {
        self.shared
            .lock()
            .recovery_at(Instant::now(), self.config.recovery_time)
    }

    /// True while a left/right recovery hint is available
    pub fn recovery_active(&self) -> bool {
        matches!(
            self.recovery_direction(),
            RecoveryDirection::Left | RecoveryDirection::Right
        )
    }

    /// Number of successfully parsed frames
    pub fn frame_count(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Stop the acquisition thread and wait for it to exit
    pub fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Line sensor thread panicked");
            } else {
                info!("Line sensor service stopped");
            }
        }
    }
}

impl Drop for LineSensor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn acquisition_loop<C: Connector>(mut connector: C, shared: &Shared, config: &LineSensorConfig) {
    while !shared.stopped() {
        let mut source = match connector.connect() {
            Ok(source) => source,
            Err(LineSensorError::NoDevice(dir)) => {
                debug!("No line sensor in {}", dir.display());
                thread::sleep(config.discovery_retry);
                continue;
            }
            Err(e) => {
                warn!("Could not connect to line sensor: {}", e);
                thread::sleep(config.connect_retry);
                continue;
            }
        };

        shared.connected.store(true, Ordering::Relaxed);
        info!("Line sensor connected");
        receive(source.as_mut(), shared, config);
        shared.connected.store(false, Ordering::Relaxed);
    }
    debug!("Line sensor thread exiting");
}

/// Read frames until the link fails, goes silent or a stop is requested
fn receive(source: &mut dyn FrameSource, shared: &Shared, config: &LineSensorConfig) {
    let mut last_data = Instant::now();

    while !shared.stopped() {
        match source.read_line() {
            Ok(Some(line)) => {
                last_data = Instant::now();
                if line.is_empty() {
                    continue;
                }
                match parse_frame(&line) {
                    Ok(reading) => {
                        let reading = if config.swap_sides {
                            reading.swapped()
                        } else {
                            reading
                        };
                        shared.lock().apply(reading, config, Instant::now());
                        shared.frames.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => debug!("Discarding line sensor frame {:?}: {}", line, e),
                }
            }
            Ok(None) => {
                if last_data.elapsed() > config.data_timeout {
                    warn!("Lost line sensor connection: no data for {:?}", config.data_timeout);
                    return;
                }
            }
            Err(e) => {
                warn!("Line sensor read failed: {}", e);
                return;
            }
        }
    }
}
