// 50 Hz control loop with watchdog
//
// Each tick takes the latest operator snapshot and decides between homing,
// manual drive, line following and stop. A stale operator snapshot or any
// platform error always ends the tick with all actuators stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::{
    AxisMapConfig, HOMING_CONFIRM_ACTIVATE, HOMING_MODE_ACTIVATE, RuntimeConfig,
    TOPIC_CMD_OPERATOR, TOPIC_FEEDBACK, TOPIC_HEALTH, TOPIC_LINE, TOPIC_RT_ACTUATION,
    TOPIC_RT_ENCODER_ZERO, TOPIC_RT_VIBRATION,
};
use crate::debounce::TimedDebounce;
use crate::hardware::{BridgeHardware, SimHardware, SwerveHardware};
use crate::homing::{FileHomingStore, HomingStore, MemoryHomingStore};
use crate::line_follow::LineFollowController;
use crate::line_sensor::{LineIntensity, LineSensor};
use crate::messages::{
    EncoderZeroCommand, LineSensorState, OperatorInput, PlatformActuation, PlatformFeedback,
    RuntimeHealth, VibrationCommand,
};
use crate::platform::{self, ModuleSet, SwervePlatform};
use crate::vibration::VibrationModel;

/// Hardware backends the runtime can publish for
pub trait RuntimeHardware: SwerveHardware {
    fn on_feedback(&mut self, feedback: PlatformFeedback, received_at: Instant);

    /// Commands to publish this tick
    fn actuation(&self) -> PlatformActuation;

    fn drain_encoder_zeros(&mut self) -> Vec<EncoderZeroCommand>;

    fn feedback_stale(&self, now: Instant) -> bool;
}

impl RuntimeHardware for BridgeHardware {
    fn on_feedback(&mut self, feedback: PlatformFeedback, received_at: Instant) {
        BridgeHardware::on_feedback(self, feedback, received_at);
    }

    fn actuation(&self) -> PlatformActuation {
        *BridgeHardware::actuation(self)
    }

    fn drain_encoder_zeros(&mut self) -> Vec<EncoderZeroCommand> {
        BridgeHardware::drain_encoder_zeros(self)
    }

    fn feedback_stale(&self, now: Instant) -> bool {
        self.is_stale_at(now)
    }
}

impl RuntimeHardware for SimHardware {
    fn on_feedback(&mut self, _feedback: PlatformFeedback, _received_at: Instant) {
        debug!("Ignoring actuator feedback in simulation");
    }

    fn actuation(&self) -> PlatformActuation {
        PlatformActuation {
            drive: ModuleSet::from_fn(|m| self.last_drive(m)),
            steer: ModuleSet::from_fn(|m| self.last_steer(m)),
        }
    }

    fn drain_encoder_zeros(&mut self) -> Vec<EncoderZeroCommand> {
        Vec::new()
    }

    fn feedback_stale(&self, _now: Instant) -> bool {
        false
    }
}

/// Rumble patterns, rebuilt only when the cue changes so pulses keep phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VibrationCue {
    Off,
    HomingArmed,
    HomingConfirmed,
    DriveEngaged,
    DriveRejected,
}

impl VibrationCue {
    fn model(self, now: Instant) -> VibrationModel {
        match self {
            VibrationCue::Off => VibrationModel::Off,
            VibrationCue::HomingArmed => {
                VibrationModel::alternate_pulse(Duration::from_secs(1), 0.0, 1.0, now)
            }
            VibrationCue::HomingConfirmed => VibrationModel::constant(0.5),
            VibrationCue::DriveEngaged => {
                VibrationModel::timed(0.3, 0.3, Duration::from_millis(500), now)
            }
            VibrationCue::DriveRejected => {
                VibrationModel::sync_pulse(Duration::from_millis(500), 0.0, 1.0, now)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutput {
    pub vibration: VibrationCommand,
    pub health: RuntimeHealth,
}

pub struct ControlLoop<H: RuntimeHardware> {
    platform: SwervePlatform<H>,
    line_follow: LineFollowController,
    axes: AxisMapConfig,
    cmd_timeout: Duration,

    latest_input: Option<OperatorInput>,
    input_received_at: Option<Instant>,

    homing_debounce: TimedDebounce,
    confirm_debounce: TimedDebounce,
    homing_mode: bool,
    homing_triggered: bool,
    drive_mode: bool,
    line_mode: bool,

    cue: VibrationCue,
    vibration: VibrationModel,
    health: RuntimeHealth,
    fault_reported: bool,
}

impl<H: RuntimeHardware> ControlLoop<H> {
    pub fn new(platform: SwervePlatform<H>, config: &RuntimeConfig, now: Instant) -> Self {
        Self {
            platform,
            line_follow: LineFollowController::new(config.line_follow.clone()),
            axes: config.axes.clone(),
            cmd_timeout: config.runtime.cmd_timeout(),
            latest_input: None,
            input_received_at: None,
            homing_debounce: TimedDebounce::new_at(HOMING_MODE_ACTIVATE, Duration::ZERO, now),
            confirm_debounce: TimedDebounce::new_at(HOMING_CONFIRM_ACTIVATE, Duration::ZERO, now),
            homing_mode: false,
            homing_triggered: false,
            drive_mode: false,
            line_mode: false,
            cue: VibrationCue::Off,
            vibration: VibrationModel::Off,
            health: RuntimeHealth::CmdStale, // Start stale until first input
            fault_reported: false,
        }
    }

    pub fn on_input(&mut self, input: OperatorInput, received_at: Instant) {
        debug!("Received operator input: {:?}", input);
        self.latest_input = Some(input);
        self.input_received_at = Some(received_at);
    }

    pub fn platform(&self) -> &SwervePlatform<H> {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut SwervePlatform<H> {
        &mut self.platform
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn is_homing_mode(&self) -> bool {
        self.homing_mode
    }

    pub fn is_drive_mode(&self) -> bool {
        self.drive_mode
    }

    pub fn stop(&mut self) {
        if let Err(e) = self.platform.stop() {
            warn!("Failed to stop platform: {}", e);
        }
    }

    fn fresh_input(&self, now: Instant) -> Option<OperatorInput> {
        let received_at = self.input_received_at?;
        if now.saturating_duration_since(received_at) > self.cmd_timeout {
            return None;
        }
        self.latest_input
    }

    fn set_cue(&mut self, cue: VibrationCue, now: Instant) {
        if cue != self.cue {
            self.cue = cue;
            self.vibration = cue.model(now);
        }
    }

    /// Log a failed platform call once per fault episode, then stop
    fn report(&mut self, result: platform::Result<()>) {
        match result {
            Ok(()) => self.fault_reported = false,
            Err(e) => {
                if !self.fault_reported {
                    warn!("Platform command failed, stopping: {}", e);
                    self.fault_reported = true;
                }
                self.stop();
            }
        }
    }

    /// Apply stored homes once the encoders report in
    fn retry_calibration(&mut self) {
        match self.platform.initialize_turn_encoder_angles() {
            Ok(()) => {}
            Err(platform::PlatformError::Hardware(e)) => {
                debug!("Steering calibration still waiting: {}", e);
            }
            Err(e) => error!("Steering calibration not applied: {}", e),
        }
    }

    /// One control period
    pub fn tick(&mut self, line: Option<LineIntensity>, now: Instant) -> TickOutput {
        let mut line_mode = false;

        if self.platform.calibration_pending() && !self.platform.hardware().feedback_stale(now) {
            self.retry_calibration();
        }

        match self.fresh_input(now) {
            None => {
                if self.health != RuntimeHealth::CmdStale {
                    warn!("Operator input stale, stopping platform");
                }
                self.drive_mode = false;
                self.homing_mode = false;
                self.homing_debounce.update_at(false, now);
                self.set_cue(VibrationCue::Off, now);
                self.stop();
            }
            Some(input) => {
                self.update_homing(&input, now);
                line_mode = self.update_motion(&input, line, now);
            }
        }

        if self.line_mode && !line_mode {
            self.line_follow.reset();
        }
        self.line_mode = line_mode;

        self.health = self.compute_health(now);
        TickOutput {
            vibration: self.vibration.intensity_at(now),
            health: self.health,
        }
    }

    fn update_homing(&mut self, input: &OperatorInput, now: Instant) {
        let b = &input.buttons;
        let requested = b.lt && b.rt && !b.rb && !self.drive_mode;
        let homing = self.homing_debounce.update_at(requested, now);

        if !homing {
            if self.homing_mode {
                info!("Leaving homing mode");
            }
            self.homing_mode = false;
            return;
        }

        if !self.homing_mode {
            info!("Entering homing mode, hold A to record home positions");
            // Confirmation must be held for its full time after entry
            self.confirm_debounce.update_at(false, now);
            self.homing_mode = true;
        }

        if self.confirm_debounce.update_at(b.a, now) {
            if !self.homing_triggered {
                self.homing_triggered = true;
                match self.platform.home(0.0) {
                    Ok(offsets) => info!("Home positions recorded: {:?}", offsets),
                    Err(e) => error!("Homing failed: {}", e),
                }
            }
            self.set_cue(VibrationCue::HomingConfirmed, now);
        } else {
            self.homing_triggered = false;
            self.set_cue(VibrationCue::HomingArmed, now);
        }
    }

    /// Returns true while line following is active
    fn update_motion(
        &mut self,
        input: &OperatorInput,
        line: Option<LineIntensity>,
        now: Instant,
    ) -> bool {
        let b = &input.buttons;
        let forward = self.axes.longitudinal.map(input.axes.left_y);
        let lateral = self.axes.lateral.map(input.axes.left_x);
        let rotation = self.axes.rotational.map(input.axes.right_x);

        if b.rb {
            if !self.drive_mode {
                if forward == 0.0 && lateral == 0.0 && rotation == 0.0 {
                    info!("Drive mode engaged");
                    self.drive_mode = true;
                    self.set_cue(VibrationCue::DriveEngaged, now);
                } else {
                    // Sticks must be centered before drive engages
                    self.set_cue(VibrationCue::DriveRejected, now);
                    self.stop();
                    return false;
                }
            }
            let result = self.platform.swerve_drive(forward, lateral, rotation);
            self.report(result);
            return false;
        }

        if self.drive_mode {
            info!("Drive mode released");
        }
        self.drive_mode = false;
        if !self.homing_mode {
            self.set_cue(VibrationCue::Off, now);
        }

        if b.lb && !self.homing_mode {
            if !self.line_mode {
                info!("Line follow mode engaged");
            }
            let result =
                self.line_follow
                    .line_follow(&mut self.platform, b.d_up, b.d_down, line);
            self.report(result);
            return true;
        }

        self.stop();
        false
    }

    fn compute_health(&self, now: Instant) -> RuntimeHealth {
        if self.fresh_input(now).is_none() {
            RuntimeHealth::CmdStale
        } else if self.platform.hardware().feedback_stale(now) {
            RuntimeHealth::FeedbackStale
        } else if !self.platform.is_calibrated() {
            RuntimeHealth::Uncalibrated
        } else {
            RuntimeHealth::Ok
        }
    }
}

fn homing_store(config: &RuntimeConfig) -> Box<dyn HomingStore> {
    let path = config
        .runtime
        .homes_file
        .clone()
        .or_else(FileHomingStore::default_path);
    match path {
        Some(path) => {
            info!("Home positions file: {}", path.display());
            Box::new(FileHomingStore::new(path))
        }
        None => {
            warn!("No home positions file (HOME unset), homes kept in memory only");
            Box::new(MemoryHomingStore::new())
        }
    }
}

/// Flag cleared on SIGINT or SIGTERM
fn shutdown_flag() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested");
        r.store(false, Ordering::SeqCst);
    });
    running
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

pub async fn run(config: RuntimeConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let running = shutdown_flag();
    let homes = homing_store(&config);

    let line_sensor = if config.line_sensor.enabled {
        match LineSensor::start(config.line_sensor.sensor_config()) {
            Ok(sensor) => Some(sensor),
            Err(e) => {
                warn!("Line sensor unavailable: {}", e);
                None
            }
        }
    } else {
        info!("Line sensor disabled");
        None
    };

    if config.runtime.simulate {
        info!("Running against simulated hardware");
        let hardware = SimHardware::new(config.platform.max_velocity);
        run_loop(&config, hardware, homes, line_sensor, running).await
    } else {
        let hardware = BridgeHardware::new(config.runtime.feedback_timeout());
        run_loop(&config, hardware, homes, line_sensor, running).await
    }
}

async fn run_loop<H: RuntimeHardware>(
    config: &RuntimeConfig,
    hardware: H,
    homes: Box<dyn HomingStore>,
    line_sensor: Option<LineSensor>,
    running: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let platform = SwervePlatform::new(
        &config.platform.dimensions,
        config.platform.max_velocity,
        homes,
        hardware,
    )?;
    let mut control = ControlLoop::new(platform, config, Instant::now());

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_operator = session.declare_subscriber(TOPIC_CMD_OPERATOR).await?;
    let sub_feedback = session.declare_subscriber(TOPIC_FEEDBACK).await?;
    let pub_actuation = session.declare_publisher(TOPIC_RT_ACTUATION).await?;
    let pub_encoder_zero = session.declare_publisher(TOPIC_RT_ENCODER_ZERO).await?;
    let pub_vibration = session.declare_publisher(TOPIC_RT_VIBRATION).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;
    let pub_line = session.declare_publisher(TOPIC_LINE).await?;

    let mut tick = interval(config.runtime.period());

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        config.runtime.loop_hz,
        config.runtime.cmd_timeout().as_millis()
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_OPERATOR, TOPIC_FEEDBACK);
    info!(
        "Publishing to: {}, {}, {}, {}, {}",
        TOPIC_RT_ACTUATION, TOPIC_RT_ENCODER_ZERO, TOPIC_RT_VIBRATION, TOPIC_HEALTH, TOPIC_LINE
    );

    while running.load(Ordering::SeqCst) {
        tick.tick().await;
        let now = Instant::now();

        // 1. Drain all pending samples (non-blocking), keep latest
        while let Ok(Some(sample)) = sub_operator.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<OperatorInput>(&payload) {
                Ok(input) => control.on_input(input, now),
                Err(e) => warn!("Failed to parse operator input: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_feedback.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<PlatformFeedback>(&payload) {
                Ok(feedback) => control
                    .platform_mut()
                    .hardware_mut()
                    .on_feedback(feedback, now),
                Err(e) => warn!("Failed to parse actuator feedback: {}", e),
            }
        }

        // 2. Run the control tick
        let intensity = line_sensor.as_ref().and_then(LineSensor::proportional);
        let output = control.tick(intensity, now);

        // 3. Publish commands
        let hardware = control.platform_mut().hardware_mut();
        pub_actuation
            .put(serde_json::to_string(&hardware.actuation())?)
            .await?;
        for zero in hardware.drain_encoder_zeros() {
            pub_encoder_zero.put(serde_json::to_string(&zero)?).await?;
        }
        pub_vibration
            .put(serde_json::to_string(&output.vibration)?)
            .await?;

        // 4. Publish state
        pub_health.put(serde_json::to_string(&output.health)?).await?;
        if let Some(sensor) = &line_sensor {
            let state = LineSensorState {
                connected: sensor.is_connected(),
                frame_count: sensor.frame_count(),
                raw: sensor.raw(),
                intensity,
                recovery: sensor.recovery_direction(),
            };
            pub_line.put(serde_json::to_string(&state)?).await?;
        }
    }

    info!("Stopping platform");
    control.stop();
    let hardware = control.platform_mut().hardware_mut();
    pub_actuation
        .put(serde_json::to_string(&hardware.actuation())?)
        .await?;
    pub_vibration
        .put(serde_json::to_string(&VibrationCommand::OFF)?)
        .await?;

    // Joins the acquisition thread
    drop(line_sensor);
    info!("Runtime stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FEEDBACK_TIMEOUT, default_dimensions};
    use crate::hardware::ActuatorCommand;
    use crate::homing::MemoryHomingStore;
    use crate::line_follow::FollowState;
    use crate::messages::{AxisStates, ButtonStates, ModuleFeedback};
    use crate::platform::ModuleIndex;
    use crate::vibration::VibrationStatus;

    const TICK: Duration = Duration::from_millis(20);

    struct Harness {
        control: ControlLoop<SimHardware>,
        now: Instant,
    }

    impl Harness {
        fn new(calibrated: bool) -> Self {
            let config = RuntimeConfig::default();
            let store = if calibrated {
                MemoryHomingStore::with_offsets(ModuleSet::splat(0.0))
            } else {
                MemoryHomingStore::new()
            };
            let platform = SwervePlatform::new(
                &default_dimensions(),
                config.platform.max_velocity,
                Box::new(store),
                SimHardware::new(config.platform.max_velocity),
            )
            .unwrap();
            let now = Instant::now();
            Self {
                control: ControlLoop::new(platform, &config, now),
                now,
            }
        }

        /// Feed the same input every tick for `duration`
        fn hold(&mut self, input: OperatorInput, duration: Duration) -> TickOutput {
            self.hold_with_line(input, None, duration)
        }

        fn hold_with_line(
            &mut self,
            input: OperatorInput,
            line: Option<LineIntensity>,
            duration: Duration,
        ) -> TickOutput {
            let end = self.now + duration;
            let mut output = self.step(input, line);
            while self.now < end {
                output = self.step(input, line);
            }
            output
        }

        fn step(&mut self, input: OperatorInput, line: Option<LineIntensity>) -> TickOutput {
            self.now += TICK;
            self.control.on_input(input, self.now);
            self.control.tick(line, self.now)
        }

        fn hardware(&self) -> &SimHardware {
            self.control.platform().hardware()
        }

        fn stopped(&self) -> bool {
            ModuleIndex::ALL.iter().all(|&m| {
                self.hardware().last_drive(m).is_stop() && self.hardware().last_steer(m).is_stop()
            })
        }
    }

    fn buttons(f: impl FnOnce(&mut ButtonStates)) -> OperatorInput {
        let mut input = OperatorInput::default();
        f(&mut input.buttons);
        input
    }

    fn homing_combo(a: bool) -> OperatorInput {
        buttons(|b| {
            b.lt = true;
            b.rt = true;
            b.a = a;
        })
    }

    #[test]
    fn test_no_input_is_stale() {
        let mut harness = Harness::new(true);
        let output = harness.control.tick(None, harness.now);
        assert_eq!(output.health, RuntimeHealth::CmdStale);
        assert!(harness.stopped());
    }

    #[test]
    fn test_watchdog_stops_drive() {
        let mut harness = Harness::new(true);
        let rb = buttons(|b| b.rb = true);
        harness.hold(rb, Duration::from_millis(100));

        let mut driving = rb;
        driving.axes.left_y = 1.0;
        let output = harness.hold(driving, Duration::from_millis(100));
        assert_eq!(output.health, RuntimeHealth::Ok);
        assert!(!harness.stopped());

        // No new input for longer than the watchdog
        let later = harness.now + Duration::from_millis(300);
        let output = harness.control.tick(None, later);
        assert_eq!(output.health, RuntimeHealth::CmdStale);
        assert!(harness.stopped());
        assert!(!harness.control.is_drive_mode());
    }

    #[test]
    fn test_drive_requires_centered_sticks() {
        let mut harness = Harness::new(true);
        let mut input = buttons(|b| b.rb = true);
        input.axes = AxisStates {
            left_y: 0.9,
            ..Default::default()
        };

        let output = harness.hold(input, Duration::from_millis(100));
        assert!(!harness.control.is_drive_mode());
        assert!(harness.stopped());
        // Synchronized pulse on both sides
        assert_eq!(output.vibration.left, output.vibration.right);

        // Centering engages drive with a short confirmation rumble
        input.axes.left_y = 0.0;
        let output = harness.hold(input, TICK);
        assert!(harness.control.is_drive_mode());
        assert_eq!(output.vibration, VibrationStatus::new(0.3, 0.3));

        // Once engaged, stick moves drive the platform
        input.axes.left_y = 1.0;
        let output = harness.hold(input, Duration::from_millis(600));
        assert_eq!(
            harness.hardware().last_drive(ModuleIndex::FrontLeft),
            ActuatorCommand::PercentOutput(1.0)
        );
        assert_eq!(output.vibration, VibrationStatus::OFF);
    }

    #[test]
    fn test_dead_band_holds_still() {
        let mut harness = Harness::new(true);
        let mut input = buttons(|b| b.rb = true);
        harness.hold(input, TICK);

        input.axes.left_x = 0.1;
        input.axes.right_x = -0.12;
        harness.hold(input, Duration::from_millis(100));
        assert!(harness.control.is_drive_mode());
        assert!(harness.stopped());
    }

    #[test]
    fn test_release_stops_and_silences() {
        let mut harness = Harness::new(true);
        let mut input = buttons(|b| b.rb = true);
        harness.hold(input, TICK);
        input.axes.left_y = 0.5;
        harness.hold(input, Duration::from_millis(100));

        let output = harness.hold(OperatorInput::default(), TICK);
        assert!(harness.stopped());
        assert!(!harness.control.is_drive_mode());
        assert_eq!(output.vibration, VibrationStatus::OFF);
    }

    #[test]
    fn test_homing_needs_two_second_hold() {
        let mut harness = Harness::new(false);
        harness
            .hardware_mut_for_test()
            .set_mechanical_angle(ModuleIndex::RearLeft, 42.0);

        harness.hold(homing_combo(false), Duration::from_millis(1900));
        assert!(!harness.control.is_homing_mode());

        // Release restarts the hold
        harness.hold(OperatorInput::default(), TICK);
        harness.hold(homing_combo(false), Duration::from_millis(2100));
        assert!(harness.control.is_homing_mode());
        assert!(!harness.control.platform().is_calibrated());

        // A alone for under a second does nothing
        harness.hold(homing_combo(true), Duration::from_millis(800));
        assert!(!harness.control.platform().is_calibrated());

        let output = harness.hold(homing_combo(true), Duration::from_millis(400));
        assert!(harness.control.platform().is_calibrated());
        assert_eq!(output.vibration, VibrationStatus::new(0.5, 0.5));
        assert!(harness.hardware().encoder_position(ModuleIndex::RearLeft).abs() < 1e-9);

        let output = harness.hold(OperatorInput::default(), TICK);
        assert!(!harness.control.is_homing_mode());
        assert_eq!(output.health, RuntimeHealth::Ok);
        assert_eq!(output.vibration, VibrationStatus::OFF);
    }

    #[test]
    fn test_homing_triggers_once_per_press() {
        let mut harness = Harness::new(false);
        harness.hold(homing_combo(false), Duration::from_millis(2100));
        harness.hold(homing_combo(true), Duration::from_millis(1100));
        assert!(harness.control.platform().is_calibrated());

        // Moving a wheel while A stays held does not re-home
        harness
            .hardware_mut_for_test()
            .set_mechanical_angle(ModuleIndex::FrontLeft, 20.0);
        harness.hold(homing_combo(true), Duration::from_millis(500));
        assert!(
            (harness.hardware().encoder_position(ModuleIndex::FrontLeft) - 20.0).abs() < 1e-9
        );
    }

    #[test]
    fn test_homing_blocked_in_drive_mode() {
        let mut harness = Harness::new(true);
        harness.hold(buttons(|b| b.rb = true), TICK);
        let combo = buttons(|b| {
            b.rb = true;
            b.lt = true;
            b.rt = true;
        });
        harness.hold(combo, Duration::from_millis(2500));
        assert!(!harness.control.is_homing_mode());
    }

    #[test]
    fn test_uncalibrated_health_and_refusal() {
        let mut harness = Harness::new(false);
        let mut input = buttons(|b| b.rb = true);
        harness.hold(input, TICK);
        input.axes.left_y = 1.0;
        let output = harness.hold(input, Duration::from_millis(100));
        assert_eq!(output.health, RuntimeHealth::Uncalibrated);
        assert!(harness.stopped());
    }

    #[test]
    fn test_line_follow_mode() {
        let mut harness = Harness::new(true);
        let line = Some(LineIntensity::new(0.0, 1.0, 0.0));
        let forward = buttons(|b| {
            b.lb = true;
            b.d_up = true;
        });

        harness.hold_with_line(forward, line, Duration::from_millis(100));
        assert!(!harness.stopped());

        // No direction requested: stop
        harness.hold_with_line(buttons(|b| b.lb = true), line, TICK);
        assert!(harness.stopped());

        // Full-width line moving forward twice puts the controller in end stop
        harness.hold_with_line(forward, line, TICK);
        let full = Some(LineIntensity::new(1.0, 1.0, 1.0));
        harness.hold_with_line(forward, full, TICK);
        assert!(harness.stopped());
        assert_eq!(harness.control.line_follow.state(), FollowState::EndStop);

        // Leaving the mode resets it
        harness.hold(OperatorInput::default(), TICK);
        assert_eq!(harness.control.line_follow.state(), FollowState::Normal);
    }

    #[test]
    fn test_hardware_loss_stops_and_recovers() {
        let mut harness = Harness::new(true);
        let mut input = buttons(|b| b.rb = true);
        harness.hold(input, TICK);
        input.axes.left_y = 0.5;

        harness.hardware_mut_for_test().set_available(false);
        harness.hold(input, Duration::from_millis(60));
        assert!(harness.control.fault_reported);

        harness.hardware_mut_for_test().set_available(true);
        harness.hold(input, TICK);
        assert!(!harness.control.fault_reported);
        assert!(!harness.stopped());
    }

    #[test]
    fn test_bridge_feedback_staleness_reported() {
        let config = RuntimeConfig::default();
        let platform = SwervePlatform::new(
            &default_dimensions(),
            config.platform.max_velocity,
            Box::new(MemoryHomingStore::new()),
            BridgeHardware::new(FEEDBACK_TIMEOUT),
        )
        .unwrap();
        let now = Instant::now();
        let mut control = ControlLoop::new(platform, &config, now);

        control.on_input(OperatorInput::default(), now);
        let output = control.tick(None, now);
        assert_eq!(output.health, RuntimeHealth::FeedbackStale);
        assert!(control.platform().hardware().actuation().is_stop());
        // Nothing stored, nothing to retry
        assert!(!control.platform().calibration_pending());
    }

    fn bridge_feedback(absolute_angle: f64) -> PlatformFeedback {
        PlatformFeedback {
            modules: ModuleSet::splat(ModuleFeedback {
                absolute_angle,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_stored_homes_applied_once_bridge_feedback_arrives() {
        let config = RuntimeConfig::default();
        let store = MemoryHomingStore::with_offsets(ModuleSet::splat(10.0));
        let platform = SwervePlatform::new(
            &default_dimensions(),
            config.platform.max_velocity,
            Box::new(store),
            BridgeHardware::new(FEEDBACK_TIMEOUT),
        )
        .unwrap();
        assert!(!platform.is_calibrated());
        assert!(platform.calibration_pending());

        let mut now = Instant::now();
        let mut control = ControlLoop::new(platform, &config, now);

        // Still no feedback: the load stays pending
        control.on_input(OperatorInput::default(), now);
        let mut output = control.tick(None, now);
        assert_eq!(output.health, RuntimeHealth::FeedbackStale);
        assert!(control.platform().calibration_pending());
        assert!(!control.platform().is_calibrated());

        let enable = buttons(|b| b.rb = true);
        let mut driving = enable;
        driving.axes.left_y = 1.0;
        for i in 0..50 {
            now += TICK;
            control
                .platform_mut()
                .hardware_mut()
                .on_feedback(bridge_feedback(10.0), now);
            control.on_input(if i < 5 { enable } else { driving }, now);
            output = control.tick(None, now);
        }

        assert!(control.platform().is_calibrated());
        assert!(!control.platform().calibration_pending());
        assert_eq!(output.health, RuntimeHealth::Ok);
        assert!(!control.platform().hardware().actuation().is_stop());

        // One re-zero per module, to the stored origin
        let zeros = control.platform_mut().hardware_mut().drain_encoder_zeros();
        assert_eq!(zeros.len(), 4);
        assert!(zeros.iter().all(|z| z.position.abs() < 1e-9));
    }

    impl Harness {
        fn hardware_mut_for_test(&mut self) -> &mut SimHardware {
            self.control.platform_mut().hardware_mut()
        }
    }
}
