// Hardware bridge over the pub/sub transport
//
// The actuator process publishes `PlatformFeedback`; the runtime feeds each
// sample in with `on_feedback`. Commands are queued here and published by the
// runtime once per tick. Feedback older than the timeout reads as unavailable,
// which makes the platform fall back to a stop.

use std::time::{Duration, Instant};

use tracing::warn;

use super::{ActuatorCommand, ActuatorFeedback, HardwareError, Result, SwerveHardware};
use crate::messages::{EncoderZeroCommand, PlatformActuation, PlatformFeedback};
use crate::platform::ModuleIndex;

pub struct BridgeHardware {
    feedback: Option<PlatformFeedback>,
    received_at: Option<Instant>,
    timeout: Duration,
    actuation: PlatformActuation,
    encoder_zeros: Vec<EncoderZeroCommand>,
    was_stale: bool,
}

impl BridgeHardware {
    pub fn new(timeout: Duration) -> Self {
        Self {
            feedback: None,
            received_at: None,
            timeout,
            actuation: PlatformActuation::default(),
            encoder_zeros: Vec::new(),
            was_stale: false,
        }
    }

    /// Store the latest feedback sample
    pub fn on_feedback(&mut self, feedback: PlatformFeedback, received_at: Instant) {
        if self.was_stale {
            warn!("Actuator feedback restored");
            self.was_stale = false;
        }
        self.feedback = Some(feedback);
        self.received_at = Some(received_at);
    }

    /// Latest commands for all eight actuators
    pub fn actuation(&self) -> &PlatformActuation {
        &self.actuation
    }

    /// Encoder re-zero requests queued since the last call
    pub fn drain_encoder_zeros(&mut self) -> Vec<EncoderZeroCommand> {
        std::mem::take(&mut self.encoder_zeros)
    }

    pub fn is_stale_at(&self, now: Instant) -> bool {
        match self.received_at {
            Some(at) => now.saturating_duration_since(at) > self.timeout,
            None => true,
        }
    }

    fn fresh_feedback(&mut self) -> Result<&mut PlatformFeedback> {
        if self.is_stale_at(Instant::now()) {
            if !self.was_stale {
                warn!("Actuator feedback stale (timeout {:?})", self.timeout);
                self.was_stale = true;
            }
            return Err(HardwareError::Unavailable(
                "actuator feedback stale".to_string(),
            ));
        }
        self.feedback
            .as_mut()
            .ok_or_else(|| HardwareError::Unavailable("no actuator feedback".to_string()))
    }
}

impl SwerveHardware for BridgeHardware {
    fn set_drive(&mut self, module: ModuleIndex, command: ActuatorCommand) -> Result<()> {
        self.actuation.drive[module] = command;
        Ok(())
    }

    fn set_steer(&mut self, module: ModuleIndex, command: ActuatorCommand) -> Result<()> {
        self.actuation.steer[module] = command;
        Ok(())
    }

    fn drive_feedback(&mut self, module: ModuleIndex) -> Result<ActuatorFeedback> {
        Ok(self.fresh_feedback()?.modules[module].drive)
    }

    fn steer_feedback(&mut self, module: ModuleIndex) -> Result<ActuatorFeedback> {
        Ok(self.fresh_feedback()?.modules[module].steer)
    }

    fn absolute_angle(&mut self, module: ModuleIndex) -> Result<f64> {
        Ok(self.fresh_feedback()?.modules[module].absolute_angle)
    }

    fn set_encoder_position(&mut self, module: ModuleIndex, position: f64) -> Result<()> {
        // Reflect the new origin locally until the next feedback sample arrives
        self.fresh_feedback()?.modules[module].steer.position = position;
        self.encoder_zeros.push(EncoderZeroCommand { module, position });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ModuleFeedback;
    use crate::platform::ModuleSet;

    fn feedback_with_absolute(angle: f64) -> PlatformFeedback {
        PlatformFeedback {
            modules: ModuleSet::splat(ModuleFeedback {
                absolute_angle: angle,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_no_feedback_is_unavailable() {
        let mut bridge = BridgeHardware::new(Duration::from_millis(100));
        assert!(matches!(
            bridge.absolute_angle(ModuleIndex::FrontLeft),
            Err(HardwareError::Unavailable(_))
        ));
        // Commands are still accepted so a stop can always go out
        bridge
            .set_drive(ModuleIndex::FrontLeft, ActuatorCommand::STOP)
            .unwrap();
    }

    #[test]
    fn test_fresh_feedback_is_read() {
        let mut bridge = BridgeHardware::new(Duration::from_secs(5));
        bridge.on_feedback(feedback_with_absolute(212.0), Instant::now());
        assert_eq!(bridge.absolute_angle(ModuleIndex::RearRight).unwrap(), 212.0);
    }

    #[test]
    fn test_stale_feedback() {
        let mut bridge = BridgeHardware::new(Duration::from_millis(100));
        let now = Instant::now();
        bridge.on_feedback(feedback_with_absolute(0.0), now);
        assert!(!bridge.is_stale_at(now + Duration::from_millis(50)));
        assert!(bridge.is_stale_at(now + Duration::from_millis(150)));
    }

    #[test]
    fn test_encoder_zero_is_queued_and_reflected() {
        let mut bridge = BridgeHardware::new(Duration::from_secs(5));
        bridge.on_feedback(feedback_with_absolute(10.0), Instant::now());
        bridge
            .set_encoder_position(ModuleIndex::FrontRight, -15.0)
            .unwrap();

        let steer = bridge.steer_feedback(ModuleIndex::FrontRight).unwrap();
        assert_eq!(steer.position, -15.0);

        let queued = bridge.drain_encoder_zeros();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].module, ModuleIndex::FrontRight);
        assert!(bridge.drain_encoder_zeros().is_empty());
    }
}
