//! Tank-tread motor control.
//!
//! Each tread has a PWM speed lane and a forward/reverse direction pin pair.
//! Signed speeds in [-100, 100] map magnitude to duty cycle and sign to the
//! direction pins; zero coasts (both pins low).

use core::fmt;

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;

use super::bus::MotorLanes;

/// Errors from drive commands.
#[derive(Debug)]
pub enum MotorError<PE: fmt::Debug, DE: fmt::Debug> {
    /// Speed outside [-100, 100]; neither tread was touched.
    SpeedOutOfRange(i16),
    /// Duty-cycle write failed.
    Pwm(PE),
    /// Direction pin write failed.
    Pin(DE),
}

impl<PE: fmt::Debug, DE: fmt::Debug> fmt::Display for MotorError<PE, DE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotorError::SpeedOutOfRange(speed) => {
                write!(f, "speed {speed} outside [-100, 100]")
            }
            MotorError::Pwm(e) => write!(f, "duty-cycle write failed: {e:?}"),
            MotorError::Pin(e) => write!(f, "direction pin write failed: {e:?}"),
        }
    }
}

/// Drives both treads through their acquired lane bundles.
pub struct MotorController<PWM, DIR> {
    left: MotorLanes<PWM, DIR>,
    right: MotorLanes<PWM, DIR>,
}

impl<PWM, DIR> MotorController<PWM, DIR>
where
    PWM: SetDutyCycle,
    DIR: OutputPin,
{
    pub fn new(left: MotorLanes<PWM, DIR>, right: MotorLanes<PWM, DIR>) -> Self {
        let mut motors = Self { left, right };
        // Known state from the first instant: both treads coasting.
        motors.stop();
        motors
    }

    /// Drive both treads with signed speeds in [-100, 100].
    ///
    /// Both values are validated before either side is touched.
    pub fn drive(
        &mut self,
        left: i16,
        right: i16,
    ) -> Result<(), MotorError<PWM::Error, DIR::Error>> {
        for speed in [left, right] {
            if !(-100..=100).contains(&speed) {
                return Err(MotorError::SpeedOutOfRange(speed));
            }
        }
        apply(&mut self.left, left)?;
        apply(&mut self.right, right)?;
        tracing::info!(left, right, "treads driving");
        Ok(())
    }

    /// Force both treads to a stop.
    ///
    /// Best-effort and safe in any state; used on shutdown and after
    /// unrecoverable faults, so individual pin errors are logged, not returned.
    pub fn stop(&mut self) {
        for lane in [&mut self.left, &mut self.right] {
            if lane.pwm.set_duty_cycle_fully_off().is_err() {
                tracing::warn!("tread PWM did not acknowledge stop");
            }
            if lane.forward.set_low().is_err() || lane.reverse.set_low().is_err() {
                tracing::warn!("tread direction pins did not acknowledge stop");
            }
        }
        tracing::info!("treads stopped");
    }
}

fn apply<PWM, DIR>(
    lane: &mut MotorLanes<PWM, DIR>,
    speed: i16,
) -> Result<(), MotorError<PWM::Error, DIR::Error>>
where
    PWM: SetDutyCycle,
    DIR: OutputPin,
{
    match speed.cmp(&0) {
        core::cmp::Ordering::Greater => {
            lane.forward.set_high().map_err(MotorError::Pin)?;
            lane.reverse.set_low().map_err(MotorError::Pin)?;
        }
        core::cmp::Ordering::Less => {
            lane.forward.set_low().map_err(MotorError::Pin)?;
            lane.reverse.set_high().map_err(MotorError::Pin)?;
        }
        core::cmp::Ordering::Equal => {
            lane.forward.set_low().map_err(MotorError::Pin)?;
            lane.reverse.set_low().map_err(MotorError::Pin)?;
        }
    }
    lane.pwm
        .set_duty_cycle_percent(speed.unsigned_abs() as u8)
        .map_err(MotorError::Pwm)
}
