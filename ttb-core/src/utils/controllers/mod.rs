//! Module Exports
//!
//! This file exports the hardware coordination modules of the robot.
//!
//! - `bus`: physical bus ownership and the platform resource bundle
//! - `channel_map`: logical-name to physical-address resolution
//! - `servo`, `motor`, `sensor`, `leds`: the peripheral drivers
//!
//! [`SystemController`] is the single entry point external controllers use;
//! commands arrive either through its methods or over [`MOTION_CHANNEL`] /
//! [`LED_CHANNEL`].

pub mod bus;
pub mod channel_map;
pub mod leds;
pub mod motor;
pub mod sensor;
pub mod servo;

use alloc::string::String;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Duration;
use serde::{Deserialize, Serialize};

pub use leds::LED_CHANNEL;

use crate::utils::config::RobotConfig;
use self::bus::{BusError, BusRegistry, RobotPlatform};
use self::channel_map::ChannelMap;
use self::leds::{LedCommand, LedError, LedRequest};
use self::motor::{MotorController, MotorError};
use self::sensor::{DistanceSample, SensorError, UltrasonicSensor};
use self::servo::{ServoDriver, ServoError};

/// Channel used to receive servo/motor/sensor commands (`MotionCommand`).
pub static MOTION_CHANNEL: embassy_sync::channel::Channel<
    CriticalSectionRawMutex,
    MotionCommand,
    16,
> = embassy_sync::channel::Channel::new();

/// Top-level command envelope as it arrives off the wire.
///
/// Serialized as JSON with tag `"ct"` (command type).
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "ct", rename_all = "snake_case")]
pub enum SystemCommand {
    V(ServoCommand),
    M(MotorCommand),
    R(RangeCommand),
    L(LedCommand),
}

/// Servo command variants, tag `"vc"`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "vc", rename_all = "snake_case")]
pub enum ServoCommand {
    /// Absolute move in degrees.
    Set { name: String, deg: f32 },
    /// Relative move from the last commanded position.
    Adjust { name: String, delta: f32 },
    /// Every servo to its configured default angle.
    Home,
}

/// Motor command variants, tag `"mc"`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(tag = "mc", rename_all = "snake_case")]
pub enum MotorCommand {
    /// Signed tread speeds in [-100, 100].
    Drive { l: i16, r: i16 },
    Stop,
}

/// Distance sensor command variants, tag `"rc"`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(tag = "rc", rename_all = "snake_case")]
pub enum RangeCommand {
    Measure { timeout_ms: u64 },
}

/// Commands routed to the facade's command loop.
#[derive(Debug, Clone)]
pub enum MotionCommand {
    Servo(ServoCommand),
    Motor(MotorCommand),
    Range(RangeCommand),
}

type I2cErrOf<P> = <<P as RobotPlatform>::I2c as embedded_hal::i2c::ErrorType>::Error;
type PwmErrOf<P> = <<P as RobotPlatform>::MotorPwm as embedded_hal::pwm::ErrorType>::Error;
type DirErrOf<P> = <<P as RobotPlatform>::DirPin as embedded_hal::digital::ErrorType>::Error;
type TrigErrOf<P> = <<P as RobotPlatform>::TrigPin as embedded_hal::digital::ErrorType>::Error;
type EchoErrOf<P> = <<P as RobotPlatform>::EchoPin as embedded_hal::digital::ErrorType>::Error;

/// Thread-safe command surface around the peripheral drivers.
///
/// Built once at startup from the bus registry and channel map. If the PWM
/// expander does not come up the controller still runs with servo control
/// disabled; motors, sonar, and LEDs stay live.
pub struct SystemController<P: RobotPlatform> {
    servos: Option<ServoDriver<P::I2c>>,
    motors: MotorController<P::MotorPwm, P::DirPin>,
    sonar: UltrasonicSensor<P::TrigPin, P::EchoPin>,
}

impl<P: RobotPlatform> SystemController<P> {
    pub fn new(
        registry: &mut BusRegistry<P>,
        map: &ChannelMap,
        cfg: &RobotConfig,
    ) -> Result<Self, BusError<I2cErrOf<P>>> {
        let servos = match registry.acquire_pwm(cfg.pwm.address, cfg.pwm.frequency) {
            Ok(pwm) => Some(ServoDriver::new(pwm, map, cfg.pwm.frequency)),
            Err(error) => {
                tracing::warn!(?error, "PWM expander unavailable, servo control disabled");
                None
            }
        };

        let (left, right) = registry.acquire_motors()?;
        let sonar = UltrasonicSensor::new(registry.acquire_sonar()?);

        Ok(SystemController {
            servos,
            motors: MotorController::new(left, right),
            sonar,
        })
    }

    /// Whether servo control came up at startup.
    pub fn servos_available(&self) -> bool {
        self.servos.is_some()
    }

    pub fn set_servo_angle(
        &mut self,
        name: &str,
        degrees: f32,
    ) -> Result<(), ServoError<I2cErrOf<P>>> {
        self.servos
            .as_mut()
            .ok_or(ServoError::PwmNotInitialized)?
            .set_angle(name, degrees)
    }

    pub fn adjust_servo(
        &mut self,
        name: &str,
        delta: f32,
    ) -> Result<f32, ServoError<I2cErrOf<P>>> {
        self.servos
            .as_mut()
            .ok_or(ServoError::PwmNotInitialized)?
            .adjust_angle(name, delta)
    }

    pub fn home_servos(&mut self) -> Result<(), ServoError<I2cErrOf<P>>> {
        self.servos
            .as_mut()
            .ok_or(ServoError::PwmNotInitialized)?
            .home_all()
    }

    pub fn drive(
        &mut self,
        left: i16,
        right: i16,
    ) -> Result<(), MotorError<PwmErrOf<P>, DirErrOf<P>>> {
        self.motors.drive(left, right)
    }

    pub fn stop(&mut self) {
        self.motors.stop();
    }

    pub async fn measure_distance(
        &mut self,
        timeout: Duration,
    ) -> Result<DistanceSample, SensorError<TrigErrOf<P>, EchoErrOf<P>>> {
        self.sonar.measure(timeout).await
    }

    /// Request the animation loop to blank and idle.
    pub async fn led_pause(&self) {
        LED_CHANNEL.send(LedRequest::Pause).await;
    }

    /// Request the animation loop to return to its last active mode.
    pub async fn led_resume(&self) {
        LED_CHANNEL.send(LedRequest::Resume).await;
    }

    /// Request a solid color, validating channels before anything is enqueued.
    pub async fn led_set_solid(&self, r: u16, g: u16, b: u16) -> Result<(), LedError> {
        let request = LedRequest::try_from(LedCommand::Solid { r, g, b })?;
        LED_CHANNEL.send(request).await;
        Ok(())
    }

    /// Re-trigger the one-shot startup sequence.
    pub async fn led_startup(&self) {
        LED_CHANNEL.send(LedRequest::Startup).await;
    }

    /// Drain motion commands forever, running each to completion in order.
    pub async fn command_loop(&mut self) -> ! {
        loop {
            let command = MOTION_CHANNEL.receiver().receive().await;
            tracing::info!(?command, "received motion command");
            match command {
                MotionCommand::Servo(ServoCommand::Set { name, deg }) => {
                    if let Err(error) = self.set_servo_angle(&name, deg) {
                        tracing::error!(%error, %name, "servo move failed");
                    }
                }
                MotionCommand::Servo(ServoCommand::Adjust { name, delta }) => {
                    match self.adjust_servo(&name, delta) {
                        Ok(angle) => tracing::info!(%name, angle, "servo adjusted"),
                        Err(error) => tracing::error!(%error, %name, "servo adjust failed"),
                    }
                }
                MotionCommand::Servo(ServoCommand::Home) => {
                    if let Err(error) = self.home_servos() {
                        tracing::error!(%error, "servo homing failed");
                    }
                }
                MotionCommand::Motor(MotorCommand::Drive { l, r }) => {
                    if let Err(error) = self.drive(l, r) {
                        tracing::error!(%error, "drive command failed");
                    }
                }
                MotionCommand::Motor(MotorCommand::Stop) => self.stop(),
                MotionCommand::Range(RangeCommand::Measure { timeout_ms }) => {
                    match self.measure_distance(Duration::from_millis(timeout_ms)).await {
                        Ok(sample) => {
                            tracing::info!(distance_cm = sample.distance_cm, "distance sample")
                        }
                        Err(error) => tracing::warn!(%error, "distance measurement failed"),
                    }
                }
            }
        }
    }

    /// Teardown order: blank the strip, stop the treads, home the servos.
    pub async fn shutdown(&mut self) {
        LED_CHANNEL.send(LedRequest::Shutdown).await;
        self.motors.stop();
        if let Some(servos) = &mut self.servos {
            if let Err(error) = servos.home_all() {
                tracing::warn!(%error, "servos did not reach safe position");
            }
        }
    }
}
