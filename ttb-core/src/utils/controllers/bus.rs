//! Physical bus ownership.
//!
//! Every peripheral handle is acquired here exactly once per process and
//! injected into its driver; no other component opens hardware. The I2C bus
//! behind the PWM expander is shared through `RefCellDevice` so each register
//! transaction is whole before another writer runs, and every other resource
//! has a single owner for the process lifetime.

use core::cell::RefCell;
use core::fmt;

use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use embedded_hal::pwm::SetDutyCycle;
use embedded_hal_async::digital::Wait;
use embedded_hal_bus::i2c::RefCellDevice;
use pwm_pca9685::{Address as PwmAddress, Error as PwmError, Pca9685};
use smart_leds_trait::{SmartLedsWrite, RGB8};

/// Internal oscillator of the PWM expander, Hz.
const PWM_OSCILLATOR_HZ: f32 = 25_000_000.0;

/// HAL resource bundle for one board wiring.
///
/// A platform binary (or a test harness) implements this once to name the
/// concrete pin, bus, and strip types the registry manages.
pub trait RobotPlatform {
    type I2c: I2c + 'static;
    type Led: SmartLedsWrite<Color = RGB8>;
    type MotorPwm: SetDutyCycle;
    type DirPin: OutputPin;
    type TrigPin: OutputPin;
    type EchoPin: Wait;
}

/// PWM + direction pins of one tread motor, owned as a unit.
pub struct MotorLanes<PWM, DIR> {
    pub pwm: PWM,
    pub forward: DIR,
    pub reverse: DIR,
}

/// Trigger/echo pin pair of one ultrasonic sensor.
pub struct SonarLanes<T, E> {
    pub trigger: T,
    pub echo: E,
}

/// The physical buses the registry arbitrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    PwmExpander,
    LedStrip,
    Motors,
    Sonar,
}

/// Failures while handing out a bus.
#[derive(Debug)]
pub enum BusError<E: fmt::Debug> {
    /// The resource is already claimed or was never provided.
    Unavailable(BusKind),
    /// The PWM expander did not come up.
    Init(PwmError<E>),
}

impl<E: fmt::Debug> fmt::Display for BusError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Unavailable(kind) => write!(f, "bus {kind:?} unavailable"),
            BusError::Init(e) => write!(f, "PWM expander init failed: {e:?}"),
        }
    }
}

/// Exclusive handle to the PWM expander on the shared I2C bus.
pub type PwmBus<I2C> = Pca9685<RefCellDevice<'static, I2C>>;

type I2cErrorOf<P> = <<P as RobotPlatform>::I2c as embedded_hal::i2c::ErrorType>::Error;

/// Owns the physical resources and hands each out at most once.
pub struct BusRegistry<P: RobotPlatform> {
    i2c: &'static RefCell<P::I2c>,
    pwm_claimed: bool,
    led: Option<P::Led>,
    motors: Option<(MotorLanes<P::MotorPwm, P::DirPin>, MotorLanes<P::MotorPwm, P::DirPin>)>,
    sonar: Option<SonarLanes<P::TrigPin, P::EchoPin>>,
}

impl<P: RobotPlatform> BusRegistry<P> {
    pub fn new(
        i2c: &'static RefCell<P::I2c>,
        led: P::Led,
        left: MotorLanes<P::MotorPwm, P::DirPin>,
        right: MotorLanes<P::MotorPwm, P::DirPin>,
        sonar: SonarLanes<P::TrigPin, P::EchoPin>,
    ) -> Self {
        Self {
            i2c,
            pwm_claimed: false,
            led: Some(led),
            motors: Some((left, right)),
            sonar: Some(sonar),
        }
    }

    /// Bring up the PWM expander and hand out its exclusive handle.
    ///
    /// Enables the chip and programs the prescaler for `frequency` Hz.
    pub fn acquire_pwm(
        &mut self,
        address: u8,
        frequency: f32,
    ) -> Result<PwmBus<P::I2c>, BusError<I2cErrorOf<P>>> {
        if self.pwm_claimed {
            return Err(BusError::Unavailable(BusKind::PwmExpander));
        }
        let mut pwm = Pca9685::new(RefCellDevice::new(self.i2c), PwmAddress::from(address))
            .map_err(BusError::Init)?;
        pwm.enable().map_err(BusError::Init)?;
        pwm.set_prescale(prescale_for(frequency)).map_err(BusError::Init)?;
        self.pwm_claimed = true;
        tracing::info!(address, frequency, "PWM expander up");
        Ok(pwm)
    }

    /// Park the expander handle again; the chip is disabled best-effort.
    pub fn release_pwm(&mut self, mut pwm: PwmBus<P::I2c>) {
        if pwm.disable().is_err() {
            tracing::warn!("PWM expander did not acknowledge disable");
        }
        self.pwm_claimed = false;
    }

    pub fn acquire_led(&mut self) -> Result<P::Led, BusError<I2cErrorOf<P>>> {
        self.led
            .take()
            .ok_or(BusError::Unavailable(BusKind::LedStrip))
    }

    pub fn release_led(&mut self, led: P::Led) {
        self.led = Some(led);
    }

    /// Both tread motor lane bundles, left then right.
    #[allow(clippy::type_complexity)]
    pub fn acquire_motors(
        &mut self,
    ) -> Result<
        (MotorLanes<P::MotorPwm, P::DirPin>, MotorLanes<P::MotorPwm, P::DirPin>),
        BusError<I2cErrorOf<P>>,
    > {
        self.motors
            .take()
            .ok_or(BusError::Unavailable(BusKind::Motors))
    }

    pub fn release_motors(
        &mut self,
        left: MotorLanes<P::MotorPwm, P::DirPin>,
        right: MotorLanes<P::MotorPwm, P::DirPin>,
    ) {
        self.motors = Some((left, right));
    }

    pub fn acquire_sonar(
        &mut self,
    ) -> Result<SonarLanes<P::TrigPin, P::EchoPin>, BusError<I2cErrorOf<P>>> {
        self.sonar
            .take()
            .ok_or(BusError::Unavailable(BusKind::Sonar))
    }

    pub fn release_sonar(&mut self, sonar: SonarLanes<P::TrigPin, P::EchoPin>) {
        self.sonar = Some(sonar);
    }
}

/// Prescale register value for a target output frequency.
pub fn prescale_for(frequency: f32) -> u8 {
    let raw = libm::roundf(PWM_OSCILLATOR_HZ / (4096.0 * frequency)) - 1.0;
    raw.clamp(3.0, 255.0) as u8
}
