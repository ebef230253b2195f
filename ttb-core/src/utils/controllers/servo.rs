//! Calibrated servo control through the PWM expander.
//!
//! Logical angles are validated against each servo's calibrated range, mapped
//! linearly to a pulse width, and written as 12-bit on/off counts. Rejected
//! angles never touch the bus; clamping would mask wiring or calibration
//! errors, so out-of-range requests are errors instead.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use embedded_hal::i2c::I2c;
use embedded_hal_bus::i2c::RefCellDevice;
use hashbrown::HashMap;
use pwm_pca9685::{Channel, Error as PwmError};

use super::bus::PwmBus;
use super::channel_map::{ChannelMap, PwmChannelSpec};

/// Errors from servo operations.
#[derive(Debug)]
pub enum ServoError<E: fmt::Debug> {
    /// No servo is configured under this logical name.
    UnknownServo(String),
    /// Requested angle is outside the calibrated range; nothing was written.
    AngleOutOfRange { angle: f32, min: f32, max: f32 },
    /// The PWM expander was never brought up.
    PwmNotInitialized,
    /// The register write failed.
    Bus(PwmError<E>),
}

impl<E: fmt::Debug> fmt::Display for ServoError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServoError::UnknownServo(name) => write!(f, "unknown servo {name:?}"),
            ServoError::AngleOutOfRange { angle, min, max } => {
                write!(f, "angle {angle} outside calibrated range [{min}, {max}]")
            }
            ServoError::PwmNotInitialized => write!(f, "PWM expander not initialized"),
            ServoError::Bus(e) => write!(f, "PWM write failed: {e:?}"),
        }
    }
}

/// Drives every configured servo through the shared PWM expander handle.
pub struct ServoDriver<I2C: 'static> {
    pwm: PwmBus<I2C>,
    channels: HashMap<String, (Channel, PwmChannelSpec)>,
    positions: HashMap<String, f32>,
    period_us: f32,
}

impl<I2C, E> ServoDriver<I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: fmt::Debug,
{
    /// Build the driver over an acquired expander handle.
    ///
    /// The channel map has already validated channel indices, so entries that
    /// still fail to convert are dropped with a warning rather than panicking.
    pub fn new(pwm: PwmBus<I2C>, map: &ChannelMap, frequency: f32) -> Self {
        let mut channels = HashMap::new();
        for (name, spec) in map.servo_specs() {
            match expander_channel(spec.channel) {
                Some(channel) => {
                    channels.insert(name.to_string(), (channel, *spec));
                }
                None => tracing::warn!(name, channel = spec.channel, "servo channel dropped"),
            }
        }
        Self {
            pwm,
            channels,
            positions: HashMap::new(),
            period_us: 1_000_000.0 / frequency,
        }
    }

    /// Move a servo to an absolute angle in degrees.
    ///
    /// The last-commanded position is recorded only after a successful write.
    pub fn set_angle(&mut self, name: &str, angle: f32) -> Result<(), ServoError<E>> {
        let (channel, spec) = *self
            .channels
            .get(name)
            .ok_or_else(|| ServoError::UnknownServo(name.to_string()))?;
        if angle < spec.min_angle || angle > spec.max_angle {
            return Err(ServoError::AngleOutOfRange {
                angle,
                min: spec.min_angle,
                max: spec.max_angle,
            });
        }

        let pulse_us = pulse_from_angle(&spec, angle);
        let counts = counts_from_pulse(pulse_us, self.period_us);
        self.pwm
            .set_channel_on_off(channel, 0, counts)
            .map_err(ServoError::Bus)?;

        self.positions.insert(name.to_string(), angle);
        tracing::info!(name, angle, pulse_us, "servo moved");
        Ok(())
    }

    /// Move a servo relative to its last commanded position.
    ///
    /// Falls back to the configured default angle when the servo has not been
    /// commanded yet. Returns the resulting absolute angle.
    pub fn adjust_angle(&mut self, name: &str, delta: f32) -> Result<f32, ServoError<E>> {
        let base = match self.positions.get(name) {
            Some(angle) => *angle,
            None => {
                let (_, spec) = self
                    .channels
                    .get(name)
                    .ok_or_else(|| ServoError::UnknownServo(name.to_string()))?;
                spec.default_angle
            }
        };
        let target = base + delta;
        self.set_angle(name, target)?;
        Ok(target)
    }

    /// Move every servo to its configured default angle.
    pub fn home_all(&mut self) -> Result<(), ServoError<E>> {
        let targets: Vec<(String, f32)> = self
            .channels
            .iter()
            .map(|(name, (_, spec))| (name.clone(), spec.default_angle))
            .collect();
        for (name, angle) in targets {
            self.set_angle(&name, angle)?;
        }
        Ok(())
    }

    /// Last successfully commanded angle, if any.
    pub fn last_angle(&self, name: &str) -> Option<f32> {
        self.positions.get(name).copied()
    }
}

/// Linear interpolation from the calibrated angle range to pulse width.
pub(crate) fn pulse_from_angle(spec: &PwmChannelSpec, angle: f32) -> f32 {
    let span = (angle - spec.min_angle) / (spec.max_angle - spec.min_angle);
    spec.min_pulse_us as f32 + span * (spec.max_pulse_us - spec.min_pulse_us) as f32
}

/// Convert a pulse width to 12-bit off counts for the expander.
pub(crate) fn counts_from_pulse(pulse_us: f32, period_us: f32) -> u16 {
    let counts = libm::roundf(pulse_us * 4096.0 / period_us);
    counts.clamp(0.0, 4095.0) as u16
}

fn expander_channel(index: u8) -> Option<Channel> {
    let channel = match index {
        0 => Channel::C0,
        1 => Channel::C1,
        2 => Channel::C2,
        3 => Channel::C3,
        4 => Channel::C4,
        5 => Channel::C5,
        6 => Channel::C6,
        7 => Channel::C7,
        8 => Channel::C8,
        9 => Channel::C9,
        10 => Channel::C10,
        11 => Channel::C11,
        12 => Channel::C12,
        13 => Channel::C13,
        14 => Channel::C14,
        15 => Channel::C15,
        _ => return None,
    };
    Some(channel)
}
