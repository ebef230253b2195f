//! Logical-name to physical-address resolution.
//!
//! The channel map is built once from validated configuration and never
//! mutated afterwards. Every address collision and calibration mistake is a
//! [`ConfigError`] at build time, so misconfiguration is a startup failure
//! rather than a runtime surprise mid-operation.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;

use crate::utils::config::RobotConfig;

/// Fixed logical name of the left tread motor.
pub const MOTOR_LEFT: &str = "motor_left";
/// Fixed logical name of the right tread motor.
pub const MOTOR_RIGHT: &str = "motor_right";
/// Fixed logical name of the ultrasonic sensor.
pub const SONAR: &str = "sonar";

/// Startup-fatal configuration problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A logical name does not resolve to any physical address.
    UnknownChannel(String),
    /// Two logical names claim overlapping physical resources.
    DuplicateAddress { name: String, other: String },
    /// A calibration range is inverted, missing, or out of bounds.
    InvalidCalibration { name: String, reason: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownChannel(name) => write!(f, "unknown channel {name:?}"),
            ConfigError::DuplicateAddress { name, other } => {
                write!(f, "{name:?} claims a physical resource already owned by {other:?}")
            }
            ConfigError::InvalidCalibration { name, reason } => {
                write!(f, "invalid calibration for {name:?}: {reason}")
            }
        }
    }
}

/// One PWM expander output with its servo calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmChannelSpec {
    pub channel: u8,
    pub min_pulse_us: u16,
    pub max_pulse_us: u16,
    pub min_angle: f32,
    pub max_angle: f32,
    pub default_angle: f32,
}

/// One contiguous pixel range on an LED bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedRangeSpec {
    pub bus: u8,
    pub start: u16,
    pub count: u16,
    pub brightness: f32,
}

/// Trigger/echo GPIO pair of an ultrasonic sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SonarPinsSpec {
    pub trigger_pin: u8,
    pub echo_pin: u8,
}

/// PWM + direction pins of one tread motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorPinsSpec {
    pub pwm_pin: u8,
    pub forward_pin: u8,
    pub reverse_pin: u8,
}

/// Physical coordinates a logical name resolves to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhysicalAddress {
    Pwm(PwmChannelSpec),
    LedRange(LedRangeSpec),
    Sonar(SonarPinsSpec),
    Motor(MotorPinsSpec),
}

/// Immutable mapping of logical names to physical addresses.
#[derive(Debug, Clone)]
pub struct ChannelMap {
    entries: HashMap<String, PhysicalAddress>,
}

impl ChannelMap {
    /// Build the map from configuration, validating eagerly.
    ///
    /// Fails with [`ConfigError::InvalidCalibration`] on inverted or
    /// out-of-bounds ranges and [`ConfigError::DuplicateAddress`] when two
    /// names claim the same channel, overlapping pixels, or a shared GPIO pin.
    pub fn build(cfg: &RobotConfig) -> Result<Self, ConfigError> {
        let mut entries: HashMap<String, PhysicalAddress> = HashMap::new();
        let mut pwm_owner: HashMap<u8, String> = HashMap::new();
        let mut gpio_owner: HashMap<u8, String> = HashMap::new();

        for (name, servo) in &cfg.pwm.servos {
            if servo.channel > 15 {
                return Err(ConfigError::InvalidCalibration {
                    name: name.clone(),
                    reason: "expander channel index above 15",
                });
            }
            if servo.min_pulse >= servo.max_pulse {
                return Err(ConfigError::InvalidCalibration {
                    name: name.clone(),
                    reason: "pulse range inverted or empty",
                });
            }
            if servo.min_angle >= servo.max_angle {
                return Err(ConfigError::InvalidCalibration {
                    name: name.clone(),
                    reason: "angle range inverted or empty",
                });
            }
            if servo.default_angle < servo.min_angle || servo.default_angle > servo.max_angle {
                return Err(ConfigError::InvalidCalibration {
                    name: name.clone(),
                    reason: "default angle outside angle range",
                });
            }
            if let Some(other) = pwm_owner.insert(servo.channel, name.clone()) {
                return Err(ConfigError::DuplicateAddress {
                    name: name.clone(),
                    other,
                });
            }
            insert_unique(
                &mut entries,
                name.clone(),
                PhysicalAddress::Pwm(PwmChannelSpec {
                    channel: servo.channel,
                    min_pulse_us: servo.min_pulse,
                    max_pulse_us: servo.max_pulse,
                    min_angle: servo.min_angle,
                    max_angle: servo.max_angle,
                    default_angle: servo.default_angle,
                }),
            )?;
        }

        let mut ranges: Vec<(String, LedRangeSpec)> = Vec::new();
        for (name, group) in &cfg.leds.groups {
            if group.count == 0 {
                return Err(ConfigError::InvalidCalibration {
                    name: name.clone(),
                    reason: "empty pixel range",
                });
            }
            if !(0.0..=1.0).contains(&group.brightness) {
                return Err(ConfigError::InvalidCalibration {
                    name: name.clone(),
                    reason: "brightness outside [0.0, 1.0]",
                });
            }
            if group.start as u32 + group.count as u32 > u16::MAX as u32 {
                return Err(ConfigError::InvalidCalibration {
                    name: name.clone(),
                    reason: "pixel range exceeds addressable span",
                });
            }
            let spec = LedRangeSpec {
                bus: group.bus,
                start: group.start,
                count: group.count,
                brightness: group.brightness,
            };
            for (other, existing) in &ranges {
                if existing.bus == spec.bus && ranges_overlap(existing, &spec) {
                    return Err(ConfigError::DuplicateAddress {
                        name: name.clone(),
                        other: other.clone(),
                    });
                }
            }
            ranges.push((name.clone(), spec));
            insert_unique(&mut entries, name.clone(), PhysicalAddress::LedRange(spec))?;
        }

        for (name, pins) in [
            (MOTOR_LEFT, cfg.motors.left),
            (MOTOR_RIGHT, cfg.motors.right),
        ] {
            for pin in [pins.pwm_pin, pins.forward_pin, pins.reverse_pin] {
                claim_gpio(&mut gpio_owner, pin, name)?;
            }
            insert_unique(
                &mut entries,
                name.to_string(),
                PhysicalAddress::Motor(MotorPinsSpec {
                    pwm_pin: pins.pwm_pin,
                    forward_pin: pins.forward_pin,
                    reverse_pin: pins.reverse_pin,
                }),
            )?;
        }

        for pin in [cfg.sonar.trigger_pin, cfg.sonar.echo_pin] {
            claim_gpio(&mut gpio_owner, pin, SONAR)?;
        }
        insert_unique(
            &mut entries,
            SONAR.to_string(),
            PhysicalAddress::Sonar(SonarPinsSpec {
                trigger_pin: cfg.sonar.trigger_pin,
                echo_pin: cfg.sonar.echo_pin,
            }),
        )?;

        Ok(Self { entries })
    }

    /// Resolve a logical name to its physical address.
    pub fn resolve(&self, name: &str) -> Result<&PhysicalAddress, ConfigError> {
        self.entries
            .get(name)
            .ok_or_else(|| ConfigError::UnknownChannel(name.to_string()))
    }

    /// Iterate over every servo entry.
    pub fn servo_specs(&self) -> impl Iterator<Item = (&str, &PwmChannelSpec)> {
        self.entries.iter().filter_map(|(name, addr)| match addr {
            PhysicalAddress::Pwm(spec) => Some((name.as_str(), spec)),
            _ => None,
        })
    }

    /// All pixel groups on the given LED bus, sorted by start pixel.
    pub fn led_groups(&self, bus: u8) -> Vec<(String, LedRangeSpec)> {
        let mut groups: Vec<(String, LedRangeSpec)> = self
            .entries
            .iter()
            .filter_map(|(name, addr)| match addr {
                PhysicalAddress::LedRange(spec) if spec.bus == bus => {
                    Some((name.clone(), *spec))
                }
                _ => None,
            })
            .collect();
        groups.sort_by_key(|(_, spec)| spec.start);
        groups
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn insert_unique(
    entries: &mut HashMap<String, PhysicalAddress>,
    name: String,
    addr: PhysicalAddress,
) -> Result<(), ConfigError> {
    if entries.contains_key(&name) {
        return Err(ConfigError::DuplicateAddress {
            name: name.clone(),
            other: name,
        });
    }
    entries.insert(name, addr);
    Ok(())
}

fn claim_gpio(owner: &mut HashMap<u8, String>, pin: u8, name: &str) -> Result<(), ConfigError> {
    if let Some(other) = owner.insert(pin, name.to_string()) {
        // Re-claiming a pin within one bundle is a wiring error too.
        return Err(ConfigError::DuplicateAddress {
            name: name.to_string(),
            other,
        });
    }
    Ok(())
}

fn ranges_overlap(a: &LedRangeSpec, b: &LedRangeSpec) -> bool {
    let a_end = a.start as u32 + a.count as u32;
    let b_end = b.start as u32 + b.count as u32;
    (a.start as u32) < b_end && (b.start as u32) < a_end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::*;
    use alloc::string::ToString;

    fn base_config() -> RobotConfig {
        let mut servos = HashMap::new();
        servos.insert(
            "base_joint".to_string(),
            ServoConfig {
                channel: 0,
                min_pulse: 500,
                max_pulse: 2500,
                min_angle: 0.0,
                max_angle: 180.0,
                default_angle: 90.0,
            },
        );
        let mut groups = HashMap::new();
        groups.insert(
            "body".to_string(),
            LedGroupConfig {
                bus: 0,
                start: 0,
                count: 24,
                brightness: 0.5,
            },
        );
        RobotConfig {
            pwm: PwmConfig {
                address: 0x40,
                frequency: 50.0,
                servos,
            },
            leds: LedsConfig {
                fps: 50,
                rotation_step: 3.0,
                startup_demo: false,
                groups,
            },
            motors: MotorsConfig {
                left: MotorPinsConfig {
                    pwm_pin: 4,
                    forward_pin: 5,
                    reverse_pin: 6,
                },
                right: MotorPinsConfig {
                    pwm_pin: 7,
                    forward_pin: 8,
                    reverse_pin: 9,
                },
            },
            sonar: SonarConfig {
                trigger_pin: 23,
                echo_pin: 24,
            },
        }
    }

    #[test]
    fn builds_and_resolves() {
        let map = ChannelMap::build(&base_config()).unwrap();
        assert!(matches!(
            map.resolve("base_joint"),
            Ok(PhysicalAddress::Pwm(_))
        ));
        assert!(matches!(
            map.resolve(MOTOR_LEFT),
            Ok(PhysicalAddress::Motor(_))
        ));
        assert!(matches!(map.resolve(SONAR), Ok(PhysicalAddress::Sonar(_))));
        assert_eq!(map.led_groups(0).len(), 1);
        assert!(map.led_groups(1).is_empty());
    }

    #[test]
    fn unknown_name_is_rejected() {
        let map = ChannelMap::build(&base_config()).unwrap();
        assert_eq!(
            map.resolve("no_such_joint"),
            Err(ConfigError::UnknownChannel("no_such_joint".to_string()))
        );
    }

    #[test]
    fn duplicate_pwm_channel_is_rejected() {
        let mut cfg = base_config();
        cfg.pwm.servos.insert(
            "camera_tilt".to_string(),
            ServoConfig {
                channel: 0,
                min_pulse: 500,
                max_pulse: 2500,
                min_angle: 0.0,
                max_angle: 180.0,
                default_angle: 90.0,
            },
        );
        assert!(matches!(
            ChannelMap::build(&cfg),
            Err(ConfigError::DuplicateAddress { .. })
        ));
    }

    #[test]
    fn inverted_pulse_range_is_rejected() {
        let mut cfg = base_config();
        cfg.pwm.servos.get_mut("base_joint").unwrap().min_pulse = 2600;
        assert_eq!(
            ChannelMap::build(&cfg),
            Err(ConfigError::InvalidCalibration {
                name: "base_joint".to_string(),
                reason: "pulse range inverted or empty",
            })
        );
    }

    #[test]
    fn inverted_angle_range_is_rejected() {
        let mut cfg = base_config();
        let servo = cfg.pwm.servos.get_mut("base_joint").unwrap();
        servo.min_angle = 90.0;
        servo.max_angle = 10.0;
        assert!(matches!(
            ChannelMap::build(&cfg),
            Err(ConfigError::InvalidCalibration { .. })
        ));
    }

    #[test]
    fn overlapping_led_ranges_are_rejected() {
        let mut cfg = base_config();
        cfg.leds.groups.insert(
            "onboard".to_string(),
            LedGroupConfig {
                bus: 0,
                start: 20,
                count: 8,
                brightness: 1.0,
            },
        );
        assert!(matches!(
            ChannelMap::build(&cfg),
            Err(ConfigError::DuplicateAddress { .. })
        ));
    }

    #[test]
    fn led_ranges_on_distinct_buses_may_share_indices() {
        let mut cfg = base_config();
        cfg.leds.groups.insert(
            "onboard".to_string(),
            LedGroupConfig {
                bus: 1,
                start: 0,
                count: 8,
                brightness: 1.0,
            },
        );
        assert!(ChannelMap::build(&cfg).is_ok());
    }

    #[test]
    fn shared_gpio_pin_is_rejected() {
        let mut cfg = base_config();
        cfg.sonar.trigger_pin = cfg.motors.left.pwm_pin;
        assert!(matches!(
            ChannelMap::build(&cfg),
            Err(ConfigError::DuplicateAddress { .. })
        ));
    }

    #[test]
    fn out_of_bounds_brightness_is_rejected() {
        let mut cfg = base_config();
        cfg.leds.groups.get_mut("body").unwrap().brightness = 1.5;
        assert!(matches!(
            ChannelMap::build(&cfg),
            Err(ConfigError::InvalidCalibration { .. })
        ));
    }
}
