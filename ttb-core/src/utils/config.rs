//! Configuration structures handed over by the external loader.
//!
//! The loader (YAML/JSON, out of scope here) is responsible for parsing; this
//! module only defines the shape the core consumes. Structural validation of
//! calibration sanity and address collisions happens in
//! [`ChannelMap::build`](crate::utils::controllers::channel_map::ChannelMap::build)
//! so that a bad file fails startup before any bus is opened.

use alloc::string::String;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Top-level hardware configuration for one robot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConfig {
    pub pwm: PwmConfig,
    pub leds: LedsConfig,
    pub motors: MotorsConfig,
    pub sonar: SonarConfig,
}

/// PWM expander settings and the servos hanging off it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PwmConfig {
    /// 7-bit I2C address of the expander.
    #[serde(default = "default_pwm_address")]
    pub address: u8,
    /// Output frequency in Hz; 50 Hz for standard hobby servos.
    #[serde(default = "default_pwm_frequency")]
    pub frequency: f32,
    /// Logical servo name -> calibration.
    pub servos: HashMap<String, ServoConfig>,
}

/// Per-servo channel assignment and calibration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServoConfig {
    /// Expander output channel, 0-15.
    pub channel: u8,
    /// Pulse width at `min_angle`, microseconds.
    pub min_pulse: u16,
    /// Pulse width at `max_angle`, microseconds.
    pub max_pulse: u16,
    #[serde(default = "default_min_angle")]
    pub min_angle: f32,
    #[serde(default = "default_max_angle")]
    pub max_angle: f32,
    /// Safe position used by `home_all` and as the base for relative moves.
    pub default_angle: f32,
}

/// LED strip settings and the logical pixel groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedsConfig {
    /// Animation frame rate in Hz.
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Hue advance per frame in degrees while cycling the rainbow.
    #[serde(default = "default_rotation_step")]
    pub rotation_step: f32,
    /// Run the one-shot startup sequence when the engine comes up.
    #[serde(default)]
    pub startup_demo: bool,
    /// Logical group name -> pixel range.
    pub groups: HashMap<String, LedGroupConfig>,
}

/// One contiguous pixel range on an LED bus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LedGroupConfig {
    /// Which physical strip output this group lives on.
    pub bus: u8,
    pub start: u16,
    pub count: u16,
    /// Brightness multiplier in [0.0, 1.0], fixed at engine construction.
    #[serde(default = "default_brightness")]
    pub brightness: f32,
}

/// Tank-tread motor wiring, one lane bundle per side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotorsConfig {
    pub left: MotorPinsConfig,
    pub right: MotorPinsConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotorPinsConfig {
    pub pwm_pin: u8,
    pub forward_pin: u8,
    pub reverse_pin: u8,
}

/// Ultrasonic sensor wiring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SonarConfig {
    pub trigger_pin: u8,
    pub echo_pin: u8,
}

fn default_pwm_address() -> u8 {
    0x40
}

fn default_pwm_frequency() -> f32 {
    50.0
}

fn default_min_angle() -> f32 {
    0.0
}

fn default_max_angle() -> f32 {
    180.0
}

fn default_fps() -> u32 {
    50
}

fn default_rotation_step() -> f32 {
    3.0
}

fn default_brightness() -> f32 {
    1.0
}
