//! LED animation engine for the Tank-Tread Bot.
//!
//! The engine owns the strip writer and a long-lived rendering loop that is
//! the sole writer to the LED bus. External callers never touch pixels
//! directly: they enqueue [`LedRequest`] values over [`LED_CHANNEL`] and the
//! loop applies them at the next frame boundary, so no per-pixel locking is
//! needed and a frame is never torn by a concurrent command.

use alloc::vec::Vec;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Ticker};
use serde::{Deserialize, Serialize};
use smart_leds_trait::{SmartLedsWrite, RGB8};

use super::channel_map::ChannelMap;
use crate::utils::config::LedsConfig;
use crate::utils::math::color;

/// Channel used to receive LED requests, consumed only by the engine loop.
pub static LED_CHANNEL: embassy_sync::channel::Channel<CriticalSectionRawMutex, LedRequest, 16> =
    embassy_sync::channel::Channel::new();

/// Consecutive failed frame writes before the engine latches off.
const MAX_CONSECUTIVE_FAULTS: u8 = 5;
/// Intensity change per frame during the startup white pulse.
const PULSE_STEP: u16 = 15;
/// Hue advance per frame of the startup rainbow sweep, degrees.
const SWEEP_STEP_DEG: f32 = 22.5;
/// Frames in one full startup sweep revolution.
const SWEEP_FRAMES: u8 = 16;

/// LED command variants as they arrive off the wire.
///
/// Serialized as JSON with tag `"lc"`. Channels are carried wide so that an
/// out-of-range value is a validation error here rather than a parse error.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(tag = "lc", rename_all = "snake_case")]
pub enum LedCommand {
    /// Blank the strip and idle the loop.
    Pause,
    /// Return to the last active mode.
    Resume,
    /// Hold a solid color.
    Solid { r: u16, g: u16, b: u16 },
    /// Re-trigger the one-shot startup sequence.
    Startup,
}

/// Validation failures for LED commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedError {
    /// A color channel is outside [0, 255]; no request was enqueued.
    InvalidColor { r: u16, g: u16, b: u16 },
}

impl core::fmt::Display for LedError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LedError::InvalidColor { r, g, b } => {
                write!(f, "color ({r}, {g}, {b}) has a channel outside [0, 255]")
            }
        }
    }
}

/// A validated state-transition request, applied at a frame boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LedRequest {
    Pause,
    Resume,
    Solid(RGB8),
    Startup,
    /// Blank the strip and end the loop; used on process shutdown.
    Shutdown,
}

impl TryFrom<LedCommand> for LedRequest {
    type Error = LedError;

    fn try_from(cmd: LedCommand) -> Result<Self, LedError> {
        match cmd {
            LedCommand::Pause => Ok(LedRequest::Pause),
            LedCommand::Resume => Ok(LedRequest::Resume),
            LedCommand::Solid { r, g, b } => {
                if r > 255 || g > 255 || b > 255 {
                    return Err(LedError::InvalidColor { r, g, b });
                }
                Ok(LedRequest::Solid(RGB8 {
                    r: r as u8,
                    g: g as u8,
                    b: b as u8,
                }))
            }
            LedCommand::Startup => Ok(LedRequest::Startup),
        }
    }
}

/// Animation states of the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnimationMode {
    Off,
    Solid(RGB8),
    RainbowCycle,
    StartupSequence,
}

/// Sub-phases of the one-shot startup sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
enum StartupPhase {
    /// White fade-in, intensity 0..=255.
    PulseUp(u16),
    /// White fade-out, intensity 255..=0.
    PulseDown(u16),
    /// One rainbow revolution across the strip.
    Sweep(u8),
}

struct LedGroup {
    start: u16,
    count: u16,
    brightness: f32,
}

/// Owns the strip and renders one frame per tick of its loop.
pub struct LedEngine<D> {
    driver: D,
    groups: Vec<LedGroup>,
    pixel_count: u16,
    hue_step: f32,
    rotation_step: f32,
    frame_interval: Duration,
    mode: AnimationMode,
    resume_mode: AnimationMode,
    startup: StartupPhase,
    hue_offset: f32,
    blanked: bool,
    faults: u8,
    persistent_fault: bool,
}

impl<D, E> LedEngine<D>
where
    D: SmartLedsWrite<Color = RGB8, Error = E>,
    E: core::fmt::Debug,
{
    /// Build the engine over an acquired strip writer for one LED bus.
    ///
    /// Brightness is captured from the channel map here and stays fixed for
    /// the engine's lifetime.
    pub fn new(driver: D, map: &ChannelMap, bus: u8, cfg: &LedsConfig) -> Self {
        let groups: Vec<LedGroup> = map
            .led_groups(bus)
            .into_iter()
            .map(|(_, spec)| LedGroup {
                start: spec.start,
                count: spec.count,
                brightness: spec.brightness,
            })
            .collect();
        let pixel_count = groups
            .iter()
            .map(|g| g.start + g.count)
            .max()
            .unwrap_or(0);

        let mode = if cfg.startup_demo {
            AnimationMode::StartupSequence
        } else {
            AnimationMode::Off
        };

        Self {
            driver,
            groups,
            pixel_count,
            hue_step: if pixel_count == 0 {
                0.0
            } else {
                360.0 / pixel_count as f32
            },
            rotation_step: cfg.rotation_step,
            frame_interval: Duration::from_hz(cfg.fps.max(1) as u64),
            mode,
            resume_mode: AnimationMode::RainbowCycle,
            startup: StartupPhase::PulseUp(0),
            hue_offset: 0.0,
            blanked: false,
            faults: 0,
            persistent_fault: false,
        }
    }

    /// Run the rendering loop until a shutdown request arrives.
    ///
    /// One frame is computed and written per tick; pending requests are
    /// drained at each frame boundary, and while blanked-off the loop parks
    /// on the channel instead of spinning.
    pub async fn run(&mut self) {
        let mut ticker = Ticker::every(self.frame_interval);
        tracing::info!(
            pixels = self.pixel_count,
            fps = ?self.frame_interval,
            "LED engine running"
        );
        loop {
            while let Ok(request) = LED_CHANNEL.try_receive() {
                if request == LedRequest::Shutdown {
                    self.blank_and_stop();
                    return;
                }
                self.handle_request(request);
            }

            if self.idle() {
                let request = LED_CHANNEL.receive().await;
                if request == LedRequest::Shutdown {
                    self.blank_and_stop();
                    return;
                }
                self.handle_request(request);
                ticker.reset();
            }

            self.service_frame();
            ticker.next().await;
        }
    }

    /// Apply one requested transition at a frame boundary.
    pub fn handle_request(&mut self, request: LedRequest) {
        match request {
            LedRequest::Pause => {
                if self.mode != AnimationMode::Off {
                    self.resume_mode = resume_target(self.mode);
                    self.mode = AnimationMode::Off;
                    self.blanked = false;
                    tracing::info!("animation paused");
                }
            }
            LedRequest::Resume => {
                if self.persistent_fault {
                    tracing::warn!("resume refused: strip latched off after bus faults");
                } else if self.mode == AnimationMode::Off {
                    self.mode = self.resume_mode;
                    tracing::info!(mode = ?self.mode, "animation resumed");
                }
            }
            LedRequest::Solid(rgb) => {
                self.mode = AnimationMode::Solid(rgb);
                self.resume_mode = AnimationMode::Solid(rgb);
                self.blanked = false;
            }
            LedRequest::Startup => {
                self.mode = AnimationMode::StartupSequence;
                self.startup = StartupPhase::PulseUp(0);
                self.resume_mode = AnimationMode::RainbowCycle;
                self.blanked = false;
            }
            LedRequest::Shutdown => {
                // The loop intercepts shutdown; treat a direct call as pause.
                self.handle_request(LedRequest::Pause);
            }
        }
    }

    /// Render and write the current frame, then advance the animation.
    ///
    /// A failed write is a transient fault: the frame is retried next tick
    /// until the retry budget is spent, after which the engine latches off.
    pub fn service_frame(&mut self) {
        if self.idle() {
            return;
        }
        let frame = self.frame_colors();
        match self.driver.write(frame.into_iter()) {
            Ok(()) => {
                self.faults = 0;
                if self.mode == AnimationMode::Off {
                    self.blanked = true;
                } else {
                    self.advance();
                }
            }
            Err(e) => {
                self.faults += 1;
                tracing::warn!(fault = ?e, consecutive = self.faults, "frame write failed");
                if self.faults >= MAX_CONSECUTIVE_FAULTS {
                    tracing::error!("strip unresponsive, latching animation off");
                    self.mode = AnimationMode::Off;
                    self.blanked = true;
                    self.persistent_fault = true;
                }
            }
        }
    }

    /// Colors of the frame that `service_frame` would write now.
    pub fn frame_colors(&self) -> Vec<RGB8> {
        (0..self.pixel_count).map(|i| self.color_at(i)).collect()
    }

    pub fn mode(&self) -> AnimationMode {
        self.mode
    }

    /// Set once the retry budget for bus faults is exhausted.
    pub fn persistent_fault(&self) -> bool {
        self.persistent_fault
    }

    pub fn pixel_count(&self) -> u16 {
        self.pixel_count
    }

    fn idle(&self) -> bool {
        self.mode == AnimationMode::Off && self.blanked
    }

    fn color_at(&self, index: u16) -> RGB8 {
        let raw = match self.mode {
            AnimationMode::Off => return RGB8::default(),
            AnimationMode::Solid(rgb) => rgb,
            AnimationMode::RainbowCycle => color::hsv_to_rgb(
                index as f32 * self.hue_step + self.hue_offset,
                1.0,
                1.0,
            ),
            AnimationMode::StartupSequence => match self.startup {
                StartupPhase::PulseUp(v) | StartupPhase::PulseDown(v) => {
                    let white = v.min(255) as u8;
                    RGB8::new(white, white, white)
                }
                StartupPhase::Sweep(step) => color::hsv_to_rgb(
                    index as f32 * self.hue_step + step as f32 * SWEEP_STEP_DEG,
                    1.0,
                    1.0,
                ),
            },
        };
        color::scale(raw, self.brightness_at(index))
    }

    fn brightness_at(&self, index: u16) -> f32 {
        self.groups
            .iter()
            .find(|g| index >= g.start && index < g.start + g.count)
            .map(|g| g.brightness)
            .unwrap_or(0.0)
    }

    fn advance(&mut self) {
        match self.mode {
            AnimationMode::RainbowCycle => {
                self.hue_offset = (self.hue_offset + self.rotation_step) % 360.0;
            }
            AnimationMode::StartupSequence => {
                self.startup = match self.startup {
                    StartupPhase::PulseUp(v) if v >= 255 => StartupPhase::PulseDown(255),
                    StartupPhase::PulseUp(v) => StartupPhase::PulseUp((v + PULSE_STEP).min(255)),
                    StartupPhase::PulseDown(0) => StartupPhase::Sweep(0),
                    StartupPhase::PulseDown(v) => {
                        StartupPhase::PulseDown(v.saturating_sub(PULSE_STEP))
                    }
                    StartupPhase::Sweep(step) if step + 1 >= SWEEP_FRAMES => {
                        tracing::info!("startup sequence complete, entering rainbow cycle");
                        self.mode = AnimationMode::RainbowCycle;
                        self.hue_offset = 0.0;
                        StartupPhase::PulseUp(0)
                    }
                    StartupPhase::Sweep(step) => StartupPhase::Sweep(step + 1),
                };
            }
            AnimationMode::Solid(_) | AnimationMode::Off => {}
        }
    }

    fn blank_and_stop(&mut self) {
        self.mode = AnimationMode::Off;
        self.blanked = false;
        self.service_frame();
        tracing::info!("LED engine stopped");
    }
}

fn resume_target(mode: AnimationMode) -> AnimationMode {
    match mode {
        // Startup is one-shot; resuming mid-sequence lands on its successor.
        AnimationMode::StartupSequence => AnimationMode::RainbowCycle,
        other => other,
    }
}
