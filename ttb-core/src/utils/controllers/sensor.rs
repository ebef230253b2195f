//! Ultrasonic distance measurement.
//!
//! A fixed-width trigger pulse starts the measurement; the echo pin's rising
//! and falling edges are awaited asynchronously with the caller's timeout
//! bounding each wait, so a wedged sensor can never block indefinitely and
//! the animation loop is never starved by a read.

use core::fmt;

use embassy_time::{with_timeout, Duration, Instant, Timer};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::digital::Wait;

use super::bus::SonarLanes;

/// Centimeters of range per microsecond of echo round trip.
const CM_PER_ECHO_US: f32 = 0.01715;
/// The sensor cannot resolve anything past this.
const MAX_RANGE_CM: f32 = 500.0;
const TRIGGER_PULSE: Duration = Duration::from_micros(10);

/// One validated distance reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceSample {
    pub distance_cm: f32,
    /// Echo rise time; relative-age comparisons, not wall-clock.
    pub taken_at: Instant,
    /// Always true for samples returned by `measure`; rejected readings are
    /// surfaced as errors instead of clamped values.
    pub valid: bool,
}

/// Errors from a measurement cycle.
#[derive(Debug)]
pub enum SensorError<TE: fmt::Debug, EE: fmt::Debug> {
    /// No echo edge was observed within the caller's timeout.
    Timeout,
    /// Computed distance is outside the sensor's physical range.
    OutOfRange(f32),
    /// Trigger pin write failed.
    Trigger(TE),
    /// Echo pin wait failed.
    Echo(EE),
}

impl<TE: fmt::Debug, EE: fmt::Debug> fmt::Display for SensorError<TE, EE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Timeout => write!(f, "no echo observed before timeout"),
            SensorError::OutOfRange(d) => {
                write!(f, "computed distance {d} cm outside [0, {MAX_RANGE_CM}]")
            }
            SensorError::Trigger(e) => write!(f, "trigger pin failed: {e:?}"),
            SensorError::Echo(e) => write!(f, "echo pin failed: {e:?}"),
        }
    }
}

/// HC-SR04-style sensor over an acquired trigger/echo pin pair.
pub struct UltrasonicSensor<T, E> {
    trigger: T,
    echo: E,
}

impl<T, E> UltrasonicSensor<T, E>
where
    T: OutputPin,
    E: Wait,
{
    pub fn new(lanes: SonarLanes<T, E>) -> Self {
        Self {
            trigger: lanes.trigger,
            echo: lanes.echo,
        }
    }

    /// Take one distance reading, bounded by `timeout`.
    ///
    /// The timeout covers the whole cycle: waiting for the echo to start and
    /// for it to end. Timed-out and out-of-range readings are errors; the
    /// caller decides whether to retry.
    pub async fn measure(
        &mut self,
        timeout: Duration,
    ) -> Result<DistanceSample, SensorError<T::Error, E::Error>> {
        self.trigger.set_high().map_err(SensorError::Trigger)?;
        Timer::after(TRIGGER_PULSE).await;
        self.trigger.set_low().map_err(SensorError::Trigger)?;

        let deadline = Instant::now() + timeout;
        match with_timeout(timeout, self.echo.wait_for_high()).await {
            Ok(result) => result.map_err(SensorError::Echo)?,
            Err(_) => return Err(SensorError::Timeout),
        }
        let rise = Instant::now();

        let remaining = deadline
            .checked_duration_since(rise)
            .unwrap_or(Duration::from_ticks(0));
        match with_timeout(remaining, self.echo.wait_for_low()).await {
            Ok(result) => result.map_err(SensorError::Echo)?,
            Err(_) => return Err(SensorError::Timeout),
        }

        let distance_cm = distance_from_echo_us(rise.elapsed().as_micros());
        if !(0.0..=MAX_RANGE_CM).contains(&distance_cm) {
            tracing::warn!(distance_cm, "distance sample rejected");
            return Err(SensorError::OutOfRange(distance_cm));
        }

        tracing::debug!(distance_cm, "distance sample");
        Ok(DistanceSample {
            distance_cm,
            taken_at: rise,
            valid: true,
        })
    }

    /// Whether anything sits within `threshold_cm`.
    pub async fn is_object_near(
        &mut self,
        threshold_cm: f32,
        timeout: Duration,
    ) -> Result<bool, SensorError<T::Error, E::Error>> {
        let sample = self.measure(timeout).await?;
        Ok(sample.distance_cm <= threshold_cm)
    }
}

/// Echo round-trip duration to distance, in centimeters.
pub fn distance_from_echo_us(echo_us: u64) -> f32 {
    echo_us as f32 * CM_PER_ECHO_US
}
