use core::cell::RefCell;
use core::convert::Infallible;
use std::rc::Rc;

use embassy_time::Duration;
use embedded_hal::digital::ErrorType as PinErrorType;
use embedded_hal::i2c::{ErrorKind as I2cErrorKind, I2c};
use embedded_hal::pwm::{ErrorType as PwmErrorType, SetDutyCycle};
use embedded_hal_async::digital::Wait;
use embedded_hal_bus::i2c::RefCellDevice;
use embedded_hal_mock::eh1::digital::{
    Mock as PinMock, State as PinState, Transaction as PinTransaction,
};
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};
use smart_leds_trait::{SmartLedsWrite, RGB8};

use ttb_core::utils::config::{
    LedGroupConfig, LedsConfig, MotorPinsConfig, MotorsConfig, PwmConfig, RobotConfig,
    ServoConfig, SonarConfig,
};
use ttb_core::utils::controllers::bus::{
    BusError, BusKind, BusRegistry, MotorLanes, RobotPlatform, SonarLanes,
};
use ttb_core::utils::controllers::channel_map::{ChannelMap, ConfigError};
use ttb_core::utils::controllers::leds::{
    AnimationMode, LedCommand, LedEngine, LedError, LedRequest,
};
use ttb_core::utils::controllers::motor::{MotorController, MotorError};
use ttb_core::utils::controllers::sensor::{SensorError, UltrasonicSensor};
use ttb_core::utils::controllers::servo::{ServoDriver, ServoError};
use ttb_core::utils::math::color;
use ttb_core::utils::SystemController;

/// Default I2C address for the PWM expander.
pub const PWM_ADDRESS: u8 = 0x40;
/// Prescale value programmed for a 50 Hz servo refresh.
pub const PRESCALE_50HZ: u8 = 121;

/// Create a write transaction for the given I2C address and data payload.
pub fn write(addr: u8, data: Vec<u8>) -> I2cTrans {
    I2cTrans::write(addr, data)
}

/// Expander bring-up transactions: enable, then prescale for 50 Hz.
fn pwm_init_transactions() -> Vec<I2cTrans> {
    vec![
        write(PWM_ADDRESS, vec![0x00, 0x01]),
        write(PWM_ADDRESS, vec![0x00, 0x11]),
        write(PWM_ADDRESS, vec![0xFE, PRESCALE_50HZ]),
        write(PWM_ADDRESS, vec![0x00, 0x01]),
    ]
}

fn demo_config() -> RobotConfig {
    let mut servos = hashbrown::HashMap::new();
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
    let mut groups = hashbrown::HashMap::new();
    groups.insert(
        "body".to_string(),
        LedGroupConfig {
            bus: 0,
            start: 0,
            count: 30,
            brightness: 0.5,
        },
    );
    RobotConfig {
        pwm: PwmConfig {
            address: PWM_ADDRESS,
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

// ---------------------------------------------------------------------------
// Test fakes where embedded-hal-mock has no fitting primitive
// ---------------------------------------------------------------------------

/// Strip writer that records every frame it is handed.
#[derive(Clone, Default)]
struct RecordingStrip {
    frames: Rc<RefCell<Vec<Vec<RGB8>>>>,
}

impl RecordingStrip {
    fn frames(&self) -> Vec<Vec<RGB8>> {
        self.frames.borrow().clone()
    }
}

impl SmartLedsWrite for RecordingStrip {
    type Error = Infallible;
    type Color = RGB8;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        self.frames
            .borrow_mut()
            .push(iterator.into_iter().map(Into::into).collect());
        Ok(())
    }
}

#[derive(Debug)]
struct WriteFault;

/// Strip writer whose bus is permanently broken.
struct FailingStrip;

impl SmartLedsWrite for FailingStrip {
    type Error = WriteFault;
    type Color = RGB8;

    fn write<T, I>(&mut self, _iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        Err(WriteFault)
    }
}

/// Duty-cycle sink with a shared record of every value written.
#[derive(Clone, Default)]
struct FakePwm {
    duties: Rc<RefCell<Vec<u16>>>,
}

impl FakePwm {
    fn duties(&self) -> Vec<u16> {
        self.duties.borrow().clone()
    }
}

impl PwmErrorType for FakePwm {
    type Error = Infallible;
}

impl SetDutyCycle for FakePwm {
    fn max_duty_cycle(&self) -> u16 {
        100
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.duties.borrow_mut().push(duty);
        Ok(())
    }
}

/// Echo pin that never sees an edge.
struct PendingEcho;

impl PinErrorType for PendingEcho {
    type Error = Infallible;
}

impl Wait for PendingEcho {
    async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
        core::future::pending().await
    }

    async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
        core::future::pending().await
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
        core::future::pending().await
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
        core::future::pending().await
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
        core::future::pending().await
    }
}

/// Echo pin that rises immediately and falls after a scripted width.
struct ScriptedEcho {
    echo_width: Duration,
}

impl PinErrorType for ScriptedEcho {
    type Error = Infallible;
}

impl Wait for ScriptedEcho {
    async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
        embassy_time::Timer::after(self.echo_width).await;
        Ok(())
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
        self.wait_for_high().await
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
        self.wait_for_low().await
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
        self.wait_for_high().await
    }
}

struct TestPlatform;

impl RobotPlatform for TestPlatform {
    type I2c = I2cMock;
    type Led = RecordingStrip;
    type MotorPwm = FakePwm;
    type DirPin = PinMock;
    type TrigPin = PinMock;
    type EchoPin = PendingEcho;
}

fn leak_bus(mock: I2cMock) -> &'static RefCell<I2cMock> {
    Box::leak(Box::new(RefCell::new(mock)))
}

/// A registry over mock resources plus the handles needed to verify them.
struct TestRig {
    registry: BusRegistry<TestPlatform>,
    left_pwm: FakePwm,
    right_pwm: FakePwm,
    /// forward-left, reverse-left, forward-right, reverse-right, trigger
    pins: Vec<PinMock>,
}

impl TestRig {
    /// `fwd`/`rev` script the expected transitions of the direction pins;
    /// tests that never build a motor controller pass empty scripts.
    fn new(
        i2c: &'static RefCell<I2cMock>,
        strip: RecordingStrip,
        fwd: &[PinTransaction],
        rev: &[PinTransaction],
    ) -> Self {
        let left_pwm = FakePwm::default();
        let right_pwm = FakePwm::default();
        let pins = vec![
            PinMock::new(fwd),
            PinMock::new(rev),
            PinMock::new(fwd),
            PinMock::new(rev),
            PinMock::new(&[]),
        ];
        let registry = BusRegistry::new(
            i2c,
            strip,
            MotorLanes {
                pwm: left_pwm.clone(),
                forward: pins[0].clone(),
                reverse: pins[1].clone(),
            },
            MotorLanes {
                pwm: right_pwm.clone(),
                forward: pins[2].clone(),
                reverse: pins[3].clone(),
            },
            SonarLanes {
                trigger: pins[4].clone(),
                echo: PendingEcho,
            },
        );
        Self {
            registry,
            left_pwm,
            right_pwm,
            pins,
        }
    }

    /// Assert every pin script ran to completion.
    fn check_pins(&mut self) {
        for pin in &mut self.pins {
            pin.done();
        }
    }
}

// ---------------------------------------------------------------------------
// Channel map
// ---------------------------------------------------------------------------

#[test]
fn duplicate_pwm_channel_fails_before_any_bus_is_opened() {
    let mut cfg = demo_config();
    for name in ["shoulder_left", "shoulder_right"] {
        cfg.pwm.servos.insert(
            name.to_string(),
            ServoConfig {
                channel: 3,
                min_pulse: 500,
                max_pulse: 2500,
                min_angle: 0.0,
                max_angle: 180.0,
                default_angle: 90.0,
            },
        );
    }
    assert!(matches!(
        ChannelMap::build(&cfg),
        Err(ConfigError::DuplicateAddress { .. })
    ));
}

// ---------------------------------------------------------------------------
// Servo driver over the mock expander
// ---------------------------------------------------------------------------

#[test]
fn test_set_angle_writes_calibrated_counts() {
    // 90 deg of a 500-2500 us / 0-180 deg calibration is 1500 us, which is
    // 307 of 4096 counts at 50 Hz. The first channel write also turns on
    // register auto-increment.
    let mut expectations = pwm_init_transactions();
    expectations.push(write(PWM_ADDRESS, vec![0x00, 0x21]));
    expectations.push(write(PWM_ADDRESS, vec![0x06, 0x00, 0x00, 0x33, 0x01]));
    expectations.push(write(PWM_ADDRESS, vec![0x06, 0x00, 0x00, 0x66, 0x00]));

    let mock = I2cMock::new(&expectations);
    let mut checker = mock.clone();
    let bus = leak_bus(mock);
    let mut rig = TestRig::new(bus, RecordingStrip::default(), &[], &[]);

    let cfg = demo_config();
    let map = ChannelMap::build(&cfg).unwrap();
    let pwm = rig.registry.acquire_pwm(PWM_ADDRESS, 50.0).unwrap();
    let mut servos = ServoDriver::new(pwm, &map, 50.0);

    servos.set_angle("base_joint", 90.0).unwrap();
    assert_eq!(servos.last_angle("base_joint"), Some(90.0));

    servos.set_angle("base_joint", 0.0).unwrap();
    assert_eq!(servos.last_angle("base_joint"), Some(0.0));

    rig.check_pins();
    checker.done();
}

#[test]
fn test_out_of_range_angle_issues_no_write() {
    let expectations = pwm_init_transactions();
    let mock = I2cMock::new(&expectations);
    let mut checker = mock.clone();
    let bus = leak_bus(mock);
    let mut rig = TestRig::new(bus, RecordingStrip::default(), &[], &[]);

    let cfg = demo_config();
    let map = ChannelMap::build(&cfg).unwrap();
    let pwm = rig.registry.acquire_pwm(PWM_ADDRESS, 50.0).unwrap();
    let mut servos = ServoDriver::new(pwm, &map, 50.0);

    assert!(matches!(
        servos.set_angle("base_joint", 200.0),
        Err(ServoError::AngleOutOfRange { .. })
    ));
    assert!(matches!(
        servos.set_angle("base_joint", -10.0),
        Err(ServoError::AngleOutOfRange { .. })
    ));
    assert!(matches!(
        servos.set_angle("no_such_joint", 90.0),
        Err(ServoError::UnknownServo(_))
    ));
    assert_eq!(servos.last_angle("base_joint"), None);

    // done() fails if anything beyond bring-up reached the bus.
    rig.check_pins();
    checker.done();
}

#[test]
fn test_relative_moves_track_last_position() {
    let mut expectations = pwm_init_transactions();
    expectations.push(write(PWM_ADDRESS, vec![0x00, 0x21]));
    // 100 deg -> 1611 us -> 330 counts; 130 deg -> 1944 us -> 398 counts.
    expectations.push(write(PWM_ADDRESS, vec![0x06, 0x00, 0x00, 0x4A, 0x01]));
    expectations.push(write(PWM_ADDRESS, vec![0x06, 0x00, 0x00, 0x8E, 0x01]));

    let mock = I2cMock::new(&expectations);
    let mut checker = mock.clone();
    let bus = leak_bus(mock);
    let mut rig = TestRig::new(bus, RecordingStrip::default(), &[], &[]);

    let cfg = demo_config();
    let map = ChannelMap::build(&cfg).unwrap();
    let pwm = rig.registry.acquire_pwm(PWM_ADDRESS, 50.0).unwrap();
    let mut servos = ServoDriver::new(pwm, &map, 50.0);

    // First relative move starts from the configured default of 90 deg.
    assert_eq!(servos.adjust_angle("base_joint", 10.0).unwrap(), 100.0);
    assert_eq!(servos.adjust_angle("base_joint", 30.0).unwrap(), 130.0);
    // Pushing past the calibrated limit is rejected and position is kept.
    assert!(servos.adjust_angle("base_joint", 60.0).is_err());
    assert_eq!(servos.last_angle("base_joint"), Some(130.0));

    rig.check_pins();
    checker.done();
}

// ---------------------------------------------------------------------------
// Shared-bus serialization
// ---------------------------------------------------------------------------

#[test]
fn test_shared_bus_serializes_whole_transactions() {
    // Two writers interleaving on one bus must produce whole transactions in
    // issue order; the mock rejects any reordered or torn write.
    let expectations = [
        write(0x10, vec![0xAA]),
        write(0x20, vec![0xBB]),
        write(0x10, vec![0xCC]),
        write(0x20, vec![0xDD]),
    ];
    let mock = I2cMock::new(&expectations);
    let mut checker = mock.clone();
    let bus = RefCell::new(mock);

    let mut first = RefCellDevice::new(&bus);
    let mut second = RefCellDevice::new(&bus);

    first.write(0x10, &[0xAA]).unwrap();
    second.write(0x20, &[0xBB]).unwrap();
    first.write(0x10, &[0xCC]).unwrap();
    second.write(0x20, &[0xDD]).unwrap();

    checker.done();
}

// ---------------------------------------------------------------------------
// Bus registry
// ---------------------------------------------------------------------------

#[test]
fn test_buses_are_handed_out_once() {
    let mock = I2cMock::new(&[]);
    let mut checker = mock.clone();
    let bus = leak_bus(mock);
    let mut rig = TestRig::new(bus, RecordingStrip::default(), &[], &[]);

    let strip = rig.registry.acquire_led().unwrap();
    assert!(matches!(
        rig.registry.acquire_led(),
        Err(BusError::Unavailable(BusKind::LedStrip))
    ));
    rig.registry.release_led(strip);
    assert!(rig.registry.acquire_led().is_ok());

    let (left, right) = rig.registry.acquire_motors().unwrap();
    assert!(matches!(
        rig.registry.acquire_motors(),
        Err(BusError::Unavailable(BusKind::Motors))
    ));
    rig.registry.release_motors(left, right);

    let sonar = rig.registry.acquire_sonar().unwrap();
    assert!(matches!(
        rig.registry.acquire_sonar(),
        Err(BusError::Unavailable(BusKind::Sonar))
    ));
    rig.registry.release_sonar(sonar);

    rig.check_pins();
    checker.done();
}

// ---------------------------------------------------------------------------
// Motor controller
// ---------------------------------------------------------------------------

#[test]
fn test_drive_maps_speed_to_duty_and_direction() {
    let left_pwm = FakePwm::default();
    let right_pwm = FakePwm::default();
    let mut left_fwd = PinMock::new(&[
        PinTransaction::set(PinState::Low),
        PinTransaction::set(PinState::High),
    ]);
    let mut left_rev = PinMock::new(&[
        PinTransaction::set(PinState::Low),
        PinTransaction::set(PinState::Low),
    ]);
    let mut right_fwd = PinMock::new(&[
        PinTransaction::set(PinState::Low),
        PinTransaction::set(PinState::Low),
    ]);
    let mut right_rev = PinMock::new(&[
        PinTransaction::set(PinState::Low),
        PinTransaction::set(PinState::High),
    ]);

    let mut motors = MotorController::new(
        MotorLanes {
            pwm: left_pwm.clone(),
            forward: left_fwd.clone(),
            reverse: left_rev.clone(),
        },
        MotorLanes {
            pwm: right_pwm.clone(),
            forward: right_fwd.clone(),
            reverse: right_rev.clone(),
        },
    );

    motors.drive(60, -40).unwrap();

    // One zero from the constructor's stop, then the commanded magnitude.
    assert_eq!(left_pwm.duties(), vec![0, 60]);
    assert_eq!(right_pwm.duties(), vec![0, 40]);

    left_fwd.done();
    left_rev.done();
    right_fwd.done();
    right_rev.done();
}

#[test]
fn test_out_of_range_speed_touches_nothing() {
    let left_pwm = FakePwm::default();
    let right_pwm = FakePwm::default();
    // Only the constructor's stop ever reaches the pins.
    let mut pins: Vec<PinMock> = (0..4)
        .map(|_| PinMock::new(&[PinTransaction::set(PinState::Low)]))
        .collect();

    let mut motors = MotorController::new(
        MotorLanes {
            pwm: left_pwm.clone(),
            forward: pins[0].clone(),
            reverse: pins[1].clone(),
        },
        MotorLanes {
            pwm: right_pwm.clone(),
            forward: pins[2].clone(),
            reverse: pins[3].clone(),
        },
    );

    assert!(matches!(
        motors.drive(150, 0),
        Err(MotorError::SpeedOutOfRange(150))
    ));
    assert!(matches!(
        motors.drive(0, -101),
        Err(MotorError::SpeedOutOfRange(-101))
    ));

    assert_eq!(left_pwm.duties(), vec![0]);
    assert_eq!(right_pwm.duties(), vec![0]);
    for pin in &mut pins {
        pin.done();
    }
}

// ---------------------------------------------------------------------------
// LED animation engine
// ---------------------------------------------------------------------------

fn engine_with(strip: RecordingStrip, startup_demo: bool) -> LedEngine<RecordingStrip> {
    let mut cfg = demo_config();
    cfg.leds.startup_demo = startup_demo;
    let map = ChannelMap::build(&cfg).unwrap();
    LedEngine::new(strip, &map, 0, &cfg.leds)
}

#[test]
fn test_rainbow_frames_match_formula_at_half_brightness() {
    let strip = RecordingStrip::default();
    let mut engine = engine_with(strip.clone(), false);
    engine.handle_request(LedRequest::Resume);
    assert_eq!(engine.mode(), AnimationMode::RainbowCycle);

    for _ in 0..11 {
        engine.service_frame();
    }

    let frames = strip.frames();
    assert_eq!(frames.len(), 11);
    assert_eq!(frames[0].len(), 30);

    // Frame 0, pixel 0: hue 0 scaled by the group's 0.5 brightness.
    assert_eq!(frames[0][0], RGB8::new(128, 0, 0));
    // Frame N, pixel p: hue = p * (360 / 30) + N * rotation_step.
    for (n, p) in [(0usize, 1u16), (5, 0), (10, 7)] {
        let hue = p as f32 * 12.0 + n as f32 * 3.0;
        let expected = color::scale(color::hsv_to_rgb(hue, 1.0, 1.0), 0.5);
        assert_eq!(frames[n][p as usize], expected, "frame {n} pixel {p}");
    }
}

#[test]
fn test_pause_blanks_within_one_frame_then_idles() {
    let strip = RecordingStrip::default();
    let mut engine = engine_with(strip.clone(), false);
    engine.handle_request(LedRequest::Resume);
    engine.service_frame();

    engine.handle_request(LedRequest::Pause);
    engine.service_frame();

    let frames = strip.frames();
    let blank = frames.last().unwrap();
    assert!(blank.iter().all(|px| *px == RGB8::new(0, 0, 0)));

    // Idle once blanked: no further frames are written.
    let written = frames.len();
    engine.service_frame();
    engine.service_frame();
    assert_eq!(strip.frames().len(), written);
}

#[test]
fn test_resume_restores_last_active_mode() {
    let strip = RecordingStrip::default();
    let mut engine = engine_with(strip.clone(), false);

    engine.handle_request(LedRequest::Solid(RGB8::new(255, 0, 0)));
    engine.service_frame();
    assert_eq!(
        *strip.frames().last().unwrap().first().unwrap(),
        RGB8::new(128, 0, 0)
    );

    engine.handle_request(LedRequest::Pause);
    engine.service_frame();
    engine.handle_request(LedRequest::Resume);
    assert_eq!(engine.mode(), AnimationMode::Solid(RGB8::new(255, 0, 0)));
}

#[test]
fn test_invalid_color_is_rejected_without_state_change() {
    let strip = RecordingStrip::default();
    let engine = engine_with(strip, false);

    assert_eq!(
        LedRequest::try_from(LedCommand::Solid { r: 300, g: 0, b: 0 }),
        Err(LedError::InvalidColor { r: 300, g: 0, b: 0 })
    );
    // Nothing was enqueued, nothing applied.
    assert_eq!(engine.mode(), AnimationMode::Off);
}

#[test]
fn test_startup_sequence_chains_into_rainbow() {
    let strip = RecordingStrip::default();
    let mut engine = engine_with(strip.clone(), true);
    assert_eq!(engine.mode(), AnimationMode::StartupSequence);

    let mut frames_run = 0;
    while engine.mode() != AnimationMode::RainbowCycle && frames_run < 100 {
        engine.service_frame();
        frames_run += 1;
    }
    assert_eq!(engine.mode(), AnimationMode::RainbowCycle);

    // The white pulse peaked at full intensity, scaled by group brightness.
    let frames = strip.frames();
    assert!(frames
        .iter()
        .any(|frame| frame.iter().all(|px| *px == RGB8::new(128, 128, 128))));
}

#[test]
fn test_persistent_fault_latches_off_after_retries() {
    let cfg = demo_config();
    let map = ChannelMap::build(&cfg).unwrap();
    let mut engine = LedEngine::new(FailingStrip, &map, 0, &cfg.leds);
    engine.handle_request(LedRequest::Resume);

    for _ in 0..5 {
        assert!(!engine.persistent_fault());
        engine.service_frame();
    }

    assert!(engine.persistent_fault());
    assert_eq!(engine.mode(), AnimationMode::Off);

    // Resume is refused while latched.
    engine.handle_request(LedRequest::Resume);
    assert_eq!(engine.mode(), AnimationMode::Off);
}

// ---------------------------------------------------------------------------
// Distance sensor
// ---------------------------------------------------------------------------

#[test]
fn test_measure_times_out_within_the_requested_window() {
    let mut trigger = PinMock::new(&[
        PinTransaction::set(PinState::High),
        PinTransaction::set(PinState::Low),
    ]);
    let mut sensor = UltrasonicSensor::new(SonarLanes {
        trigger: trigger.clone(),
        echo: PendingEcho,
    });

    let started = std::time::Instant::now();
    let result = embassy_futures::block_on(sensor.measure(Duration::from_millis(30)));
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(SensorError::Timeout)));
    assert!(
        elapsed < std::time::Duration::from_millis(150),
        "timeout took {elapsed:?}"
    );
    trigger.done();
}

#[test]
fn test_overlong_echo_is_out_of_range_not_clamped() {
    let mut trigger = PinMock::new(&[
        PinTransaction::set(PinState::High),
        PinTransaction::set(PinState::Low),
    ]);
    let mut sensor = UltrasonicSensor::new(SonarLanes {
        trigger: trigger.clone(),
        echo: ScriptedEcho {
            echo_width: Duration::from_millis(35),
        },
    });

    let result = embassy_futures::block_on(sensor.measure(Duration::from_millis(200)));
    assert!(matches!(result, Err(SensorError::OutOfRange(d)) if d > 500.0));
    trigger.done();
}

#[test]
fn test_measure_returns_a_valid_sample() {
    let mut trigger = PinMock::new(&[
        PinTransaction::set(PinState::High),
        PinTransaction::set(PinState::Low),
    ]);
    let mut sensor = UltrasonicSensor::new(SonarLanes {
        trigger: trigger.clone(),
        echo: ScriptedEcho {
            echo_width: Duration::from_millis(5),
        },
    });

    let sample = embassy_futures::block_on(sensor.measure(Duration::from_millis(200))).unwrap();
    assert!(sample.valid);
    // 5 ms of echo is ~86 cm; leave room for scheduling jitter.
    assert!(
        (50.0..200.0).contains(&sample.distance_cm),
        "distance was {}",
        sample.distance_cm
    );
    trigger.done();
}

// ---------------------------------------------------------------------------
// Coordination facade
// ---------------------------------------------------------------------------

#[test]
fn test_facade_degrades_to_servo_less_operation() {
    // The expander rejects its enable write, so servo control is disabled
    // while motors keep working.
    let expectations = [write(PWM_ADDRESS, vec![0x00, 0x01]).with_error(I2cErrorKind::Other)];
    let mock = I2cMock::new(&expectations);
    let mut checker = mock.clone();
    let bus = leak_bus(mock);
    let fwd = [
        PinTransaction::set(PinState::Low),
        PinTransaction::set(PinState::High),
        PinTransaction::set(PinState::Low),
    ];
    let rev = [
        PinTransaction::set(PinState::Low),
        PinTransaction::set(PinState::Low),
        PinTransaction::set(PinState::Low),
    ];
    let mut rig = TestRig::new(bus, RecordingStrip::default(), &fwd, &rev);

    let cfg = demo_config();
    let map = ChannelMap::build(&cfg).unwrap();
    let mut controller =
        SystemController::<TestPlatform>::new(&mut rig.registry, &map, &cfg).unwrap();

    assert!(!controller.servos_available());
    assert!(matches!(
        controller.set_servo_angle("base_joint", 90.0),
        Err(ServoError::PwmNotInitialized)
    ));

    controller.drive(50, 50).unwrap();
    assert_eq!(rig.left_pwm.duties(), vec![0, 50]);
    assert_eq!(rig.right_pwm.duties(), vec![0, 50]);

    controller.stop();
    assert_eq!(rig.left_pwm.duties(), vec![0, 50, 0]);

    rig.check_pins();
    checker.done();
}
