//! Host rig: runs the full coordination core against console-logging fake
//! hardware and a TUN/TAP network stack, so the command surface can be
//! exercised end-to-end without a robot on the bench.

use core::cell::RefCell;
use core::convert::Infallible;

use clap::Parser;
use embassy_executor::{Executor, Spawner};
use embassy_net::{Config, Ipv4Address, Ipv4Cidr, Runner, StackResources};
use embassy_net_tuntap::TunTapDevice;
use embassy_time::Timer;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::{self, I2c};
use embedded_hal::pwm::SetDutyCycle;
use embedded_hal_async::digital::Wait;
use heapless::Vec;
use smart_leds_trait::{SmartLedsWrite, RGB8};
use static_cell::StaticCell;
use tracing::{info, trace};

use ttb_core::mk_static;
use ttb_core::utils::config::{
    LedGroupConfig, LedsConfig, MotorPinsConfig, MotorsConfig, PwmConfig, RobotConfig,
    ServoConfig, SonarConfig,
};
use ttb_core::utils::controllers::bus::{BusRegistry, MotorLanes, RobotPlatform, SonarLanes};
use ttb_core::utils::controllers::channel_map::ChannelMap;
use ttb_core::utils::controllers::leds::LedEngine;
use ttb_core::utils::{wss, SystemController};

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// TAP device name
    #[clap(long, default_value = "tap0")]
    tap: String,
    /// use a static IP instead of DHCP
    #[clap(long)]
    static_ip: bool,
    /// JSON hardware configuration; a built-in default is used when omitted
    #[clap(long)]
    config: Option<std::path::PathBuf>,
}

// ---------------------------------------------------------------------------
// Console fakes standing in for the board HAL
// ---------------------------------------------------------------------------

/// I2C bus that logs writes and reads back zeros.
struct ConsoleI2c;

impl i2c::ErrorType for ConsoleI2c {
    type Error = Infallible;
}

impl I2c for ConsoleI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [i2c::Operation<'_>],
    ) -> Result<(), Self::Error> {
        for op in operations.iter_mut() {
            match op {
                i2c::Operation::Write(bytes) => trace!(address, ?bytes, "i2c write"),
                i2c::Operation::Read(buffer) => buffer.fill(0),
            }
        }
        Ok(())
    }
}

/// LED strip that logs each frame instead of driving pixels.
struct ConsoleStrip;

impl SmartLedsWrite for ConsoleStrip {
    type Error = Infallible;
    type Color = RGB8;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        let mut first = None;
        let mut pixels = 0usize;
        for color in iterator {
            let color: RGB8 = color.into();
            if first.is_none() {
                first = Some(color);
            }
            pixels += 1;
        }
        trace!(pixels, ?first, "led frame");
        Ok(())
    }
}

/// Motor PWM lane that logs duty cycles.
struct ConsolePwm(&'static str);

impl embedded_hal::pwm::ErrorType for ConsolePwm {
    type Error = Infallible;
}

impl SetDutyCycle for ConsolePwm {
    fn max_duty_cycle(&self) -> u16 {
        100
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        trace!(lane = self.0, duty, "pwm duty");
        Ok(())
    }
}

/// GPIO output that logs level changes.
struct ConsolePin(&'static str);

impl embedded_hal::digital::ErrorType for ConsolePin {
    type Error = Infallible;
}

impl OutputPin for ConsolePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        trace!(pin = self.0, "low");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        trace!(pin = self.0, "high");
        Ok(())
    }
}

/// Echo pin simulating an object roughly 20 cm away.
struct EchoSim;

impl embedded_hal::digital::ErrorType for EchoSim {
    type Error = Infallible;
}

impl Wait for EchoSim {
    async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
        Timer::after_micros(200).await;
        Ok(())
    }

    async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
        Timer::after_micros(1200).await;
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

struct RigPlatform;

impl RobotPlatform for RigPlatform {
    type I2c = ConsoleI2c;
    type Led = ConsoleStrip;
    type MotorPwm = ConsolePwm;
    type DirPin = ConsolePin;
    type TrigPin = ConsolePin;
    type EchoPin = EchoSim;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn default_config() -> RobotConfig {
    let mut servos = hashbrown::HashMap::new();
    for (name, channel) in [
        ("base_joint", 0u8),
        ("shoulder", 1),
        ("wrist", 2),
        ("grip", 3),
        ("camera_tilt", 4),
    ] {
        servos.insert(
            name.to_string(),
            ServoConfig {
                channel,
                min_pulse: 500,
                max_pulse: 2500,
                min_angle: 0.0,
                max_angle: 180.0,
                default_angle: 90.0,
            },
        );
    }
    let mut groups = hashbrown::HashMap::new();
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
            startup_demo: true,
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

fn load_config(path: Option<&std::path::Path>) -> RobotConfig {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).expect("config file unreadable");
            serde_json::from_str(&raw).expect("config file malformed")
        }
        None => default_config(),
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, TunTapDevice>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn motion_task(mut ctrl: SystemController<RigPlatform>) -> ! {
    ctrl.command_loop().await
}

#[embassy_executor::task]
async fn led_task(mut engine: LedEngine<ConsoleStrip>) {
    engine.run().await;
}

#[embassy_executor::task]
async fn main_task(spawner: Spawner) {
    let opts: Opts = Opts::parse();
    let cfg = load_config(opts.config.as_deref());

    // Misconfiguration must abort before any bus handle exists.
    let map = ChannelMap::build(&cfg).expect("configuration rejected");

    let i2c_bus = mk_static!(RefCell<ConsoleI2c>, RefCell::new(ConsoleI2c));
    let mut registry = BusRegistry::<RigPlatform>::new(
        i2c_bus,
        ConsoleStrip,
        MotorLanes {
            pwm: ConsolePwm("left"),
            forward: ConsolePin("left_forward"),
            reverse: ConsolePin("left_reverse"),
        },
        MotorLanes {
            pwm: ConsolePwm("right"),
            forward: ConsolePin("right_forward"),
            reverse: ConsolePin("right_reverse"),
        },
        SonarLanes {
            trigger: ConsolePin("sonar_trigger"),
            echo: EchoSim,
        },
    );

    let strip = registry.acquire_led().expect("LED strip already claimed");
    let engine = LedEngine::new(strip, &map, 0, &cfg.leds);
    spawner.spawn(led_task(engine)).unwrap();

    let controller =
        SystemController::new(&mut registry, &map, &cfg).expect("hardware bring-up failed");
    spawner.spawn(motion_task(controller)).unwrap();

    // Network bring-up
    let device = TunTapDevice::new(&opts.tap).unwrap();
    let config = if opts.static_ip {
        Config::ipv4_static(embassy_net::StaticConfigV4 {
            address: Ipv4Cidr::new(Ipv4Address::new(192, 168, 69, 2), 24),
            dns_servers: Vec::new(),
            gateway: Some(Ipv4Address::new(192, 168, 69, 1)),
        })
    } else {
        Config::dhcpv4(Default::default())
    };
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0xfeed_beef);

    static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(device, config, RESOURCES.init(StackResources::new()), seed);
    spawner.spawn(net_task(runner)).unwrap();

    info!("Waiting for network link...");
    stack.wait_config_up().await;

    info!("Starting WebSocket server on port 8000");
    wss(0, 8000, stack, None).await;
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(main_task(spawner)).unwrap();
    });
}
