//! Ccs811 command-line utility
//!
//! Copyright 2019 Ryan Kurte

extern crate linux_embedded_hal;
use linux_embedded_hal::I2cdev;

extern crate structopt;
use structopt::StructOpt;

extern crate humantime;
use humantime::{Duration as HumanDuration};

#[macro_use] extern crate log;
extern crate simplelog;
use simplelog::{TermLogger, LevelFilter, TerminalMode, ColorChoice};

extern crate sensor_ccs811;
use sensor_ccs811::{Ccs811, Config, DriveMode, Error, HalTransport, DEFAULT_ADDRESS};

#[derive(StructOpt)]
#[structopt(name = "ccs811-util")]
/// A Command Line Interface (CLI) for interacting with a local Ccs811 gas sensor over I2C
pub struct Options {

    /// Specify the i2c bus number to use to connect to the ccs811 device (/dev/i2c-N)
    #[structopt(short="b", long = "bus", default_value = "1", env = "CCS811_I2C_BUS")]
    bus: u8,

    /// Device address (0x5a or 0x5b)
    #[structopt(short="a", long = "address", default_value = "0x5a", parse(try_from_str = parse_address))]
    address: u8,

    /// Drive mode (idle, 1s, 10s, 60s, 250ms)
    #[structopt(short="m", long = "mode", default_value = "1s")]
    mode: DriveMode,

    /// Specify period for reading measurements
    #[structopt(short = "p", long = "sample-period", default_value="1s")]
    pub period: HumanDuration,

    /// Ambient temperature (C) for compensation
    #[structopt(long = "temperature", requires = "humidity", allow_hyphen_values = true)]
    temperature: Option<f32>,

    /// Ambient relative humidity (%) for compensation
    #[structopt(long = "humidity", requires = "temperature")]
    humidity: Option<f32>,

    /// Baseline to restore on startup
    #[structopt(long = "baseline", parse(try_from_str = parse_baseline))]
    baseline: Option<u16>,

    /// Flash an application firmware image before starting
    #[structopt(long = "firmware")]
    firmware: Option<String>,

    /// Enable verbose logging
    #[structopt(long = "log-level", default_value = "info")]
    level: LevelFilter,
}

fn parse_hex(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(v) => u32::from_str_radix(v, 16),
        None => s.parse(),
    }
}

fn parse_address(s: &str) -> Result<u8, String> {
    let v = parse_hex(s).map_err(|e| e.to_string())?;
    u8::try_from(v).map_err(|e| e.to_string())
}

fn parse_baseline(s: &str) -> Result<u16, String> {
    let v = parse_hex(s).map_err(|e| e.to_string())?;
    u16::try_from(v).map_err(|e| e.to_string())
}

// HalTransport blocks on I2C transfers, so the sensor gets a single-threaded runtime to itself
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Load options
    let opts = Options::from_args();

    // Setup logging
    TermLogger::init(opts.level, simplelog::Config::default(), TerminalMode::Mixed, ColorChoice::Auto).unwrap();

    if opts.address != DEFAULT_ADDRESS {
        debug!("Using non-default address: 0x{:02x}", opts.address);
    }

    let config = Config {
        bus: opts.bus,
        address: opts.address,
        drive_mode: opts.mode,
        ..Config::default()
    };

    debug!("Connecting to CCS811");
    let transport = HalTransport::new(|bus: u8| I2cdev::new(format!("/dev/i2c-{}", bus)));
    let sensor = Ccs811::new(transport, config).await;

    debug!("Waiting for sensor to initialise");
    sensor.wait_ready().await;

    if let Some(path) = &opts.firmware {
        let f = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Error opening firmware image '{}': {:?}", path, e);
                std::process::exit(-1);
            }
        };

        info!("Flashing firmware image '{}'", path);
        if let Err(e) = sensor.update_firmware(std::io::BufReader::new(f)).await {
            error!("Error updating firmware: {}", e);
            std::process::exit(-2);
        }

        sensor.wait_ready().await;
    }

    match (sensor.read_firmware_version().await, sensor.read_app_version().await) {
        (Ok(boot), Ok(app)) => info!("Connected to CCS811 (boot: {} app: {})", boot, app),
        (Err(e), _) | (_, Err(e)) => warn!("Error reading firmware version: {}", e),
    }

    if let (Some(t), Some(h)) = (opts.temperature, opts.humidity) {
        debug!("Setting compensation: {:.1} C {:.1} %", t, h);
        if let Err(e) = sensor.set_environmental_compensation(t, h).await {
            error!("Error setting environmental compensation: {}", e);
            std::process::exit(-3);
        }
    }

    if let Some(b) = opts.baseline {
        debug!("Restoring baseline: 0x{:04x}", b);
        if let Err(e) = sensor.write_baseline(b).await {
            error!("Error restoring baseline: {}", e);
            std::process::exit(-4);
        }
    }

    loop {
        // Wait for enough time for another sensor reading
        tokio::time::sleep(*opts.period).await;

        match sensor.read_measurement().await {
            Ok(m) => {
                info!("eCO2: {} ppm, TVOC: {} ppb", m.co2eq, m.tvoc);
            },
            Err(Error::DataNotReady) => {
                debug!("Sensor data not ready");

                match sensor.read_error_code().await {
                    Ok(Some(code)) => warn!("Sensor reported error: {}", code),
                    Ok(None) => (),
                    Err(e) => warn!("Error reading sensor status: {}", e),
                }
            },
            Err(Error::NotReady) => {
                warn!("Sensor not ready, waiting for re-initialisation");
                sensor.wait_ready().await;
            },
            Err(e) => {
                warn!("Error reading sensor data: {}", e);
            },
        }

        match sensor.read_baseline().await {
            Ok(b) => debug!("Baseline: 0x{:04x}", b),
            Err(e) => debug!("Error reading baseline: {}", e),
        }
    }
}
