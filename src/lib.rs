//! Ccs811 gas sensor driver
//!
//! All bus access is serialised through a FIFO gate, one transaction at a time.
//! Devices are brought up by a background supervisor task which retries
//! initialisation until it succeeds, and re-initialises the device following
//! any bus failure. Calls made while the device is not ready fail fast with
//! [`Error::NotReady`].
//!
//! ```no_run
//! # async fn example<T: sensor_ccs811::BusTransport>(transport: T) {
//! use sensor_ccs811::{Ccs811, Config};
//!
//! let sensor = Ccs811::new(transport, Config::default()).await;
//! sensor.wait_ready().await;
//!
//! if let Ok(m) = sensor.read_measurement().await {
//!     println!("eCO2: {} ppm, TVOC: {} ppb", m.co2eq, m.tvoc);
//! }
//! # }
//! ```
//!
//! Copyright 2019 Ryan Kurte

#[macro_use]
extern crate log;

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub mod device;
pub use device::*;

pub mod base;
pub use base::{BusTransport, HalTransport, Transaction};

pub mod supervisor;
pub use supervisor::{DeviceMode, DeviceState};

pub mod baseline;
pub use baseline::{BaselineStore, MemoryBaseline};

pub mod firmware;

#[cfg(test)]
mod mock;

use base::Core;
use supervisor::Event;

/// Ccs811 error object
#[derive(Debug, thiserror::Error)]
pub enum Error<ConnErr> {
    /// Underlying bus transport failure
    #[error("bus error: {0:?}")]
    Conn(ConnErr),

    /// Transport wrote a different number of bytes than requested
    #[error("write length mismatch ({actual} of {expected} bytes)")]
    WriteLength{ expected: usize, actual: usize },

    /// Transport returned a different number of bytes than requested
    #[error("read length mismatch ({actual} of {expected} bytes)")]
    ReadLength{ expected: usize, actual: usize },

    /// Unexpected HW_ID, this is not a Ccs811
    #[error("unexpected hardware id 0x{0:02x}")]
    IdentityMismatch(u8),

    /// Device is initialising or recovering from a fault
    #[error("device not ready")]
    NotReady,

    /// No new measurement is available
    #[error("data not ready")]
    DataNotReady,

    /// Error reported by the device
    #[error("device error: {0}")]
    Device(ErrorCode),

    /// Firmware verification failed, contains the final status byte
    #[error("firmware verify failed (status 0x{0:02x})")]
    VerifyFailed(u8),

    /// Baseline store or firmware image error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ccs811 measurement object
#[derive(PartialEq, Clone, Debug)]
pub struct Measurement {
    /// Equivalent CO2 concentration in parts-per-million (PPM)
    /// Range: 400 - 8192
    pub co2eq: u16,
    /// Total volatile organic compounds in parts-per-billion (PPB)
    /// Range: 0 - 1187
    pub tvoc: u16,
}

impl Measurement {
    /// Decode the first five bytes of ALG_RESULT_DATA
    /// Returns None where the status byte does not indicate new data
    pub fn from_alg_result(data: &[u8; 5]) -> Option<Self> {
        if !Status(data[4]).data_ready() {
            return None;
        }

        Some(Measurement {
            co2eq: u16::from_be_bytes([data[0], data[1]]),
            tvoc: u16::from_be_bytes([data[2], data[3]]),
        })
    }
}

/// Kinds of measurement produced by the device
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum MeasurementKind {
    /// Equivalent CO2 (ppm)
    Co2Equivalent,
    /// Total volatile organic compounds (ppb)
    Tvoc,
}

static CAPABILITIES: [MeasurementKind; 2] = [MeasurementKind::Co2Equivalent, MeasurementKind::Tvoc];

/// Ccs811 configuration
#[derive(PartialEq, Clone, Debug)]
pub struct Config {
    /// Bus number passed to [`BusTransport::open`]
    pub bus: u8,
    /// Device I2C address
    pub address: u8,
    pub drive_mode: DriveMode,
    /// Enable the data ready interrupt
    pub interrupt: bool,
    /// Only interrupt when thresholds are crossed
    pub threshold: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bus: 1,
            address: DEFAULT_ADDRESS,
            drive_mode: DriveMode::Sec1,
            interrupt: false,
            threshold: false,
        }
    }
}

impl Config {
    /// MEAS_MODE byte for this configuration
    pub fn mode_byte(&self) -> u8 {
        self.drive_mode.mode_byte(self.interrupt, self.threshold)
    }
}

/// Ccs811 sensor object
/// This is generic over a bus transport, see [`HalTransport`] for embedded-hal I2C devices
pub struct Ccs811<T: BusTransport> {
    core: Arc<Core<T>>,
    supervisor: JoinHandle<()>,
}

impl<T: BusTransport> Ccs811<T> {
    /// Create a new Ccs811 sensor instance
    ///
    /// This takes the bus gate and starts a background task to initialise the device,
    /// use [`Ccs811::wait_ready`] to wait for initialisation to complete.
    /// Must be called from within a tokio runtime, a `current_thread` runtime is
    /// expected where the transport blocks (see [`HalTransport`]).
    pub async fn new(transport: T, config: Config) -> Self {
        let gate = Arc::new(Mutex::new(()));
        let guard = gate.clone().lock_owned().await;

        let (state, _) = watch::channel(DeviceState::new(config.mode_byte()));
        let (events, events_rx) = mpsc::unbounded_channel();

        let core = Arc::new(Core {
            transport,
            bus: config.bus,
            address: config.address,
            gate,
            state,
            events,
        });

        debug!("Starting Ccs811 supervisor (bus: {} address: 0x{:02x})", config.bus, config.address);
        let supervisor = tokio::spawn(supervisor::run(core.clone(), guard, events_rx));

        Ccs811 { core, supervisor }
    }

    /// Fetch the current operating mode
    pub fn mode(&self) -> DeviceMode {
        self.core.state.borrow().mode
    }

    /// Fetch a snapshot of the device state
    pub fn state(&self) -> DeviceState {
        self.core.state.borrow().clone()
    }

    /// Subscribe to device state changes
    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.core.state.subscribe()
    }

    /// Wait until the device is ready to accept transactions
    pub async fn wait_ready(&self) {
        let mut rx = self.core.state.subscribe();
        // The sender lives in `core`, so this cannot observe a closed channel
        let _ = rx.wait_for(|s| s.mode == DeviceMode::Ready).await;
    }

    /// Measurement kinds this device produces
    pub fn capabilities(&self) -> &'static [MeasurementKind] {
        &CAPABILITIES
    }

    /// Most recent measurement and the time it was read
    pub fn last_reading(&self) -> Option<(Measurement, Instant)> {
        let s = self.core.state.borrow();
        match (&s.last_reading, s.last_reading_at) {
            (Some(m), Some(t)) => Some((m.clone(), t)),
            _ => None,
        }
    }

    /// Execute a raw transaction against the device, serialised with all other bus access
    pub async fn execute(&self, tx: Transaction) -> Result<Vec<u8>, Error<T::Error>> {
        self.core.execute(tx).await
    }

    async fn read_register<const N: usize>(&self, register: Register) -> Result<[u8; N], Error<T::Error>> {
        let data = self.core.execute(Transaction::read(register, N)).await?;

        let mut buff = [0u8; N];
        buff.copy_from_slice(&data);

        Ok(buff)
    }

    async fn write_register(&self, register: Register, data: &[u8]) -> Result<(), Error<T::Error>> {
        self.core.execute(Transaction::write(register, data)).await?;
        Ok(())
    }

    /// Read the HW_ID register, this should always return [`HARDWARE_ID`]
    pub async fn read_hardware_id(&self) -> Result<u8, Error<T::Error>> {
        let [v] = self.read_register::<1>(Register::HwId).await?;
        Ok(v)
    }

    pub async fn read_hardware_version(&self) -> Result<u8, Error<T::Error>> {
        let [v] = self.read_register::<1>(Register::HwVersion).await?;
        Ok(v)
    }

    /// Read the device status register
    pub async fn read_status(&self) -> Result<Status, Error<T::Error>> {
        let [v] = self.read_register::<1>(Register::Status).await?;
        Ok(Status(v))
    }

    /// Fetch the device error code, if the status register reports an error
    pub async fn read_error_code(&self) -> Result<Option<ErrorCode>, Error<T::Error>> {
        let status = self.read_status().await?;
        if !status.error() {
            return Ok(None);
        }

        let [v] = self.read_register::<1>(Register::ErrorId).await?;

        Ok(Some(ErrorCode::from_index(v)))
    }

    /// Check for errors reported by the device, returning them as [`Error::Device`]
    pub async fn check_error(&self) -> Result<(), Error<T::Error>> {
        match self.read_error_code().await? {
            Some(code) => Err(Error::Device(code)),
            None => Ok(()),
        }
    }

    /// Read a measurement from the algorithm result register
    /// Returns [`Error::DataNotReady`] if no new data is available
    pub async fn read_measurement(&self) -> Result<Measurement, Error<T::Error>> {
        let data = self.read_register::<5>(Register::AlgResultData).await?;

        let m = match Measurement::from_alg_result(&data) {
            Some(m) => m,
            None => return Err(Error::DataNotReady),
        };

        trace!("Measurement: {:?}", m);

        let now = Instant::now();
        self.core.state.send_modify(|s| {
            s.last_reading = Some(m.clone());
            s.last_reading_at = Some(now);
        });

        Ok(m)
    }

    /// Read the raw sensor current and voltage
    pub async fn read_raw_data(&self) -> Result<RawData, Error<T::Error>> {
        let data = self.read_register::<2>(Register::RawData).await?;
        Ok(RawData::from_bytes(data))
    }

    /// Set temperature (C) and relative humidity (%) for measurement compensation
    /// Values outside of -25 - 100C and 0 - 100% are clamped
    pub async fn set_environmental_compensation(&self, temperature: f32, humidity: f32) -> Result<(), Error<T::Error>> {
        let data = encode_environment(temperature, humidity);
        self.write_register(Register::EnvData, &data).await
    }

    /// Read the current algorithm baseline
    pub async fn read_baseline(&self) -> Result<u16, Error<T::Error>> {
        let data = self.read_register::<2>(Register::Baseline).await?;
        Ok(u16::from_be_bytes(data))
    }

    /// Restore a previously read algorithm baseline
    pub async fn write_baseline(&self, baseline: u16) -> Result<(), Error<T::Error>> {
        self.write_register(Register::Baseline, &baseline.to_be_bytes()).await
    }

    /// Read the bootloader firmware version
    pub async fn read_firmware_version(&self) -> Result<FirmwareVersion, Error<T::Error>> {
        let data = self.read_register::<2>(Register::FwBootVersion).await?;
        Ok(FirmwareVersion::from_bytes(data))
    }

    /// Read the application firmware version
    pub async fn read_app_version(&self) -> Result<FirmwareVersion, Error<T::Error>> {
        let data = self.read_register::<2>(Register::FwAppVersion).await?;
        Ok(FirmwareVersion::from_bytes(data))
    }

    /// Configure the drive mode, retained across re-initialisation
    pub async fn set_drive_mode(&self, drive_mode: DriveMode, interrupt: bool, threshold: bool) -> Result<(), Error<T::Error>> {
        let mode = drive_mode.mode_byte(interrupt, threshold);

        self.write_register(Register::MeasMode, &[mode]).await?;

        self.core.state.send_modify(|s| s.measurement_config = mode);

        Ok(())
    }

    /// Soft reset the underlying device
    /// The device is re-initialised by the supervisor once the reset completes
    pub async fn reset(&self) -> Result<(), Error<T::Error>> {
        self.write_register(Register::SwReset, &RESET_MAGIC).await?;

        self.core.state.send_modify(|s| s.mode = DeviceMode::Uninitialized);
        self.core.request(Event::Reinit);

        Ok(())
    }
}

impl<T: BusTransport> Drop for Ccs811<T> {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}
