//! Ccs811 device definitions
//!
//! Copyright 2019 Ryan Kurte

use core::fmt;
use core::str::FromStr;
use std::time::Duration;

/// Ccs811 default I2C address (ADDR pin low)
pub const DEFAULT_ADDRESS: u8 = 0x5A;
/// Ccs811 alternate I2C address (ADDR pin high)
pub const ALTERNATE_ADDRESS: u8 = 0x5B;

/// Expected content of the HW_ID register
pub const HARDWARE_ID: u8 = 0x81;

/// Processing time required by the device after any write
pub const SETTLE_DELAY: Duration = Duration::from_millis(20);
/// Backoff between failed initialisation attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Magic sequence for the SW_RESET mailbox
pub const RESET_MAGIC: [u8; 4] = [0x11, 0xE5, 0x72, 0x8A];
/// Magic sequence for the APP_ERASE mailbox
pub const ERASE_MAGIC: [u8; 4] = [0xE7, 0xA7, 0xE6, 0x09];

/// Maximum length of a single APP_DATA write
pub const FIRMWARE_CHUNK: usize = 8;

pub const WAIT_AFTER_RESET: Duration = Duration::from_millis(2);
pub const WAIT_AFTER_ERASE: Duration = Duration::from_millis(500);
pub const WAIT_AFTER_DATA: Duration = Duration::from_millis(50);
pub const WAIT_AFTER_VERIFY: Duration = Duration::from_millis(70);

pub const STATUS_ERROR: u8 = 0b0000_0001;
pub const STATUS_DATA_READY: u8 = 0b0000_1000;
pub const STATUS_APP_VALID: u8 = 0b0001_0000;
pub const STATUS_APP_VERIFY: u8 = 0b0010_0000;
pub const STATUS_APP_ERASE: u8 = 0b0100_0000;
pub const STATUS_FW_MODE: u8 = 0b1000_0000;

pub const TEMPERATURE_MIN: f32 = -25.0;
pub const TEMPERATURE_MAX: f32 = 100.0;
pub const HUMIDITY_MIN: f32 = 0.0;
pub const HUMIDITY_MAX: f32 = 100.0;

/// Ccs811 registers and mailboxes
/// All registers are a single byte unless otherwise noted
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Register {
    /// Status flags, see [`Status`]
    Status = 0x00,

    /// Measurement mode and interrupt configuration
    MeasMode = 0x01,

    /// Algorithm result, up to 8 bytes
    /// eCO2 (2), TVOC (2), STATUS (1), ERROR_ID (1), RAW_DATA (2)
    AlgResultData = 0x02,

    /// Raw sensor current and ADC reading, 2 bytes
    RawData = 0x03,

    /// Humidity and temperature compensation, 4 bytes
    EnvData = 0x05,

    /// Opaque algorithm baseline, 2 bytes
    Baseline = 0x11,

    /// Hardware identifier, always 0x81
    HwId = 0x20,

    /// Hardware version
    HwVersion = 0x21,

    /// Bootloader firmware version, 2 bytes
    FwBootVersion = 0x23,

    /// Application firmware version, 2 bytes
    FwAppVersion = 0x24,

    /// Error source, see [`ErrorCode`]
    ErrorId = 0xE0,

    /// Application erase (bootloader), takes [`ERASE_MAGIC`]
    AppErase = 0xF1,

    /// Application data (bootloader), up to 8 bytes per write
    AppData = 0xF2,

    /// Application verify (bootloader), no data
    AppVerify = 0xF3,

    /// Transition from boot to application mode, no data
    AppStart = 0xF4,

    /// Software reset, takes [`RESET_MAGIC`]
    SwReset = 0xFF,
}

/// Sensor drive mode, bits 6:4 of the MEAS_MODE register
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum DriveMode {
    /// Measurements disabled
    Idle = 0,
    /// Constant power, one measurement per second
    Sec1 = 1,
    /// Pulse heating, one measurement every 10 seconds
    Sec10 = 2,
    /// Low power pulse heating, one measurement every 60 seconds
    Sec60 = 3,
    /// Constant power, raw data only every 250ms
    Ms250 = 4,
}

impl DriveMode {
    /// Build the MEAS_MODE byte for this drive mode
    pub fn mode_byte(&self, interrupt: bool, threshold: bool) -> u8 {
        let mut v = (*self as u8) << 4;
        if interrupt {
            v |= 1 << 3;
        }
        if threshold {
            v |= 1 << 2;
        }
        v
    }
}

impl FromStr for DriveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(DriveMode::Idle),
            "1s" => Ok(DriveMode::Sec1),
            "10s" => Ok(DriveMode::Sec10),
            "60s" => Ok(DriveMode::Sec60),
            "250ms" => Ok(DriveMode::Ms250),
            _ => Err(format!("unrecognised drive mode '{}' (idle, 1s, 10s, 60s, 250ms)", s)),
        }
    }
}

/// Decoded STATUS register
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Status(pub u8);

impl Status {
    /// An error is reported in the ERROR_ID register
    pub fn error(&self) -> bool {
        self.0 & STATUS_ERROR != 0
    }

    /// A new algorithm result is available
    pub fn data_ready(&self) -> bool {
        self.0 & STATUS_DATA_READY != 0
    }

    pub fn app_valid(&self) -> bool {
        self.0 & STATUS_APP_VALID != 0
    }

    pub fn app_verified(&self) -> bool {
        self.0 & STATUS_APP_VERIFY != 0
    }

    pub fn app_erased(&self) -> bool {
        self.0 & STATUS_APP_ERASE != 0
    }

    /// Device is running application firmware (otherwise in boot mode)
    pub fn app_mode(&self) -> bool {
        self.0 & STATUS_FW_MODE != 0
    }
}

impl From<u8> for Status {
    fn from(v: u8) -> Self {
        Status(v)
    }
}

/// Device reported error, indexed by the ERROR_ID byte
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ErrorCode {
    /// Write to an invalid register address
    WriteRegInvalid,
    /// Read from an invalid register address
    ReadRegInvalid,
    /// Unsupported measurement mode requested
    MeasModeInvalid,
    /// Sensor resistance reached its maximum
    MaxResistance,
    /// Heater current out of range
    HeaterFault,
    /// Heater voltage incorrectly applied
    HeaterSupply,
    /// Index with no known meaning
    Unknown(u8),
}

impl ErrorCode {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => ErrorCode::WriteRegInvalid,
            1 => ErrorCode::ReadRegInvalid,
            2 => ErrorCode::MeasModeInvalid,
            3 => ErrorCode::MaxResistance,
            4 => ErrorCode::HeaterFault,
            5 => ErrorCode::HeaterSupply,
            v => ErrorCode::Unknown(v),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::WriteRegInvalid => write!(f, "WRITE_REG_INVALID"),
            ErrorCode::ReadRegInvalid => write!(f, "READ_REG_INVALID"),
            ErrorCode::MeasModeInvalid => write!(f, "MEASMODE_INVALID"),
            ErrorCode::MaxResistance => write!(f, "MAX_RESISTANCE"),
            ErrorCode::HeaterFault => write!(f, "HEATER_FAULT"),
            ErrorCode::HeaterSupply => write!(f, "HEATER_SUPPLY"),
            ErrorCode::Unknown(v) => write!(f, "unknown error (0x{:02x})", v),
        }
    }
}

/// Firmware version as reported by FW_BOOT_VERSION / FW_APP_VERSION
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FirmwareVersion {
    pub fn from_bytes(data: [u8; 2]) -> Self {
        FirmwareVersion {
            major: data[0] >> 4,
            minor: data[0] & 0x0F,
            patch: data[1],
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// RAW_DATA register contents
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct RawData {
    /// Current through the sensor in microamps (0 - 63)
    pub current_ua: u8,
    /// Voltage across the sensor as a 10-bit ADC reading (1.65V full scale)
    pub adc: u16,
}

impl RawData {
    pub fn from_bytes(data: [u8; 2]) -> Self {
        RawData {
            current_ua: data[0] >> 2,
            adc: ((data[0] as u16 & 0x03) << 8) | data[1] as u16,
        }
    }
}

/// Encode temperature (C) and relative humidity (%) for the ENV_DATA register
///
/// Values are clamped to the supported range, then written as big-endian
/// fixed point fractions of 1/512, humidity first and temperature offset by 25C.
pub fn encode_environment(temperature: f32, humidity: f32) -> [u8; 4] {
    let t = temperature.clamp(TEMPERATURE_MIN, TEMPERATURE_MAX);
    let h = humidity.clamp(HUMIDITY_MIN, HUMIDITY_MAX);

    let h = (h * 512.0) as u16;
    let t = ((t + 25.0) * 512.0) as u16;

    [
        (h >> 8) as u8,
        (h & 0xFF) as u8,
        (t >> 8) as u8,
        (t & 0xFF) as u8,
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encode_environment() {
        let tests = &[
            ((25.0, 50.0), [0x64, 0x00, 0x64, 0x00]),
            // Clamped to 100C and 0%
            ((150.0, -10.0), [0x00, 0x00, 0xFA, 0x00]),
            // Clamped to -25C and 100%
            ((-40.0, 120.0), [0xC8, 0x00, 0x00, 0x00]),
            // Fractions are truncated
            ((0.001, 0.001), [0x00, 0x00, 0x32, 0x00]),
        ];

        for ((t, h), expected) in tests {
            assert_eq!(&encode_environment(*t, *h), expected, "t: {} h: {}", t, h);
        }
    }

    #[test]
    fn test_firmware_version() {
        let v = FirmwareVersion::from_bytes([0x12, 0x05]);
        assert_eq!(v, FirmwareVersion{ major: 1, minor: 2, patch: 5 });
        assert_eq!(v.to_string(), "1.2.5");
    }

    #[test]
    fn test_raw_data() {
        let r = RawData::from_bytes([0b1010_0111, 0x2C]);
        assert_eq!(r.current_ua, 0b101001);
        assert_eq!(r.adc, 0x32C);
    }

    #[test]
    fn test_mode_byte() {
        assert_eq!(DriveMode::Idle.mode_byte(false, false), 0x00);
        assert_eq!(DriveMode::Sec1.mode_byte(false, false), 0x10);
        assert_eq!(DriveMode::Sec10.mode_byte(true, false), 0x28);
        assert_eq!(DriveMode::Sec60.mode_byte(true, true), 0x3C);
        assert_eq!(DriveMode::Ms250.mode_byte(false, true), 0x44);

        assert_eq!("60s".parse::<DriveMode>(), Ok(DriveMode::Sec60));
        assert!("5m".parse::<DriveMode>().is_err());
    }

    #[test]
    fn test_status() {
        let s = Status::from(0x98);
        assert!(s.app_mode());
        assert!(s.app_valid());
        assert!(s.data_ready());
        assert!(!s.error());
        assert!(!s.app_verified());
        assert!(!s.app_erased());

        assert!(Status(0x01).error());
    }

    #[test]
    fn test_error_code() {
        assert_eq!(ErrorCode::from_index(0), ErrorCode::WriteRegInvalid);
        assert_eq!(ErrorCode::from_index(4), ErrorCode::HeaterFault);
        assert_eq!(ErrorCode::from_index(5), ErrorCode::HeaterSupply);
        assert_eq!(ErrorCode::from_index(9), ErrorCode::Unknown(9));
        assert_eq!(ErrorCode::HeaterSupply.to_string(), "HEATER_SUPPLY");
    }
}
