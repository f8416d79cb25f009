use serde::{Deserialize, Serialize};
use std::fmt;

/// a serial port as reported by the operating system
///
/// read-only view; description and hwid follow the pyserial-style strings
/// that the usb heuristic in ports.rs matches against
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialPortDescriptor {
    /// device path, e.g. "/dev/ttyUSB0" or "COM3"
    pub device: String,
    /// human readable description ("USB Serial", "Bluetooth", "n/a", ...)
    pub description: String,
    /// hardware id ("USB VID:PID=1A86:7523 SER=...", "n/a", ...)
    pub hwid: String,
}

/// one complete set of soil measurements
///
/// only produced when all seven registers were read. field names are the
/// json keys the dashboard and the advisor prompt expect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// local wall-clock time, "%Y-%m-%d %H:%M:%S"
    pub timestamp: String,
    /// relative humidity in %RH
    pub humidity: f64,
    /// soil temperature in °C
    pub temperature: f64,
    /// electrical conductivity in µS/cm
    pub ec: u16,
    pub ph: f64,
    /// mg/kg
    pub nitrogen: u16,
    /// mg/kg
    pub phosphorus: u16,
    /// mg/kg
    pub potassium: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ReadErrorKind {
    /// the port could not be opened or configured
    SetupFailure,
    /// protocol-level failure: exception reply, bad crc, no/short response
    ModbusError,
    /// transport-level i/o failure on the serial line
    SerialPortError,
    UnexpectedError,
}

/// why an acquisition produced no reading
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadError {
    pub kind: ReadErrorKind,
    pub message: String,
}

impl ReadError {
    pub fn new(kind: ReadErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            ReadErrorKind::SetupFailure => "Sensor setup failed",
            ReadErrorKind::ModbusError => "Modbus communication error",
            ReadErrorKind::SerialPortError => "Serial port issue",
            ReadErrorKind::UnexpectedError => "Unexpected error",
        };
        write!(f, "{}: {}", prefix, self.message)
    }
}

impl std::error::Error for ReadError {}

/// body of GET /api/data
///
/// both variants go out with http 200; clients tell them apart by the
/// presence of the `error` key.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum DataResponse {
    Reading(SensorReading),
    Error { error: String },
}

impl From<Result<SensorReading, ReadError>> for DataResponse {
    fn from(result: Result<SensorReading, ReadError>) -> Self {
        match result {
            Ok(reading) => DataResponse::Reading(reading),
            Err(e) => DataResponse::Error { error: e.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SensorReading {
        SensorReading {
            timestamp: "2025-01-01 08:00:00".to_string(),
            humidity: 45.5,
            temperature: -10.2,
            ec: 980,
            ph: 6.8,
            nitrogen: 12,
            phosphorus: 5,
            potassium: 33,
        }
    }

    #[test]
    fn test_reading_serializes_flat() {
        let json = serde_json::to_value(DataResponse::from(Ok(sample()))).unwrap();
        assert_eq!(json["humidity"], 45.5);
        assert_eq!(json["temperature"], -10.2);
        assert_eq!(json["ec"], 980);
        assert_eq!(json["ph"], 6.8);
        assert_eq!(json["potassium"], 33);
        assert_eq!(json["timestamp"], "2025-01-01 08:00:00");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_error_serializes_single_key() {
        let err = ReadError::new(ReadErrorKind::ModbusError, "no response");
        let json = serde_json::to_value(DataResponse::from(Err(err))).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(obj["error"], "Modbus communication error: no response");
    }

    #[test]
    fn test_error_prefixes() {
        let cases = [
            (ReadErrorKind::SetupFailure, "Sensor setup failed: x"),
            (ReadErrorKind::SerialPortError, "Serial port issue: x"),
            (ReadErrorKind::UnexpectedError, "Unexpected error: x"),
        ];
        for (kind, expected) in cases {
            assert_eq!(ReadError::new(kind, "x").to_string(), expected);
        }
    }
}
