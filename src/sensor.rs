//! ==============================================================================
//! sensor.rs - soil probe acquisition
//! ==============================================================================
//!
//! purpose:
//!     one call = one complete conversation with the 7-in-1 soil probe:
//!     resolve port -> open line -> read holding registers 0..=6 -> close.
//!     nothing is kept between calls.
//!
//! register map (function code 3, one register per request):
//!
//!     addr  field         raw        scale
//!     ----  ------------  ---------  -----
//!     0     humidity      unsigned   /10   %RH
//!     1     temperature   signed     /10   °C
//!     2     ec            unsigned   x1    µS/cm
//!     3     ph            unsigned   /10
//!     4     nitrogen      unsigned   x1    mg/kg
//!     5     phosphorus    unsigned   x1    mg/kg
//!     6     potassium     unsigned   x1    mg/kg
//!
//! failure handling:
//!     every failure comes back as a ReadError value. a failed open means no
//!     reads and no close. once the line is open it is closed exactly once
//!     (OpenBus drop guard), whether the reads succeed, fail or panic.
//!     one failed register fails the whole reading.
//!
//! relationships:
//!     - used by: main.rs (GET /api/data, --once)
//!     - uses: ports.rs (resolve_port), hal.rs (BusConnector, RegisterBus)
//!
//! ==============================================================================

use crate::config::SerialConfig;
use crate::domain::{ReadError, ReadErrorKind, SensorReading};
use crate::hal::{BusConnector, BusError, PortLister, RegisterBus, RtuConnector, SystemPorts};
use crate::ports;

use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, warn};

pub const REGISTER_COUNT: usize = 7;

const HUMIDITY: usize = 0;
const TEMPERATURE: usize = 1;
const EC: usize = 2;
const PH: usize = 3;
const NITROGEN: usize = 4;
const PHOSPHORUS: usize = 5;
const POTASSIUM: usize = 6;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// reads the soil probe on demand
pub struct SensorReader {
    config: SerialConfig,
    connector: Box<dyn BusConnector>,
    ports: Box<dyn PortLister>,
    /// one rs-485 line can only carry one transaction at a time
    line: Mutex<()>,
    show_data: bool,
}

impl SensorReader {
    pub fn new(config: SerialConfig, connector: Box<dyn BusConnector>, ports: Box<dyn PortLister>) -> Self {
        Self { config, connector, ports, line: Mutex::new(()), show_data: false }
    }

    /// reader backed by the real serial ports of this machine
    pub fn with_hardware(config: SerialConfig) -> Self {
        Self::new(config, Box::new(RtuConnector), Box::new(SystemPorts))
    }

    /// log every successful reading at info level
    pub fn show_sensor_data(mut self, show: bool) -> Self {
        self.show_data = show;
        self
    }

    /// Run one full acquisition cycle.
    ///
    /// Blocks for the duration of the serial exchange (up to seven times the
    /// configured timeout when the probe is silent). Concurrent callers wait
    /// for each other.
    pub fn read_sensor(&self) -> Result<SensorReading, ReadError> {
        let _line = self.line.lock().unwrap_or_else(PoisonError::into_inner);

        let port = ports::resolve_port(self.ports.as_ref())
            .unwrap_or_else(|| self.config.default_port.clone());

        let bus = match self.connector.open(&port, &self.config) {
            Ok(bus) => bus,
            Err(e) => {
                error!(port = %port, "error setting up modbus sensor: {}", e);
                error!("check serial connection and port access permissions (dialout group)");
                return Err(ReadError::new(ReadErrorKind::SetupFailure, e.to_string()));
            }
        };
        info!(port = %port, "modbus sensor setup complete");

        let result = {
            let mut open = OpenBus { bus, port: &port };
            read_registers(open.bus.as_mut())
        };

        match result {
            Ok(raw) => {
                let reading = decode(&raw, timestamp_now());
                if self.show_data {
                    info!(?reading, "sensor data read");
                }
                Ok(reading)
            }
            Err(e) => {
                let err = classify(e);
                error!(kind = ?err.kind, "sensor read failed: {}", err.message);
                Err(err)
            }
        }
    }
}

/// closes the line when dropped, including during unwinding
struct OpenBus<'a> {
    bus: Box<dyn RegisterBus>,
    port: &'a str,
}

impl Drop for OpenBus<'_> {
    fn drop(&mut self) {
        match self.bus.close() {
            Ok(()) => info!(port = %self.port, "modbus serial connection closed"),
            Err(e) => warn!(port = %self.port, "failed to close modbus serial connection: {}", e),
        }
    }
}

fn read_registers(bus: &mut dyn RegisterBus) -> Result<[u16; REGISTER_COUNT], BusError> {
    let mut raw = [0u16; REGISTER_COUNT];
    for (address, slot) in (0u16..).zip(raw.iter_mut()) {
        *slot = bus.read_holding_register(address)?;
        debug!(address, raw = *slot, "holding register read");
    }
    Ok(raw)
}

fn classify(err: BusError) -> ReadError {
    let kind = match &err {
        BusError::Protocol(_) => ReadErrorKind::ModbusError,
        BusError::Transport(_) => ReadErrorKind::SerialPortError,
        BusError::Config(_) | BusError::Other(_) => ReadErrorKind::UnexpectedError,
    };
    ReadError::new(kind, err.to_string())
}

/// round half away from zero to one decimal place
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn tenths(raw: f64) -> f64 {
    round1(raw / 10.0)
}

/// turn the seven raw register words into engineering units
pub fn decode(raw: &[u16; REGISTER_COUNT], timestamp: String) -> SensorReading {
    SensorReading {
        timestamp,
        humidity: tenths(f64::from(raw[HUMIDITY])),
        temperature: tenths(f64::from(raw[TEMPERATURE] as i16)),
        ec: raw[EC],
        ph: tenths(f64::from(raw[PH])),
        nitrogen: raw[NITROGEN],
        phosphorus: raw[PHOSPHORUS],
        potassium: raw[POTASSIUM],
    }
}

fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}
