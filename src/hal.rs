//! ==============================================================================
//! hal.rs - Serial / Modbus Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a narrow interface for the two things the host needs from the
//!     operating system: listing serial ports and talking modbus rtu to the
//!     soil probe. sensor.rs only ever sees these traits.
//!
//! design:
//!     - BusConnector opens a configured line and hands back a RegisterBus.
//!     - RegisterBus reads one holding register at a time and can be closed.
//!     - PortLister enumerates ports as SerialPortDescriptor values.
//!     - on a real host these are backed by tokio-modbus (sync rtu client)
//!       and tokio-serial. tests use the scripted doubles in `testing`.
//!
//! relationships:
//!     - used by: sensor.rs (acquisition), ports.rs (port discovery)
//!     - uses: tokio-modbus, tokio-serial
//!
//! ==============================================================================

use crate::config::SerialConfig;
use crate::domain::SerialPortDescriptor;

use std::io;
use std::time::Duration;
use tokio_modbus::client::sync::Context;
use tokio_modbus::prelude::{Slave, SyncReader};
use tokio_serial::{DataBits, Parity, SerialPortBuilder, SerialPortType, StopBits};

/// failure reported by the transport, already sorted by layer
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// settings that cannot be applied to a serial line
    #[error("invalid serial settings: {0}")]
    Config(String),
    /// exception reply, crc/framing error, missing or short response
    #[error("{0}")]
    Protocol(String),
    /// i/o failure on the port itself
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Other(String),
}

impl From<io::Error> for BusError {
    fn from(err: io::Error) -> Self {
        // the rtu codec reports bad crc and garbled frames as InvalidData,
        // and a silent slave surfaces as TimedOut
        match err.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::TimedOut | io::ErrorKind::UnexpectedEof => {
                BusError::Protocol(err.to_string())
            }
            _ => BusError::Transport(err.to_string()),
        }
    }
}

impl From<tokio_modbus::Error> for BusError {
    fn from(err: tokio_modbus::Error) -> Self {
        match err {
            tokio_modbus::Error::Protocol(e) => BusError::Protocol(e.to_string()),
            tokio_modbus::Error::Transport(e) => e.into(),
            #[allow(unreachable_patterns)]
            other => BusError::Other(other.to_string()),
        }
    }
}

impl From<tokio_modbus::ExceptionCode> for BusError {
    fn from(code: tokio_modbus::ExceptionCode) -> Self {
        BusError::Protocol(format!("device replied with exception: {}", code))
    }
}

/// an open modbus line bound to one slave address
pub trait RegisterBus {
    /// read a single holding register (function code 3)
    fn read_holding_register(&mut self, address: u16) -> Result<u16, BusError>;
    fn close(&mut self) -> Result<(), BusError>;
}

pub trait BusConnector: Send + Sync {
    fn open(&self, path: &str, config: &SerialConfig) -> Result<Box<dyn RegisterBus>, BusError>;
}

pub trait PortLister: Send + Sync {
    fn list_ports(&self) -> Result<Vec<SerialPortDescriptor>, BusError>;
}

// ==============================================================================================
// REAL IMPLEMENTATION (tokio-modbus / tokio-serial)
// ==============================================================================================

/// builds the serial line description from config, rejecting values the
/// port cannot take
pub fn serial_port_builder(path: &str, config: &SerialConfig) -> Result<SerialPortBuilder, BusError> {
    if config.baud_rate == 0 {
        return Err(BusError::Config("baud rate must be positive".to_string()));
    }
    let data_bits = match config.data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        8 => DataBits::Eight,
        n => return Err(BusError::Config(format!("unsupported data bits {}", n))),
    };
    let parity = match config.parity.trim().to_ascii_lowercase().as_str() {
        "none" | "n" => Parity::None,
        "odd" | "o" => Parity::Odd,
        "even" | "e" => Parity::Even,
        other => return Err(BusError::Config(format!("unsupported parity '{}'", other))),
    };
    let stop_bits = match config.stop_bits {
        1 => StopBits::One,
        2 => StopBits::Two,
        n => return Err(BusError::Config(format!("unsupported stop bits {}", n))),
    };
    let timeout = Duration::try_from_secs_f64(config.timeout_secs)
        .map_err(|e| BusError::Config(format!("bad timeout {}: {}", config.timeout_secs, e)))?;

    Ok(tokio_serial::new(path, config.baud_rate)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(timeout))
}

/// opens real serial ports with the tokio-modbus blocking rtu client
pub struct RtuConnector;

impl BusConnector for RtuConnector {
    fn open(&self, path: &str, config: &SerialConfig) -> Result<Box<dyn RegisterBus>, BusError> {
        let builder = serial_port_builder(path, config)?;
        let timeout = Duration::try_from_secs_f64(config.timeout_secs)
            .map_err(|e| BusError::Config(e.to_string()))?;

        let mut ctx = tokio_modbus::client::sync::rtu::connect_slave(&builder, Slave(config.slave_address))
            .map_err(|e| BusError::Transport(format!("{}: {}", path, e)))?;
        ctx.set_timeout(Some(timeout));

        tracing::debug!(port = path, slave = config.slave_address, "rtu context open");
        Ok(Box::new(RtuBus { ctx: Some(ctx) }))
    }
}

struct RtuBus {
    ctx: Option<Context>,
}

impl RegisterBus for RtuBus {
    fn read_holding_register(&mut self, address: u16) -> Result<u16, BusError> {
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| BusError::Transport("port is closed".to_string()))?;
        let words = ctx.read_holding_registers(address, 1)??;
        words
            .first()
            .copied()
            .ok_or_else(|| BusError::Protocol(format!("empty response for register {}", address)))
    }

    fn close(&mut self) -> Result<(), BusError> {
        // dropping the context releases the serial handle
        match self.ctx.take() {
            Some(ctx) => {
                drop(ctx);
                Ok(())
            }
            None => Err(BusError::Other("port already closed".to_string())),
        }
    }
}

/// enumerates the ports the operating system knows about
pub struct SystemPorts;

impl PortLister for SystemPorts {
    fn list_ports(&self) -> Result<Vec<SerialPortDescriptor>, BusError> {
        let ports = tokio_serial::available_ports().map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|p| {
                let (description, hwid) = describe(&p.port_type);
                SerialPortDescriptor { device: p.port_name, description, hwid }
            })
            .collect())
    }
}

fn describe(port_type: &SerialPortType) -> (String, String) {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let description = usb
                .product
                .clone()
                .unwrap_or_else(|| "USB Serial".to_string());
            let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
            if let Some(serial) = &usb.serial_number {
                hwid.push_str(&format!(" SER={}", serial));
            }
            (description, hwid)
        }
        SerialPortType::BluetoothPort => ("Bluetooth".to_string(), "n/a".to_string()),
        SerialPortType::PciPort => ("PCI".to_string(), "PCI".to_string()),
        SerialPortType::Unknown => ("n/a".to_string(), "n/a".to_string()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_sorted_by_layer() {
        let crc = io::Error::new(io::ErrorKind::InvalidData, "Invalid CRC");
        assert!(matches!(BusError::from(crc), BusError::Protocol(_)));

        let silent = io::Error::new(io::ErrorKind::TimedOut, "no response");
        assert!(matches!(BusError::from(silent), BusError::Protocol(_)));

        let unplugged = io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected");
        assert!(matches!(BusError::from(unplugged), BusError::Transport(_)));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "permission denied");
        assert!(matches!(BusError::from(denied), BusError::Transport(_)));
    }

    #[test]
    fn test_exception_code_is_protocol() {
        let e = BusError::from(tokio_modbus::ExceptionCode::IllegalDataAddress);
        assert!(matches!(e, BusError::Protocol(_)));
    }

    #[test]
    fn test_builder_accepts_factory_settings() {
        assert!(serial_port_builder("/dev/ttyUSB0", &SerialConfig::default()).is_ok());
    }

    #[test]
    fn test_builder_rejects_bad_settings() {
        let bad = [
            SerialConfig { parity: "mark".to_string(), ..SerialConfig::default() },
            SerialConfig { data_bits: 9, ..SerialConfig::default() },
            SerialConfig { stop_bits: 3, ..SerialConfig::default() },
            SerialConfig { baud_rate: 0, ..SerialConfig::default() },
            SerialConfig { timeout_secs: -1.0, ..SerialConfig::default() },
        ];
        for config in bad {
            let err = serial_port_builder("/dev/ttyUSB0", &config).err().unwrap();
            assert!(matches!(err, BusError::Config(_)), "{:?}", config);
        }
    }

    #[test]
    fn test_describe_bluetooth_and_unknown() {
        assert_eq!(describe(&SerialPortType::BluetoothPort).0, "Bluetooth");
        assert_eq!(describe(&SerialPortType::Unknown), ("n/a".to_string(), "n/a".to_string()));
    }

    #[test]
    fn test_rtu_connector_missing_device_fails_open() {
        let err = RtuConnector
            .open("/dev/does-not-exist-soil", &SerialConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, BusError::Transport(_)));
    }
}
