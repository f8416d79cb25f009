//! ==============================================================================
//! ports.rs - serial port discovery
//! ==============================================================================
//!
//! purpose:
//!     guesses which serial port the soil probe's usb/rs-485 adapter is on.
//!     the rule is deliberately simple: the first port (sorted by device
//!     name) whose description or hardware id mentions "usb" and whose
//!     description does not mention "bluetooth".
//!
//!     with two usb adapters plugged in the wrong one can win. there is no
//!     probing of the device; callers fall back to the configured default
//!     path when nothing matches.
//!
//! relationships:
//!     - used by: sensor.rs (once per acquisition, never cached)
//!     - uses: hal.rs (PortLister)
//!
//! ==============================================================================

use crate::domain::SerialPortDescriptor;
use crate::hal::PortLister;

use tracing::{debug, info, warn};

/// true when the port looks like a usb serial adapter
pub fn is_usb_candidate(port: &SerialPortDescriptor) -> bool {
    let description = port.description.to_uppercase();
    let hwid = port.hwid.to_uppercase();
    (description.contains("USB") || hwid.contains("USB")) && !description.contains("BLUETOOTH")
}

/// pick the first usb candidate in device-name order
pub fn select_port(ports: &[SerialPortDescriptor]) -> Option<String> {
    let mut sorted: Vec<&SerialPortDescriptor> = ports.iter().collect();
    sorted.sort_by(|a, b| a.device.cmp(&b.device));

    let mut selected: Option<String> = None;
    for port in sorted {
        debug!(
            device = %port.device,
            description = %port.description,
            hwid = %port.hwid,
            "serial port detected"
        );
        if !is_usb_candidate(port) {
            continue;
        }
        match &selected {
            None => {
                info!(device = %port.device, "selected usb port");
                selected = Some(port.device.clone());
            }
            Some(_) => info!(device = %port.device, "other usb port found, not selected"),
        }
    }
    selected
}

/// enumerate ports and pick one, or None when the default path should be used
pub fn resolve_port(lister: &dyn PortLister) -> Option<String> {
    let ports = match lister.list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("serial port enumeration failed: {}", e);
            return None;
        }
    };

    if ports.is_empty() {
        warn!("no serial ports found, is the usb-to-serial converter connected?");
        return None;
    }

    let selected = select_port(&ports);
    if selected.is_none() {
        warn!("could not identify a usb serial port among {} port(s)", ports.len());
    }
    selected
}
