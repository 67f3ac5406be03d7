//! Serial port listing for `--list-ports`

use std::fmt;

use anyhow::{Context, Result};
use serialport::{available_ports, SerialPortType};
use tracing::info;

/// A serial port that could be used as a `serial:` endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub port: String,
    /// USB vendor and product ids (if USB)
    pub usb_ids: Option<(u16, u16)>,
    /// Human-readable description, if the OS has one
    pub description: Option<String>,
}

impl PortInfo {
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port: name,
                usb_ids: Some((usb.vid, usb.pid)),
                description: usb.product.clone().or_else(|| usb.manufacturer.clone()),
            },
            SerialPortType::BluetoothPort => Self {
                port: name,
                usb_ids: None,
                description: Some("Bluetooth".to_string()),
            },
            SerialPortType::PciPort | SerialPortType::Unknown => Self {
                port: name,
                usb_ids: None,
                description: None,
            },
        }
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "serial:{}", self.port)?;
        if let Some((vid, pid)) = self.usb_ids {
            write!(f, "  [{:04x}:{:04x}]", vid, pid)?;
        }
        if let Some(desc) = &self.description {
            write!(f, "  {}", desc)?;
        }
        Ok(())
    }
}

/// Enumerate serial ports, sorted by name
pub fn list() -> Result<Vec<PortInfo>> {
    let mut ports: Vec<PortInfo> = available_ports()
        .context("enumerating serial ports")?
        .into_iter()
        .map(|p| PortInfo::from_serialport(p.port_name, &p.port_type))
        .collect();
    ports.sort_by(|a, b| a.port.cmp(&b.port));

    info!("Found {} serial port(s)", ports.len());
    Ok(ports)
}
