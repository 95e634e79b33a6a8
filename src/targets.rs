use serde::Serialize;
use thiserror::Error;

use crate::nxt;

/// How a target is reached from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Usb,
    Bluetooth,
}

/// Descriptor of a board reachable through a serial device node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    /// Raw device address (the port name, e.g. `/dev/ttyACM0` or `COM6`).
    pub address: String,
    /// Display name, when the firmware has told us one.
    pub name: Option<String>,
    pub transport: TransportKind,
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
}

impl Target {
    pub fn id(&self) -> String {
        format!("samba:{}", self.address)
    }
}

/// True for the vendor/product pair the SAM-BA boot ROM enumerates with.
pub fn is_samba_id(vid: u16, pid: u16) -> bool {
    vid == nxt::VID_SAMBA && pid == nxt::PID_SAMBA
}

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("serial discovery failed: {0}")]
    Serial(#[from] serialport::Error),
}

/// Lists boards currently in SAM-BA boot mode.
///
/// The boot ROM enumerates as a CDC-ACM serial port with a fixed
/// vendor/product pair; anything else on the bus is ignored. Results are
/// sorted by port name so repeated scans are stable.
pub fn discover_samba_targets() -> Result<Vec<Target>, DiscoverError> {
    let mut out: Vec<Target> = Vec::new();

    for p in serialport::available_ports()? {
        let serialport::SerialPortInfo {
            port_name,
            port_type,
        } = p;

        let serialport::SerialPortType::UsbPort(usb) = port_type else {
            continue;
        };

        if !is_samba_id(usb.vid, usb.pid) {
            continue;
        }

        out.push(Target {
            address: port_name,
            name: None,
            transport: TransportKind::Usb,
            vid: usb.vid,
            pid: usb.pid,
            serial_number: usb.serial_number,
        });
    }

    out.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samba_id_recognition() {
        assert!(is_samba_id(0x03EB, 0x6124));
        assert!(!is_samba_id(nxt::VID_DEVICE, nxt::PID_DEVICE));
        assert!(!is_samba_id(0x03EB, 0x6125));
    }

    #[test]
    fn test_target_id_format() {
        let t = Target {
            address: "/dev/ttyACM0".to_string(),
            name: None,
            transport: TransportKind::Usb,
            vid: nxt::VID_SAMBA,
            pid: nxt::PID_SAMBA,
            serial_number: None,
        };
        assert_eq!(t.id(), "samba:/dev/ttyACM0");
    }
}
