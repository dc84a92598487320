//! [`UsbHost`] backed by the operating system's serial-port enumeration.
//!
//! A USB device is identified by its serial number.  The host only reports
//! devices whose serial number is in the *authorized* set; everything else
//! attached to the machine is invisible until the user authorizes it with the
//! interactive prompt (`devlink authorize`).  Authorizations made through the
//! prompt are added to the set and can be persisted with
//! [`SerialUsbHost::authorized`].
//!
//! One physical device may expose several ports (for example `cu.*` and
//! `tty.*` on macOS).  They share a serial number and collapse into a single
//! backend.

use std::collections::BTreeSet;
use std::io::IsTerminal;
use std::sync::Mutex;

use devlink_core::{Backend, DeviceError, ProbeError};
use dialoguer::{theme::ColorfulTheme, Select};
use serialport::SerialPortType;
use tracing::{debug, info};

use super::{UsbHost, USB_CAPABILITY};

/// The USB-relevant fields of one enumerated port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbPort {
    pub serial: Option<String>,
    pub product: Option<String>,
}

/// Serial-port backed USB host.
pub struct SerialUsbHost {
    authorized: Mutex<BTreeSet<String>>,
}

impl SerialUsbHost {
    /// Creates a host that trusts the given serial numbers.
    pub fn new(authorized: impl IntoIterator<Item = String>) -> Self {
        Self {
            authorized: Mutex::new(authorized.into_iter().collect()),
        }
    }

    /// Serial numbers currently authorized, in sorted order.
    pub fn authorized(&self) -> Vec<String> {
        match self.authorized.lock() {
            Ok(set) => set.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    fn is_authorized(&self, serial: &str) -> bool {
        match self.authorized.lock() {
            Ok(set) => set.contains(serial),
            Err(poisoned) => poisoned.into_inner().contains(serial),
        }
    }

    fn authorize(&self, serial: &str) {
        match self.authorized.lock() {
            Ok(mut set) => set.insert(serial.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(serial.to_string()),
        };
    }
}

impl UsbHost for SerialUsbHost {
    fn is_supported(&self) -> bool {
        serialport::available_ports().is_ok()
    }

    fn list(&self) -> Result<Vec<Backend>, ProbeError> {
        let ports = enumerate()?;
        Ok(usb_backends(&ports)
            .into_iter()
            .filter(|b| self.is_authorized(&b.id))
            .collect())
    }

    fn request_new(&self) -> Result<Backend, DeviceError> {
        if !(std::io::stdin().is_terminal() && std::io::stderr().is_terminal()) {
            return Err(DeviceError::Unsupported {
                capability: "interactive USB authorization",
            });
        }

        let ports = enumerate().map_err(|e| match e {
            ProbeError::Unsupported(_) => DeviceError::Unsupported {
                capability: USB_CAPABILITY,
            },
            other => DeviceError::TransportFailure(other.to_string()),
        })?;
        let candidates: Vec<Backend> = usb_backends(&ports)
            .into_iter()
            .filter(|b| !self.is_authorized(&b.id))
            .collect();
        if candidates.is_empty() {
            return Err(DeviceError::TransportFailure(
                "no unauthorized USB devices are attached".to_string(),
            ));
        }

        let labels: Vec<String> = candidates.iter().map(Backend::label).collect();
        let picked = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Authorize USB device")
            .items(&labels)
            .default(0)
            .interact_opt()
            .map_err(|e| DeviceError::TransportFailure(format!("prompt failed: {e}")))?;

        let Some(index) = picked else {
            debug!("USB authorization prompt dismissed");
            return Err(DeviceError::UserCancelled);
        };
        let backend = candidates
            .into_iter()
            .nth(index)
            .ok_or_else(|| DeviceError::TransportFailure(format!("invalid choice {index}")))?;
        self.authorize(&backend.id);
        info!("authorized USB device {}", backend.label());
        Ok(backend)
    }
}

fn enumerate() -> Result<Vec<UsbPort>, ProbeError> {
    let ports = serialport::available_ports().map_err(|e| match e.kind {
        serialport::ErrorKind::Unknown => ProbeError::Unsupported("USB"),
        _ => ProbeError::Enumeration(e.to_string()),
    })?;
    Ok(ports
        .into_iter()
        .filter_map(|info| match info.port_type {
            SerialPortType::UsbPort(usb) => Some(UsbPort {
                serial: usb.serial_number,
                product: usb.product,
            }),
            _ => None,
        })
        .collect())
}

/// Turns enumerated ports into backends: one per serial number, in first-seen
/// order.  Ports without a serial number cannot be told apart across polls
/// and are skipped.
pub fn usb_backends(ports: &[UsbPort]) -> Vec<Backend> {
    let mut seen = BTreeSet::new();
    ports
        .iter()
        .filter_map(|port| {
            let serial = port.serial.as_deref().filter(|s| !s.is_empty())?;
            seen.insert(serial.to_string())
                .then(|| Backend::usb(serial, port.product.clone()))
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn port(serial: Option<&str>, product: Option<&str>) -> UsbPort {
        UsbPort {
            serial: serial.map(str::to_string),
            product: product.map(str::to_string),
        }
    }

    #[test]
    fn test_usb_backends_uses_serial_as_id_and_product_as_name() {
        let backends = usb_backends(&[port(Some("0123ABCD"), Some("Pixel 8"))]);
        assert_eq!(backends, vec![Backend::usb("0123ABCD", Some("Pixel 8".into()))]);
    }

    #[test]
    fn test_usb_backends_collapses_ports_of_one_device() {
        // Arrange: cu.* and tty.* of the same device
        let ports = [
            port(Some("A"), Some("Dev")),
            port(Some("B"), None),
            port(Some("A"), Some("Dev")),
        ];

        // Act
        let backends = usb_backends(&ports);

        // Assert
        let ids: Vec<&str> = backends.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn test_usb_backends_skips_ports_without_serial() {
        let backends = usb_backends(&[port(None, Some("x")), port(Some(""), None)]);
        assert!(backends.is_empty());
    }

    #[test]
    fn test_authorized_set_is_sorted_and_deduplicated() {
        let host = SerialUsbHost::new(vec!["B".to_string(), "A".to_string(), "B".to_string()]);
        assert_eq!(host.authorized(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_authorize_adds_serial() {
        let host = SerialUsbHost::new(Vec::new());
        assert!(!host.is_authorized("X"));

        host.authorize("X");

        assert!(host.is_authorized("X"));
    }
}
