//! Serial backend for real hardware, built on the `serialport` crate.

use std::io::{self, Read, Write};

use serialport::{DataBits, FlowControl, Parity, SerialPortInfo, SerialPortType, StopBits};
use tracing::{debug, warn};

use super::{SerialBackend, SerialDevice};
use crate::domain::serial::{PortDescriptor, SerialError, SerialSettings};

const GENERIC_DESCRIPTION: &str = "Serial Port";

/// Device name prefixes probed under `/dev` when the platform enumerator fails.
#[cfg(unix)]
const DEV_PREFIXES: [&str; 4] = ["ttyUSB", "ttyACM", "ttyS", "cu."];

/// Opens and enumerates the host's serial devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSerialBackend;

impl SerialBackend for SystemSerialBackend {
    fn list_ports(&self) -> Vec<PortDescriptor> {
        match serialport::available_ports() {
            Ok(ports) => ports.into_iter().map(describe).collect(),
            Err(e) => {
                warn!("serial port enumeration failed: {e}; scanning /dev instead");
                scan_dev_dir()
            }
        }
    }

    fn open(
        &self,
        name: &str,
        settings: &SerialSettings,
    ) -> Result<Box<dyn SerialDevice>, SerialError> {
        let port = serialport::new(name, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| SerialError::OpenFailed {
                port: name.to_string(),
                reason: e.to_string(),
            })?;

        debug!("serialport opened {name}");
        Ok(Box::new(SystemSerialDevice { port }))
    }
}

struct SystemSerialDevice {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialDevice for SystemSerialDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.port.write(data)
    }
}

fn describe(info: SerialPortInfo) -> PortDescriptor {
    let (description, manufacturer) = match info.port_type {
        SerialPortType::UsbPort(usb) => (
            usb.product.unwrap_or_else(|| GENERIC_DESCRIPTION.to_string()),
            usb.manufacturer.unwrap_or_default(),
        ),
        SerialPortType::BluetoothPort => ("Bluetooth Serial Port".to_string(), String::new()),
        SerialPortType::PciPort | SerialPortType::Unknown => {
            (GENERIC_DESCRIPTION.to_string(), String::new())
        }
    };
    PortDescriptor {
        name: info.port_name,
        description,
        manufacturer,
    }
}

#[cfg(unix)]
fn scan_dev_dir() -> Vec<PortDescriptor> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };
    let mut ports: Vec<PortDescriptor> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| DEV_PREFIXES.iter().any(|prefix| name.starts_with(prefix)))
        .map(|name| PortDescriptor::new(format!("/dev/{name}"), GENERIC_DESCRIPTION, ""))
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    ports
}

#[cfg(not(unix))]
fn scan_dev_dir() -> Vec<PortDescriptor> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn test_describe_usb_port_uses_product_and_manufacturer() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyUSB0".to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid: 0x0403,
                pid: 0x6001,
                serial_number: None,
                manufacturer: Some("FTDI".to_string()),
                product: Some("FT232R USB UART".to_string()),
            }),
        };

        let port = describe(info);

        assert_eq!(port.name, "/dev/ttyUSB0");
        assert_eq!(port.description, "FT232R USB UART");
        assert_eq!(port.manufacturer, "FTDI");
    }

    #[test]
    fn test_describe_unknown_port_is_generic() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: SerialPortType::Unknown,
        };

        let port = describe(info);

        assert_eq!(port.description, "Serial Port");
        assert!(port.manufacturer.is_empty());
    }

    #[test]
    fn test_open_missing_device_fails_with_port_name() {
        let settings = SerialSettings {
            baud_rate: 115_200,
            read_timeout: std::time::Duration::from_millis(10),
        };

        let result = SystemSerialBackend.open("/dev/hwa-bridge-does-not-exist", &settings);

        match result {
            Err(SerialError::OpenFailed { port, .. }) => {
                assert_eq!(port, "/dev/hwa-bridge-does-not-exist")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opening a missing device must fail"),
        }
    }
}
