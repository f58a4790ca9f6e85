use std::io::{Read, Write};
use std::time::Duration;
use serialport::{SerialPort, SerialPortInfo, SerialPortType};

use crate::config::LinkSettings;
use super::{PortDescriptor, Result, SerialError};

/// Host-side access to serial ports: enumeration and opening.
///
/// The supervisor and scanner only talk to this trait, which is what lets the
/// tests drive the whole connection lifecycle without hardware.
pub trait PortBackend: Send + Sync {
    /// Ports currently visible on the host
    fn available_ports(&self) -> Result<Vec<PortDescriptor>>;

    /// Open a port with the configured baud rate and read timeout
    fn open(&self, port_name: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>>;
}

/// An open serial handle
pub trait SerialLink: Send {
    /// Number of bytes waiting in the input buffer
    fn bytes_to_read(&mut self) -> Result<u32>;

    /// Read into `buf`, blocking at most for the configured read timeout
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write the whole buffer and flush it to the device
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
}

/// Backend over the operating system's serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

impl SystemBackend {
    pub fn new() -> Self {
        Self
    }
}

impl From<SerialPortInfo> for PortDescriptor {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                let mut descriptor = PortDescriptor::usb(
                    info.port_name,
                    usb_info.vid,
                    usb_info.pid,
                    usb_info.serial_number,
                );
                if let Some(product) = &usb_info.product {
                    descriptor.description = product.clone();
                }
                descriptor.manufacturer = usb_info.manufacturer;
                descriptor.product = usb_info.product;
                descriptor
            }
            _ => PortDescriptor::plain(info.port_name),
        }
    }
}

impl PortBackend for SystemBackend {
    fn available_ports(&self) -> Result<Vec<PortDescriptor>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(PortDescriptor::from).collect())
    }

    fn open(&self, port_name: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>> {
        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(settings.read_timeout_ms))
            .open()
            .map_err(|e| open_error(port_name, e))?;

        log::debug!("Opened {} at {} baud", port_name, settings.baud_rate);
        Ok(Box::new(SystemLink { port }))
    }
}

/// A port that no longer exists is `PortNotFound`; anything else (busy, permissions) failed to connect
fn open_error(port_name: &str, error: serialport::Error) -> SerialError {
    match error.kind() {
        serialport::ErrorKind::NoDevice => SerialError::PortNotFound(port_name.to_string()),
        _ => SerialError::ConnectionFailed(format!("{}: {}", port_name, error)),
    }
}

/// `serialport` handle behind the `SerialLink` seam
struct SystemLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink for SystemLink {
    fn bytes_to_read(&mut self) -> Result<u32> {
        Ok(self.port.bytes_to_read()?)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Err(SerialError::Timeout),
            Err(e) => Err(SerialError::IoError(e)),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }
}
