pub mod checksum;
pub mod interface;
pub mod protocol;

pub use checksum::crc16;
pub use interface::{PortBackend, SerialLink, SystemBackend};
pub use protocol::{BinaryFrame, ByteCodes, InboundFrame, TextReply, TextReplyKind};

use serde::{Deserialize, Serialize};

/// One enumerated serial port as the host reports it.
///
/// `hwid` mirrors the pyserial hardware-id string the dongle tooling has always
/// matched against (`USB VID:PID=2E8A:000A SER=... `), so signature matching
/// works the same for real and simulated backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub port_name: String,
    pub description: String,
    pub hwid: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl PortDescriptor {
    /// Descriptor for a USB CDC port, building the hardware id from the identifiers
    pub fn usb(port_name: impl Into<String>, vid: u16, pid: u16, serial_number: Option<String>) -> Self {
        let mut hwid = format!("USB VID:PID={:04X}:{:04X}", vid, pid);
        if let Some(serial) = &serial_number {
            hwid.push_str(&format!(" SER={}", serial));
        }

        Self {
            port_name: port_name.into(),
            description: "n/a".to_string(),
            hwid,
            vid: Some(vid),
            pid: Some(pid),
            serial_number,
            manufacturer: None,
            product: None,
        }
    }

    /// Descriptor for a port without USB identifiers (PCI, Bluetooth, virtual)
    pub fn plain(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: "n/a".to_string(),
            hwid: "n/a".to_string(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Communication timeout")]
    Timeout,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
