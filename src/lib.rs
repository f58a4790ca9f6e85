//! Host-side link to LoRa/satellite USB dongles.
//!
//! - `serial`: CRC-16, binary and text frame codec, serial backend seam
//! - `device`: port scanning, connection supervision, the `DeviceManager` facade
//! - `config`: JSON application configuration and link settings

pub mod config;
pub mod device;
pub mod serial;

pub use config::{AppConfig, LinkSettings};
pub use device::{
    ConnectionState, DeviceError, DeviceEvent, DeviceManager, DeviceRegistry, DeviceSignature,
    EventSink, Trace,
};
pub use serial::{crc16, PortBackend, PortDescriptor, SerialError, SerialLink};
