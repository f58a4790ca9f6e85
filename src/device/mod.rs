pub mod events;
pub mod manager;
pub mod models;
pub mod port_monitor;
pub mod scanner;
pub mod supervisor;

pub use events::{DeviceEvent, EventSink};
pub use manager::DeviceManager;
pub use models::*;
pub use scanner::{PortMatch, PortScanner};
pub use supervisor::ConnectionSupervisor;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not found")]
    NotFound,

    #[error("Device already connected")]
    AlreadyConnected,

    #[error("Device not connected")]
    NotConnected,

    #[error("Port {0} is no longer available")]
    PortNotFound(String),

    #[error("Invalid device configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Serial communication error: {0}")]
    SerialError(#[from] crate::serial::SerialError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
