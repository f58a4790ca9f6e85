//! Notifications the device layer emits to its listener
//!
//! The read loop and the liveness loop publish independently, so a listener sees
//! their events interleaved in no particular order.

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    Connected { port: String },
    ConnectionError { port: String, detail: String },
    Disconnected { port: String },
    /// A frame that passed validation
    DataReceived(Vec<u8>),
    /// Invalid frame without an overflow report
    SystemMessage(Vec<u8>),
    /// Invalid frame reporting a device-side buffer overflow
    FrameError(Vec<u8>),
    ReadError(String),
    WriteCompleted { bytes: usize },
    WriteError(String),
    /// A write was attempted without a connection; nothing was sent
    NotConnected,
}

/// Receiver of device notifications.
///
/// Called from background tasks, so implementations must not block.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: DeviceEvent);
}

impl EventSink for mpsc::UnboundedSender<DeviceEvent> {
    fn notify(&self, event: DeviceEvent) {
        if self.send(event).is_err() {
            log::debug!("Event listener dropped, notification discarded");
        }
    }
}

impl EventSink for broadcast::Sender<DeviceEvent> {
    fn notify(&self, event: DeviceEvent) {
        // No subscribers is not an error for a broadcast sink
        let _ = self.send(event);
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn notify(&self, event: DeviceEvent) {
        (**self).notify(event)
    }
}
