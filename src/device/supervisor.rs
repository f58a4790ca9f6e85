//! Connection supervision
//!
//! Owns the open port handle for the lifetime of one connection. Two tasks run while
//! connected: the read loop (this module) and the liveness loop
//! (`port_monitor`). Both observe one cancellation channel. The handle sits behind
//! an async mutex shared by the read loop and the write path.

use std::sync::Arc;
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::LinkSettings;
use crate::serial::{InboundFrame, PortBackend, SerialError, SerialLink};
use super::events::{DeviceEvent, EventSink};
use super::port_monitor;
use super::scanner::PortMatch;
use super::{ConnectionInfo, ConnectionState, Result, Trace};

/// State shared between the supervisor handle and its background tasks
pub(crate) struct SupervisorShared {
    pub(crate) info: ConnectionInfo,
    pub(crate) backend: Arc<dyn PortBackend>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) settings: LinkSettings,
    link: Mutex<Option<Box<dyn SerialLink>>>,
    state_tx: watch::Sender<ConnectionState>,
    cancel_tx: watch::Sender<bool>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    liveness_task: Mutex<Option<JoinHandle<()>>>,
}

impl SupervisorShared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Run the disconnect sequence.
    ///
    /// Only the caller that moves the state out of `Connected` performs it; any
    /// concurrent caller waits until the connection is fully `Disconnected`. Returns
    /// whether this call did the work.
    pub(crate) async fn disconnect(&self, reason: &str) -> bool {
        let mut claimed = false;
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnecting;
                claimed = true;
                true
            } else {
                false
            }
        });

        if !claimed {
            let mut state_rx = self.state_tx.subscribe();
            let _ = state_rx
                .wait_for(|state| *state == ConnectionState::Disconnected)
                .await;
            return false;
        }

        log::info!(
            "Disconnecting from {} (session {}): {}",
            self.info.port_name,
            self.info.session_id,
            reason
        );

        self.cancel_tx.send_replace(true);

        let read_task = self.read_task.lock().await.take();
        if let Some(handle) = read_task {
            if let Err(e) = handle.await {
                log::error!("Read loop for {} ended abnormally: {}", self.info.port_name, e);
            }
        }

        // Dropping the handle closes the port
        self.link.lock().await.take();

        self.state_tx.send_replace(ConnectionState::Disconnected);
        self.sink.notify(DeviceEvent::Disconnected {
            port: self.info.port_name.clone(),
        });
        true
    }
}

/// Supervises one open connection to a matched device
pub struct ConnectionSupervisor {
    shared: Arc<SupervisorShared>,
}

impl ConnectionSupervisor {
    /// Open the matched port and start the read and liveness loops.
    ///
    /// On failure a `ConnectionError` notification is emitted and the error returned.
    pub async fn start(
        port: PortMatch,
        backend: Arc<dyn PortBackend>,
        sink: Arc<dyn EventSink>,
        settings: LinkSettings,
    ) -> Result<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        log::info!("Connecting to {} on {}", port.signature, port.port_name);

        let link = match backend.open(&port.port_name, &settings) {
            Ok(link) => link,
            Err(e) => {
                log::error!("Connection to {} failed: {}", port.port_name, e);
                state_tx.send_replace(ConnectionState::Disconnected);
                sink.notify(DeviceEvent::ConnectionError {
                    port: port.port_name.clone(),
                    detail: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let (cancel_tx, _) = watch::channel(false);
        let info = ConnectionInfo {
            session_id: Uuid::new_v4(),
            port_name: port.port_name,
            signature: port.signature,
            connected_at: Utc::now(),
        };

        let shared = Arc::new(SupervisorShared {
            info,
            backend,
            sink,
            settings,
            link: Mutex::new(Some(link)),
            state_tx,
            cancel_tx,
            read_task: Mutex::new(None),
            liveness_task: Mutex::new(None),
        });

        shared.state_tx.send_replace(ConnectionState::Connected);
        shared.sink.notify(DeviceEvent::Connected {
            port: shared.info.port_name.clone(),
        });
        log::info!(
            "Connected to {} on {} (session {})",
            shared.info.signature,
            shared.info.port_name,
            shared.info.session_id
        );

        // The read handle is stored before the liveness loop can ask for a disconnect
        {
            let mut read_slot = shared.read_task.lock().await;
            *read_slot = Some(tokio::spawn(read_loop(
                shared.clone(),
                shared.cancel_tx.subscribe(),
            )));
        }
        {
            let mut liveness_slot = shared.liveness_task.lock().await;
            *liveness_slot = Some(tokio::spawn(port_monitor::liveness_loop(
                shared.clone(),
                shared.cancel_tx.subscribe(),
            )));
        }

        Ok(Self { shared })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.shared.info
    }

    pub fn port_name(&self) -> &str {
        &self.shared.info.port_name
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Encode and send a trace. Faults are reported to the listener, never returned.
    pub async fn write(&self, trace: &Trace) {
        if !self.is_connected() {
            self.shared.sink.notify(DeviceEvent::NotConnected);
            return;
        }

        let data = match trace.encode() {
            Ok(data) => data,
            Err(e) => {
                log::error!("Cannot encode {}: {}", trace.command, e);
                self.shared.sink.notify(DeviceEvent::WriteError(e.to_string()));
                return;
            }
        };
        let result = {
            let mut guard = self.shared.link.lock().await;
            guard.as_mut().map(|link| link.write_all(&data))
        };

        match result {
            Some(Ok(())) => {
                log::debug!("-> {} ({} bytes): {:02X?}", trace.command, data.len(), data);
                self.shared.sink.notify(DeviceEvent::WriteCompleted { bytes: data.len() });
            }
            Some(Err(e)) => {
                log::error!("Write of {} to {} failed: {}", trace.command, self.port_name(), e);
                self.shared.sink.notify(DeviceEvent::WriteError(e.to_string()));
            }
            // Handle already released by a concurrent disconnect
            None => self.shared.sink.notify(DeviceEvent::NotConnected),
        }
    }

    /// Disconnect and wait until both background loops have finished
    pub async fn close(&self) {
        self.shared.disconnect("close requested").await;

        let liveness = self.shared.liveness_task.lock().await.take();
        if let Some(handle) = liveness {
            if let Err(e) = handle.await {
                log::error!("Liveness loop for {} ended abnormally: {}", self.port_name(), e);
            }
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        // Loops exit on their own; the port closes once they release the shared state
        self.shared.cancel_tx.send_replace(true);
    }
}

/// Read whatever is pending, up to the buffer size. `None` when nothing arrived.
fn read_available(link: &mut dyn SerialLink, buffer: &mut [u8]) -> std::result::Result<Option<usize>, SerialError> {
    let pending = link.bytes_to_read()? as usize;
    if pending == 0 {
        return Ok(None);
    }

    let len = pending.min(buffer.len());
    match link.read(&mut buffer[..len]) {
        Ok(0) | Err(SerialError::Timeout) => Ok(None),
        Ok(n) => Ok(Some(n)),
        Err(e) => Err(e),
    }
}

fn dispatch(shared: &SupervisorShared, bytes: Vec<u8>) {
    log::debug!("<- {} ({} bytes): {:02X?}", shared.info.port_name, bytes.len(), bytes);

    let event = match InboundFrame::classify(bytes) {
        InboundFrame::Valid(frame) => DeviceEvent::DataReceived(frame),
        InboundFrame::SystemMessage(message) => DeviceEvent::SystemMessage(message),
        InboundFrame::Overflow(message) => {
            log::warn!(
                "Device on {} reported a buffer overflow: {}",
                shared.info.port_name,
                String::from_utf8_lossy(&message).trim()
            );
            DeviceEvent::FrameError(message)
        }
    };
    shared.sink.notify(event);
}

async fn idle(shared: &SupervisorShared, cancel_rx: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = cancel_rx.changed() => {}
        _ = tokio::time::sleep(shared.settings.idle_poll()) => {}
    }
}

async fn read_loop(shared: Arc<SupervisorShared>, mut cancel_rx: watch::Receiver<bool>) {
    log::debug!("Read loop started for {}", shared.info.port_name);
    let mut buffer = vec![0u8; shared.settings.max_read_chunk.max(1)];

    loop {
        if *cancel_rx.borrow() {
            break;
        }

        let outcome = {
            let mut guard = shared.link.lock().await;
            let Some(link) = guard.as_mut() else {
                break;
            };
            read_available(link.as_mut(), &mut buffer)
        };

        match outcome {
            Ok(Some(n)) => dispatch(&shared, buffer[..n].to_vec()),
            Ok(None) => idle(&shared, &mut cancel_rx).await,
            Err(e) => {
                // A bad read is reported but never ends the connection by itself
                log::warn!("Read from {} failed: {}", shared.info.port_name, e);
                shared.sink.notify(DeviceEvent::ReadError(e.to_string()));
                idle(&shared, &mut cancel_rx).await;
            }
        }
    }

    log::debug!("Read loop stopped for {}", shared.info.port_name);
}
