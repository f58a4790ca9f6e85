use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::LinkSettings;
use crate::serial::{PortBackend, PortDescriptor, SystemBackend};
use super::events::{DeviceEvent, EventSink};
use super::scanner::{PortMatch, PortScanner};
use super::supervisor::ConnectionSupervisor;
use super::{ConnectionInfo, ConnectionState, DeviceError, DeviceRegistry, Result, Trace};

/// Entry point for talking to a dongle.
///
/// Construction searches the host for a registered device and connects to the first
/// openable match. Not finding one is not an error: the manager simply stays
/// disconnected and `reconnect` can be tried later.
pub struct DeviceManager {
    registry: DeviceRegistry,
    backend: Arc<dyn PortBackend>,
    sink: Arc<dyn EventSink>,
    settings: LinkSettings,
    supervisor: Option<ConnectionSupervisor>,
    alive: AtomicBool,
}

impl DeviceManager {
    /// Search the system's serial ports and connect with default link settings
    pub async fn connect(registry: DeviceRegistry, listener: Arc<dyn EventSink>) -> Self {
        Self::connect_with(registry, listener, Arc::new(SystemBackend::new()), LinkSettings::default()).await
    }

    /// Search and connect through a specific backend
    pub async fn connect_with(
        registry: DeviceRegistry,
        listener: Arc<dyn EventSink>,
        backend: Arc<dyn PortBackend>,
        settings: LinkSettings,
    ) -> Self {
        let mut manager = Self {
            registry,
            backend,
            sink: listener,
            settings,
            supervisor: None,
            alive: AtomicBool::new(true),
        };

        match manager.search().await {
            Some(port) => {
                // Failures are already reported to the listener as ConnectionError
                let _ = manager.attach(port).await;
            }
            None => log::info!("No registered device connected"),
        }

        manager
    }

    async fn search(&self) -> Option<PortMatch> {
        let scanner = PortScanner::new(self.backend.clone(), self.settings.clone());
        let registry = self.registry.clone();

        // Enumeration and the transient opens block
        match tokio::task::spawn_blocking(move || scanner.find_matching_port(&registry)).await {
            Ok(found) => found,
            Err(e) => {
                log::error!("Port scan task failed: {}", e);
                None
            }
        }
    }

    async fn attach(&mut self, port: PortMatch) -> Result<()> {
        let supervisor = ConnectionSupervisor::start(
            port,
            self.backend.clone(),
            self.sink.clone(),
            self.settings.clone(),
        )
        .await?;
        self.supervisor = Some(supervisor);
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Search again after a disconnect
    pub async fn reconnect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(DeviceError::AlreadyConnected);
        }

        if let Some(previous) = self.supervisor.take() {
            previous.close().await;
        }

        let port = self.search().await.ok_or(DeviceError::NotFound)?;
        self.attach(port).await
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor
            .as_ref()
            .map(|s| s.is_connected())
            .unwrap_or(false)
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// False once `close` has been called
    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Port the device is bound to, while connected
    pub fn port(&self) -> Option<String> {
        self.supervisor
            .as_ref()
            .filter(|s| s.is_connected())
            .map(|s| s.port_name().to_string())
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.supervisor
            .as_ref()
            .filter(|s| s.is_connected())
            .map(|s| s.info().clone())
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Watch connection state changes of the current connection
    pub fn subscribe_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.supervisor.as_ref().map(|s| s.subscribe_state())
    }

    /// Fresh hardware descriptor of the bound port
    pub fn port_data(&self) -> Result<PortDescriptor> {
        let port = self.port().ok_or(DeviceError::NotConnected)?;
        let ports = self.backend.available_ports()?;

        match ports.into_iter().find(|p| p.port_name == port) {
            Some(descriptor) => Ok(descriptor),
            None => Err(DeviceError::PortNotFound(port)),
        }
    }

    /// Send a trace. Outcome is reported to the listener.
    pub async fn write(&self, trace: &Trace) {
        match &self.supervisor {
            Some(supervisor) => supervisor.write(trace).await,
            None => self.sink.notify(DeviceEvent::NotConnected),
        }
    }

    /// Mark the manager inactive and disconnect, waiting for the background loops
    pub async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(supervisor) = &self.supervisor {
            supervisor.close().await;
        }
    }
}
