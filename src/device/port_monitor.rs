use std::sync::Arc;
use tokio::sync::watch;

use crate::serial::PortDescriptor;
use super::supervisor::SupervisorShared;

/// Result of looking for the bound port among the enumerated ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPresence {
    Present,
    /// The host reports no serial ports at all
    NoPorts,
    /// Other ports exist but the bound one is gone
    Vanished,
}

pub fn port_presence(port_name: &str, ports: &[PortDescriptor]) -> PortPresence {
    if ports.is_empty() {
        PortPresence::NoPorts
    } else if ports.iter().any(|p| p.port_name == port_name) {
        PortPresence::Present
    } else {
        PortPresence::Vanished
    }
}

/// Polls port enumeration and tears the connection down once the device's port is gone
pub(crate) async fn liveness_loop(shared: Arc<SupervisorShared>, mut cancel_rx: watch::Receiver<bool>) {
    let port_name = shared.info.port_name.clone();
    let interval = shared.settings.liveness_interval();
    log::debug!("Liveness loop started for {} every {:?}", port_name, interval);

    loop {
        if *cancel_rx.borrow() {
            break;
        }

        let backend = shared.backend.clone();
        let enumerated = match tokio::task::spawn_blocking(move || backend.available_ports()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match enumerated {
            Ok(ports) => match port_presence(&port_name, &ports) {
                PortPresence::Present => {}
                PortPresence::NoPorts => {
                    shared.disconnect("no serial ports enumerated").await;
                    break;
                }
                PortPresence::Vanished => {
                    shared.disconnect("port no longer enumerated").await;
                    break;
                }
            },
            // A failed enumeration says nothing about the device; try again next tick
            Err(e) => log::warn!("Port enumeration failed while watching {}: {}", port_name, e),
        }

        tokio::select! {
            _ = cancel_rx.changed() => {}
            _ = tokio::time::sleep(interval) => {}
        }
    }

    log::debug!("Liveness loop stopped for {}", port_name);
}
