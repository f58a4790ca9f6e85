use std::sync::Arc;

use crate::config::LinkSettings;
use crate::serial::{PortBackend, PortDescriptor};
use super::DeviceRegistry;

/// A port whose identifiers matched a registered signature and that could be opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMatch {
    pub port_name: String,
    pub signature: String,
}

/// Extract the vendor and product bytes from a `VID:PID=xxxx:yyyy` hardware id token
pub fn parse_hwid(hwid: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    let token = hwid
        .split_whitespace()
        .find_map(|t| t.strip_prefix("VID:PID="))?;

    let (vid, pid) = token.split_once(':')?;
    // Some platforms append the interface number (`2E8A:000A:1.0`)
    let pid = pid.split(':').next().unwrap_or(pid);

    Some((hex::decode(vid).ok()?, hex::decode(pid).ok()?))
}

/// Finds a connected, openable port belonging to a registered device
pub struct PortScanner {
    backend: Arc<dyn PortBackend>,
    settings: LinkSettings,
}

impl PortScanner {
    pub fn new(backend: Arc<dyn PortBackend>, settings: LinkSettings) -> Self {
        Self { backend, settings }
    }

    /// Scan the host's ports; the first matching port that opens wins
    pub fn find_matching_port(&self, registry: &DeviceRegistry) -> Option<PortMatch> {
        let ports = match self.backend.available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                log::warn!("Port enumeration failed: {}", e);
                return None;
            }
        };

        for port in ports {
            let Some(signature) = Self::match_port(&port, registry) else {
                continue;
            };

            // Opening briefly confirms no other process holds the port
            match self.backend.open(&port.port_name, &self.settings) {
                Ok(link) => {
                    drop(link);
                    log::info!("Found {} on {}", signature, port.port_name);
                    return Some(PortMatch {
                        port_name: port.port_name,
                        signature,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "Port {} matches {} but could not be opened, skipping: {}",
                        port.port_name,
                        signature,
                        e
                    );
                }
            }
        }

        log::debug!("No registered device found among enumerated ports");
        None
    }

    fn match_port(port: &PortDescriptor, registry: &DeviceRegistry) -> Option<String> {
        let (vid, pid) = parse_hwid(&port.hwid)?;
        registry.find_match(&vid, &pid).map(|s| s.name.clone())
    }
}
