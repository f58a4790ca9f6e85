#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dongle_link::serial::Result as SerialResult;
use dongle_link::{
    DeviceEvent, DeviceRegistry, DeviceSignature, EventSink, LinkSettings, PortBackend, PortDescriptor,
    SerialError, SerialLink,
};
use tokio::sync::mpsc;

pub const DONGLE_PORT: &str = "/dev/ttyACM0";

#[derive(Default)]
struct LinkState {
    inbound: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    fail_writes: bool,
    read_faults: usize,
    live_links: usize,
}

#[derive(Default)]
struct BackendState {
    ports: Vec<PortDescriptor>,
    busy: HashSet<String>,
    enumeration_fails: bool,
    opened: Vec<String>,
}

/// In-memory serial backend: scripted ports, scripted inbound bytes, captured writes
#[derive(Clone, Default)]
pub struct MockBackend {
    ports: Arc<Mutex<BackendState>>,
    link: Arc<Mutex<LinkState>>,
}

impl MockBackend {
    pub fn new(ports: Vec<PortDescriptor>) -> Self {
        let backend = Self::default();
        backend.set_ports(ports);
        backend
    }

    pub fn set_ports(&self, ports: Vec<PortDescriptor>) {
        self.ports.lock().unwrap().ports = ports;
    }

    pub fn mark_busy(&self, port_name: &str) {
        self.ports.lock().unwrap().busy.insert(port_name.to_string());
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.ports.lock().unwrap().enumeration_fails = fail;
    }

    pub fn opened(&self) -> Vec<String> {
        self.ports.lock().unwrap().opened.clone()
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        self.link.lock().unwrap().inbound.push_back(bytes.to_vec());
    }

    pub fn inject_read_faults(&self, count: usize) {
        self.link.lock().unwrap().read_faults = count;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.link.lock().unwrap().fail_writes = fail;
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.link.lock().unwrap().written.clone()
    }

    /// Handles currently open (opened and not yet dropped)
    pub fn live_links(&self) -> usize {
        self.link.lock().unwrap().live_links
    }
}

impl PortBackend for MockBackend {
    fn available_ports(&self) -> SerialResult<Vec<PortDescriptor>> {
        let state = self.ports.lock().unwrap();
        if state.enumeration_fails {
            return Err(SerialError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "enumeration unavailable",
            )));
        }
        Ok(state.ports.clone())
    }

    fn open(&self, port_name: &str, _settings: &LinkSettings) -> SerialResult<Box<dyn SerialLink>> {
        let mut state = self.ports.lock().unwrap();
        if state.busy.contains(port_name) {
            return Err(SerialError::ConnectionFailed(format!("{}: Device or resource busy", port_name)));
        }
        if !state.ports.iter().any(|p| p.port_name == port_name) {
            return Err(SerialError::PortNotFound(port_name.to_string()));
        }
        state.opened.push(port_name.to_string());
        self.link.lock().unwrap().live_links += 1;

        Ok(Box::new(MockLink { state: self.link.clone() }))
    }
}

struct MockLink {
    state: Arc<Mutex<LinkState>>,
}

impl SerialLink for MockLink {
    fn bytes_to_read(&mut self) -> SerialResult<u32> {
        let mut state = self.state.lock().unwrap();
        if state.read_faults > 0 {
            state.read_faults -= 1;
            return Err(SerialError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device reports a read fault",
            )));
        }
        Ok(state.inbound.front().map(|chunk| chunk.len() as u32).unwrap_or(0))
    }

    fn read(&mut self, buf: &mut [u8]) -> SerialResult<usize> {
        let mut state = self.state.lock().unwrap();
        let Some(mut chunk) = state.inbound.pop_front() else {
            return Err(SerialError::Timeout);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            let rest = chunk.split_off(n);
            state.inbound.push_front(rest);
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> SerialResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(SerialError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "write failed",
            )));
        }
        state.written.push(data.to_vec());
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.state.lock().unwrap().live_links -= 1;
    }
}

pub fn dongle_port() -> PortDescriptor {
    PortDescriptor::usb(DONGLE_PORT, 0x2E8A, 0x000A, Some("E6614103E7".to_string()))
}

pub fn other_usb_port(name: &str) -> PortDescriptor {
    PortDescriptor::usb(name, 0x10C4, 0xEA60, None)
}

pub fn dongle_registry() -> DeviceRegistry {
    DeviceRegistry::new().with(DeviceSignature::new("dongle", 0x2E8A, 0x000A))
}

/// Short intervals so lifecycle tests settle quickly
pub fn fast_settings() -> LinkSettings {
    LinkSettings {
        liveness_interval_ms: 10,
        idle_poll_ms: 2,
        ..LinkSettings::default()
    }
}

pub fn listener() -> (Arc<dyn EventSink>, mpsc::UnboundedReceiver<DeviceEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(tx), rx)
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<DeviceEvent>) -> DeviceEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a device event")
        .expect("event channel closed")
}

pub async fn assert_no_event(rx: &mut mpsc::UnboundedReceiver<DeviceEvent>, wait_ms: u64) {
    if let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(wait_ms), rx.recv()).await {
        panic!("unexpected event: {:?}", event);
    }
}
