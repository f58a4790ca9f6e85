use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DeviceEntry;
use crate::serial::protocol::{encode_binary, encode_text, ByteCodes};
use crate::serial::Result as SerialResult;
use super::{DeviceError, Result};

/// Identifies a class of recognised hardware by its USB identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSignature {
    pub name: String,
    pub vendor_id: Vec<u8>,
    pub product_id: Vec<u8>,
}

impl DeviceSignature {
    pub fn new(name: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            name: name.into(),
            vendor_id: vendor_id.to_be_bytes().to_vec(),
            product_id: product_id.to_be_bytes().to_vec(),
        }
    }

    /// Build from the configuration's hex strings (`"0x2E8A"`)
    pub fn from_hex(name: impl Into<String>, vid: &str, pid: &str) -> Result<Self> {
        let name = name.into();
        let vendor_id = parse_hex_id(&name, "VID", vid)?;
        let product_id = parse_hex_id(&name, "PID", pid)?;
        Ok(Self { name, vendor_id, product_id })
    }

    pub fn matches(&self, vendor_id: &[u8], product_id: &[u8]) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

fn parse_hex_id(name: &str, field: &str, value: &str) -> Result<Vec<u8>> {
    let digits = value
        .trim()
        .strip_prefix("0x")
        .or_else(|| value.trim().strip_prefix("0X"))
        .unwrap_or(value.trim());

    if digits.is_empty() {
        return Err(DeviceError::InvalidConfiguration(format!("{}: empty {}", name, field)));
    }

    hex::decode(digits).map_err(|e| {
        DeviceError::InvalidConfiguration(format!("{}: invalid {} '{}': {}", name, field, value, e))
    })
}

/// Known device signatures keyed by name.
///
/// Owned by whoever builds it and read-only once handed to a `DeviceManager`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRegistry {
    signatures: BTreeMap<String, DeviceSignature>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[DeviceEntry]) -> Result<Self> {
        let mut registry = Self::new();
        for entry in entries {
            registry.insert(DeviceSignature::from_hex(&entry.name, &entry.vid, &entry.pid)?);
        }
        Ok(registry)
    }

    /// Add a signature; an existing entry with the same name is replaced
    pub fn insert(&mut self, signature: DeviceSignature) {
        self.signatures.insert(signature.name.clone(), signature);
    }

    pub fn with(mut self, signature: DeviceSignature) -> Self {
        self.insert(signature);
        self
    }

    pub fn get(&self, name: &str) -> Option<&DeviceSignature> {
        self.signatures.get(name)
    }

    /// First signature whose identifiers equal the given bytes exactly
    pub fn find_match(&self, vendor_id: &[u8], product_id: &[u8]) -> Option<&DeviceSignature> {
        self.signatures.values().find(|s| s.matches(vendor_id, product_id))
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceSignature> {
        self.signatures.values()
    }
}

/// Device connection state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Details of the live connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub session_id: Uuid,
    pub port_name: String,
    pub signature: String,
    pub connected_at: DateTime<Utc>,
}

/// One outbound command, as the front-end hands it over
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trace {
    pub command: String,
    /// Human-readable parameters, `;`-separated in text mode
    pub params: String,
    pub command_code: Vec<u8>,
    pub param_bytes: Vec<u8>,
    /// Send as a `DLC` text frame instead of a binary frame
    pub is_string: bool,
    pub timestamp: DateTime<Utc>,
}

impl Trace {
    pub fn new(
        command: impl Into<String>,
        params: impl Into<String>,
        command_code: Vec<u8>,
        param_bytes: Vec<u8>,
    ) -> Self {
        Self {
            command: command.into(),
            params: params.into(),
            command_code,
            param_bytes,
            is_string: false,
            timestamp: Utc::now(),
        }
    }

    pub fn binary(command: impl Into<String>, command_code: Vec<u8>, param_bytes: Vec<u8>) -> Self {
        Self::new(command, "", command_code, param_bytes)
    }

    pub fn text(command: impl Into<String>, params: impl Into<String>) -> Self {
        let mut trace = Self::new(command, params, Vec::new(), Vec::new());
        trace.is_string = true;
        trace
    }

    pub fn reboot() -> Self {
        Self::binary("REBOOT", vec![ByteCodes::REBOOT], Vec::new())
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_reboot(&self) -> bool {
        !self.is_string && self.command_code == [ByteCodes::REBOOT]
    }

    /// Wire bytes for this trace in its selected mode
    pub fn encode(&self) -> SerialResult<Vec<u8>> {
        if self.is_string {
            Ok(encode_text(&self.command, &self.params, self.timestamp))
        } else {
            encode_binary(&self.command_code, &self.param_bytes)
        }
    }
}
