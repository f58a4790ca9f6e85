//! Dongle wire protocol
//!
//! Two encodings share the link:
//! - binary frames `SOF | len:u16-LE | command | params | crc:u16-BE | EOF`,
//!   where `len` counts parameter bytes only
//! - `;`-delimited text frames, `DLC;...` outbound and `DLR`/`DLM` ... `EOR`/`EOM`
//!   inbound
//!
//! A buffer is text when it decodes as UTF-8 and contains `;`. Everything else is
//! checked as a binary frame.
//!
//! Text validation trims a trailing `\r\n` before looking at the first and last
//! tokens, so `DLR;...;EOR\r\n` counts as valid. The firmware terminates lines that
//! way; if it must instead be reported as a system message, drop the trim in
//! `text_tokens`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::checksum::crc16;
use super::{Result, SerialError};

pub const TEXT_DELIMITER: char = ';';
pub const TEXT_COMMAND_TAG: &str = "DLC";
pub const TEXT_RESPONSE_TAG: &str = "DLR";
pub const TEXT_MESSAGE_TAG: &str = "DLM";
pub const TEXT_RESPONSE_END: &str = "EOR";
pub const TEXT_MESSAGE_END: &str = "EOM";

/// Marker that flags a device-side buffer overflow inside an invalid frame
pub const OVERFLOW_MARKER: &str = "Overflow";

/// Byte constants of the binary framing
pub struct ByteCodes;

impl ByteCodes {
    /// Start of a host-originated frame
    pub const SOF: u8 = 0xF0;
    /// Start of a device-originated frame
    pub const SOF_R: u8 = 0xF1;
    /// End of a host-originated frame
    pub const EOF: u8 = 0x0F;
    /// End of a device-originated frame
    pub const EOF_R: u8 = 0x1F;
    /// Sent ahead of the reboot command to break the firmware out of its loop
    pub const INTERRUPT: u8 = 0x03;
    pub const REBOOT: u8 = 0x04;
    /// Bare acknowledgement the firmware sends outside the checksummed framing
    pub const ACK: [u8; 5] = [Self::SOF_R, 0, 0, 0, Self::EOF_R];

    pub fn is_ack(buf: &[u8]) -> bool {
        buf == Self::ACK
    }

    fn is_frame_boundary(first: u8, last: u8) -> bool {
        matches!((first, last), (Self::SOF, Self::EOF) | (Self::SOF_R, Self::EOF_R))
    }
}

/// Smallest binary frame: start marker, checksum and end marker around an empty body
const MIN_BINARY_FRAME: usize = 4;

/// Largest parameter block the little-endian length field can describe
pub const MAX_PARAM_LEN: usize = u16::MAX as usize;

/// Decoded binary frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryFrame {
    pub start: u8,
    pub command_code: Vec<u8>,
    pub params: Vec<u8>,
    pub checksum: u16,
}

impl BinaryFrame {
    /// Host-originated frame for a command; checksum is computed here.
    ///
    /// Fails when the parameters do not fit the 16-bit length field.
    pub fn new(command_code: &[u8], params: &[u8]) -> Result<Self> {
        let body = Self::body(command_code, params)?;
        Ok(Self {
            start: ByteCodes::SOF,
            command_code: command_code.to_vec(),
            params: params.to_vec(),
            checksum: crc16(&body),
        })
    }

    fn body(command_code: &[u8], params: &[u8]) -> Result<Vec<u8>> {
        let len = u16::try_from(params.len()).map_err(|_| {
            SerialError::ProtocolError(format!(
                "{} parameter bytes exceed the frame limit of {}",
                params.len(),
                MAX_PARAM_LEN
            ))
        })?;

        let mut body = Vec::with_capacity(2 + command_code.len() + params.len());
        body.extend_from_slice(&len.to_le_bytes());
        body.extend_from_slice(command_code);
        body.extend_from_slice(params);
        Ok(body)
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let end = if self.start == ByteCodes::SOF_R { ByteCodes::EOF_R } else { ByteCodes::EOF };
        let body = Self::body(&self.command_code, &self.params)?;

        let mut frame = Vec::with_capacity(body.len() + 4);
        frame.push(self.start);
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&self.checksum.to_be_bytes());
        frame.push(end);
        Ok(frame)
    }

    /// Parse a validated binary frame into its fields
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if !validate_binary(buf) {
            return Err(SerialError::ProtocolError("Invalid binary frame".to_string()));
        }

        let body = &buf[1..buf.len() - 3];
        if body.len() < 2 {
            return Err(SerialError::ProtocolError("Binary frame without length field".to_string()));
        }

        let declared = u16::from_le_bytes([body[0], body[1]]) as usize;
        let rest = &body[2..];
        if rest.len() < declared {
            return Err(SerialError::ProtocolError(format!(
                "Declared {} parameter bytes but frame carries {}",
                declared,
                rest.len()
            )));
        }

        let split = rest.len() - declared;
        Ok(Self {
            start: buf[0],
            command_code: rest[..split].to_vec(),
            params: rest[split..].to_vec(),
            checksum: embedded_checksum(buf),
        })
    }
}

/// Encode a binary-mode command.
///
/// The reboot command bypasses framing: it goes out as the interrupt byte followed
/// by the command byte.
pub fn encode_binary(command_code: &[u8], params: &[u8]) -> Result<Vec<u8>> {
    if command_code == [ByteCodes::REBOOT] {
        return Ok(vec![ByteCodes::INTERRUPT, ByteCodes::REBOOT]);
    }

    BinaryFrame::new(command_code, params)?.encode()
}

/// Encode a text-mode command as `DLC;<count>;<command>;<params>;<timestamp>`
pub fn encode_text(command: &str, params: &str, timestamp: DateTime<Utc>) -> Vec<u8> {
    let count = params.split(TEXT_DELIMITER).count();
    format!(
        "{tag};{count};{command};{params};{ts}",
        tag = TEXT_COMMAND_TAG,
        ts = timestamp.timestamp()
    )
    .into_bytes()
}

/// Big-endian checksum stored just before the end marker
fn embedded_checksum(frame: &[u8]) -> u16 {
    let last = frame.len() - 1;
    u16::from_be_bytes([frame[last - 2], frame[last - 1]])
}

fn as_text(buf: &[u8]) -> Option<&str> {
    std::str::from_utf8(buf)
        .ok()
        .filter(|text| text.contains(TEXT_DELIMITER))
}

fn validate_binary(buf: &[u8]) -> bool {
    if buf.len() < MIN_BINARY_FRAME {
        return false;
    }
    if !ByteCodes::is_frame_boundary(buf[0], buf[buf.len() - 1]) {
        return false;
    }

    crc16(&buf[1..buf.len() - 3]) == embedded_checksum(buf)
}

fn text_tokens(text: &str) -> Vec<&str> {
    text.trim_end_matches(['\r', '\n']).split(TEXT_DELIMITER).collect()
}

fn validate_text(text: &str) -> bool {
    let tokens = text_tokens(text);
    let (Some(first), Some(last)) = (tokens.first(), tokens.last()) else {
        return false;
    };

    // Any opening tag is accepted with either closing tag; the firmware has never been
    // held to DLR/EOR and DLM/EOM pairing
    matches!(*first, TEXT_RESPONSE_TAG | TEXT_MESSAGE_TAG)
        && matches!(*last, TEXT_RESPONSE_END | TEXT_MESSAGE_END)
}

/// Check an inbound buffer for corruption
pub fn validate_frame(buf: &[u8]) -> bool {
    match as_text(buf) {
        Some(text) => validate_text(text),
        None => validate_binary(buf),
    }
}

/// Outcome of classifying one inbound read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Passed validation
    Valid(Vec<u8>),
    /// Free-form firmware output (boot banners, debug prints)
    SystemMessage(Vec<u8>),
    /// Invalid frame reporting a device-side buffer overflow
    Overflow(Vec<u8>),
}

impl InboundFrame {
    pub fn classify(buf: Vec<u8>) -> Self {
        if validate_frame(&buf) {
            return Self::Valid(buf);
        }

        if String::from_utf8_lossy(&buf).contains(OVERFLOW_MARKER) {
            Self::Overflow(buf)
        } else {
            Self::SystemMessage(buf)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextReplyKind {
    /// `DLR` reply to a command
    Response,
    /// `DLM` unsolicited message
    Message,
}

/// Parsed inbound text frame.
///
/// Layout: `<tag>;<count>;<command>;<params...>;<timestamp>;<end>`. For messages the
/// command slot carries the message text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextReply {
    pub kind: TextReplyKind,
    pub param_count: u32,
    pub command: String,
    pub params: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl TextReply {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let text = as_text(buf)
            .filter(|text| validate_text(text))
            .ok_or_else(|| SerialError::ProtocolError("Not a text frame".to_string()))?;

        let tokens = text_tokens(text);
        if tokens.len() < 5 {
            return Err(SerialError::ProtocolError(format!("Text frame too short: {}", text)));
        }

        let kind = if tokens[0] == TEXT_MESSAGE_TAG {
            TextReplyKind::Message
        } else {
            TextReplyKind::Response
        };

        let param_count = tokens[1]
            .trim()
            .parse::<u32>()
            .map_err(|_| SerialError::ProtocolError(format!("Invalid parameter count: {}", tokens[1])))?;

        let ts_token = tokens[tokens.len() - 2].trim();
        let seconds = ts_token
            .parse::<f64>()
            .ok()
            .filter(|s| s.is_finite())
            .ok_or_else(|| SerialError::ProtocolError(format!("Invalid timestamp: {}", ts_token)))?;
        let timestamp = DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
            .ok_or_else(|| SerialError::ProtocolError(format!("Timestamp out of range: {}", ts_token)))?;

        Ok(Self {
            kind,
            param_count,
            command: tokens[2].to_string(),
            params: tokens[3..tokens.len() - 2].iter().map(|t| t.to_string()).collect(),
            timestamp,
        })
    }
}
