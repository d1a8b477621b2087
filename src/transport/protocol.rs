//! Wire protocol definitions for the sync transport
//!
//! Every application message is one JSON object carried in exactly one
//! WebSocket text frame. The `type` field selects the envelope:
//!
//! | type               | fields                                                      |
//! |--------------------|-------------------------------------------------------------|
//! | `device_info`      | `device_id, device_name, device_type, capabilities, timestamp` |
//! | `ping`             | `device_id, timestamp`                                      |
//! | `pong`             | `timestamp` (echoed from the ping)                          |
//! | `clipboard_update` | `device_id, timestamp, data: {type, data, size, hash, metadata}` |
//!
//! Timestamps are Unix milliseconds.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::clipboard::{
    item::generate_item_id, ClipboardContent, ClipboardItem, ContentType, Metadata, LOCAL_SOURCE,
};
use crate::device::DeviceIdentity;

/// Envelope types this implementation understands
pub const KNOWN_TYPES: &[&str] = &["device_info", "ping", "pong", "clipboard_update"];

/// Errors decoding or encoding an envelope
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope is not a JSON object")]
    NotAnObject,

    #[error("envelope has no 'type' field")]
    MissingType,

    #[error("unknown envelope type '{0}'")]
    UnknownType(String),

    #[error("update carries an invalid sender id '{0}'")]
    InvalidSender(String),
}

impl ProtocolError {
    /// Unknown types are expected from newer peers and are not worth a warning
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, ProtocolError::UnknownType(_))
    }
}

/// Message type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    DeviceInfo,
    Ping,
    Pong,
    ClipboardUpdate,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::DeviceInfo => write!(f, "device_info"),
            MessageType::Ping => write!(f, "ping"),
            MessageType::Pong => write!(f, "pong"),
            MessageType::ClipboardUpdate => write!(f, "clipboard_update"),
        }
    }
}

/// Wire format message container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    DeviceInfo(DeviceInfo),
    Ping(Ping),
    Pong(Pong),
    ClipboardUpdate(ClipboardUpdate),
}

/// Peer description sent right after the socket opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub device_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub timestamp: i64,
}

impl Pong {
    /// Round trip time of the ping this pong echoes, clamped at zero
    pub fn latency(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.timestamp).max(0) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardUpdate {
    pub device_id: String,
    pub timestamp: i64,
    pub data: UpdateData,
}

/// Clipboard payload block of an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateData {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub data: String,
    pub size: u64,
    pub hash: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ClipboardUpdate {
    /// Turn a received update into an item tagged with the sending device
    /// and stamped with the local receipt time. The sender id must name a
    /// remote device.
    pub fn into_item(self, received_at: i64) -> Result<ClipboardItem, ProtocolError> {
        if self.device_id.trim().is_empty() || self.device_id == LOCAL_SOURCE {
            return Err(ProtocolError::InvalidSender(self.device_id));
        }

        let UpdateData {
            content_type,
            data,
            size,
            hash,
            metadata,
        } = self.data;

        Ok(ClipboardItem {
            id: generate_item_id(received_at),
            content: ClipboardContent::from_wire(content_type, data),
            content_type,
            source_device: self.device_id,
            timestamp: received_at,
            size: size as usize,
            hash,
            metadata,
        })
    }
}

impl Envelope {
    pub fn device_info(identity: &DeviceIdentity) -> Self {
        Envelope::DeviceInfo(DeviceInfo {
            device_id: identity.device_id.clone(),
            device_name: identity.device_name.clone(),
            device_type: identity.device_type.clone(),
            capabilities: identity.capabilities.clone(),
            timestamp: now_millis(),
        })
    }

    pub fn ping(device_id: &str) -> Self {
        Envelope::Ping(Ping {
            device_id: device_id.to_string(),
            timestamp: now_millis(),
        })
    }

    pub fn pong(timestamp: i64) -> Self {
        Envelope::Pong(Pong { timestamp })
    }

    pub fn clipboard_update(item: &ClipboardItem, device_id: &str) -> Self {
        Envelope::ClipboardUpdate(ClipboardUpdate {
            device_id: device_id.to_string(),
            timestamp: item.timestamp,
            data: UpdateData {
                content_type: item.content_type,
                data: item.content.canonical(),
                size: item.size as u64,
                hash: item.hash.clone(),
                metadata: item.metadata.clone(),
            },
        })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Envelope::DeviceInfo(_) => MessageType::DeviceInfo,
            Envelope::Ping(_) => MessageType::Ping,
            Envelope::Pong(_) => MessageType::Pong,
            Envelope::ClipboardUpdate(_) => MessageType::ClipboardUpdate,
        }
    }

    /// Serialize to the text carried in one frame
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one frame. The `type` field is checked before the body so that
    /// unknown types are told apart from malformed known ones.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .as_object()
            .ok_or(ProtocolError::NotAnObject)?
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        if !KNOWN_TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }
}

/// Current wall-clock time in Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
