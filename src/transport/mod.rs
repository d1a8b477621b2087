//! Network transport layer for clipboard synchronization
//!
//! This module provides the WebSocket transport that keeps one persistent
//! connection to a paired peer: the `device_info` handshake, the ping/pong
//! keepalive, JSON envelope framing (one envelope per text frame) and
//! optional reconnection with exponential backoff.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

pub mod protocol;
pub mod reconnect;
pub mod websocket;

#[cfg(test)]
mod unit_tests;

pub use protocol::{
    ClipboardUpdate, DeviceInfo, Envelope, MessageType, Ping, Pong, ProtocolError, UpdateData,
};
pub use reconnect::{ReconnectionConfig, ReconnectionPolicy};
pub use websocket::{LinkStats, SyncListener, SyncTransport};

use crate::clipboard::ClipboardItem;
use crate::pairing::PairingError;

/// Connection identifier type
pub type ConnectionId = Uuid;

/// Transport layer errors with user-friendly messages
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket protocol error
    #[error("CW001: Network connection error: {message}. Please check your network connection and try again.")]
    WebSocket { message: String },

    /// Connection error
    #[error("CW002: Connection failed: {message}. Check if the remote device is online and accessible.")]
    Connection { message: String },

    /// Envelope could not be built or parsed
    #[error("CW003: Data format error: {0}. The message format may be corrupted or incompatible.")]
    Protocol(#[from] ProtocolError),

    /// IO error
    #[error("CW004: System error: {0}.")]
    Io(#[from] std::io::Error),

    /// Peer address could not be used
    #[error("CW005: Configuration error: {0}. Use a connection string like ws://192.168.1.20:8484.")]
    InvalidAddress(#[from] PairingError),

    /// Connect took too long
    #[error("CW006: Connection timed out. Check your network connection and try again.")]
    Timeout,

    /// A connection already exists
    #[error("CW007: Already connected to a peer. Disconnect first.")]
    AlreadyConnected,

    /// Connection closed
    #[error("CW008: Connection closed unexpectedly. The remote device may have gone offline or network connectivity was lost.")]
    ConnectionClosed,

    /// The transport was shut down and can no longer connect
    #[error("CW009: Transport has been shut down.")]
    Closed,
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Connection state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection
    Disconnected,

    /// Socket is being opened
    Connecting,

    /// Socket is open, device info is being exchanged
    Handshaking,

    /// Connection is ready for clipboard traffic
    Open,

    /// Connection is being closed
    Closing,

    /// Transport was shut down
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Connection information and metadata
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Unique connection identifier
    pub id: ConnectionId,

    /// Peer URL, or remote socket address for accepted connections
    pub peer: String,

    /// Connection establishment time
    pub established_at: chrono::DateTime<chrono::Utc>,

    /// Connection state
    pub state: ConnectionState,

    /// Traffic and keepalive counters
    pub stats: LinkStats,
}

/// Events delivered to the transport's single subscriber
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection reached the open state
    Connected { peer: String },

    /// Peer described itself
    PeerInfo(DeviceInfo),

    /// Peer sent clipboard content
    Update(ClipboardItem),

    /// Connection was lost without a local disconnect request
    Disconnected { peer: String, reason: String },

    /// A failure that did not end the connection
    Error(String),
}

/// Configuration for transport layer
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Connection timeout (default: 10 seconds)
    pub connect_timeout: Duration,

    /// Keep-alive interval (default: 30 seconds)
    pub keepalive_interval: Duration,

    /// Unanswered ping age after which the connection counts as lost
    pub pong_timeout: Option<Duration>,

    /// Maximum envelope size in bytes (default: 5MB)
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            pong_timeout: None,
            max_message_size: crate::MAX_PAYLOAD_SIZE,
        }
    }
}
