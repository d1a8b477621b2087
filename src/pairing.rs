//! Pairing payloads and peer connection strings
//!
//! Pairing happens out of band (typically a scanned code). Its payload names
//! the peer's address; the engine only ever sees the resulting
//! `ws://host:port` connection string.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scheme accepted in connection strings
pub const PEER_SCHEME: &str = "ws";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("Invalid pairing payload: {0}")]
    Payload(String),

    #[error("Invalid peer address '{address}': {reason}")]
    Address { address: String, reason: String },
}

/// Decoded pairing payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingInfo {
    pub server_ip: String,
    pub server_port: u16,
    pub device_name: String,
}

impl PairingInfo {
    /// Decode the JSON carried by a pairing code, either raw or
    /// percent-encoded as scanned from a URL
    pub fn decode(payload: &str) -> Result<Self, PairingError> {
        let payload = payload.trim();
        let json = if payload.starts_with('{') {
            Cow::Borrowed(payload)
        } else {
            percent_decode_str(payload)
                .decode_utf8()
                .map_err(|e| PairingError::Payload(e.to_string()))?
        };
        serde_json::from_str(json.trim()).map_err(|e| PairingError::Payload(e.to_string()))
    }

    /// Connection string for this peer
    pub fn peer_address(&self) -> Result<PeerAddress, PairingError> {
        let host = if self.server_ip.contains(':') && !self.server_ip.starts_with('[') {
            format!("[{}]", self.server_ip)
        } else {
            self.server_ip.clone()
        };
        format!("{}://{}:{}", PEER_SCHEME, host, self.server_port).parse()
    }
}

/// A parsed `scheme://host:port` connection string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// URL handed to the WebSocket client
    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl FromStr for PeerAddress {
    type Err = PairingError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| PairingError::Address {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = address
            .trim()
            .split_once("://")
            .ok_or_else(|| invalid("expected scheme://host:port"))?;

        if !scheme.eq_ignore_ascii_case(PEER_SCHEME) {
            return Err(invalid(&format!("unsupported scheme '{}'", scheme)));
        }

        let authority = rest.trim_end_matches('/');
        if authority.contains('/') {
            return Err(invalid("unexpected path after host:port"));
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 address"))?;
            let port = after
                .strip_prefix(':')
                .ok_or_else(|| invalid("missing port"))?;
            (format!("[{}]", host), port)
        } else {
            let (host, port) = authority
                .rsplit_once(':')
                .ok_or_else(|| invalid("missing port"))?;
            if host.contains(':') {
                return Err(invalid("IPv6 addresses must be enclosed in brackets"));
            }
            (host.to_string(), port)
        };

        if host.is_empty() || host == "[]" {
            return Err(invalid("missing host"));
        }

        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
        if port == 0 {
            return Err(invalid("port must be between 1 and 65535"));
        }

        Ok(Self { host, port })
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", PEER_SCHEME, self.host, self.port)
    }
}
