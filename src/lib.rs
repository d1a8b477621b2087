//! # clipwire
//!
//! Clipboard sync engine: classifies clipboard content, detects local
//! changes by polling, and exchanges clipboard updates with one paired
//! device over a persistent WebSocket connection without echoing applied
//! content back to where it came from.
//!
//! The moving parts:
//!
//! - [`classify`]: content type and metadata for clipboard payloads
//! - [`detector`]: polling change detector and the shared fingerprint cursor
//! - [`transport`]: WebSocket transport, wire protocol and keepalive
//! - [`sync`]: the coordinator tying both directions together

pub mod classify;
pub mod cli;
pub mod clipboard;
pub mod config;
pub mod detector;
pub mod device;
pub mod pairing;
pub mod sync;
pub mod transport;

pub use config::Config;
pub use sync::{SyncEngine, SyncEvent};

/// Result type alias for clipwire operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for clipwire operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    /// Pairing payload or peer address error
    #[error("Pairing error: {0}")]
    Pairing(#[from] pairing::PairingError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum clipboard payload size (5MB default)
pub const MAX_PAYLOAD_SIZE: usize = 5 * 1024 * 1024;
