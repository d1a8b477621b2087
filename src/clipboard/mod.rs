//! Clipboard abstraction layer
//!
//! This module defines the boundary between the sync engine and the host's
//! clipboard: a provider trait with "get current content" and "set content",
//! the item model that flows through the engine, and two providers (the
//! system clipboard and an in-memory one for headless hosts and tests).

use async_trait::async_trait;
use thiserror::Error;

pub mod item;
pub mod memory;
pub mod system;

pub use item::{ClipboardContent, ClipboardItem, ContentType, Metadata, LOCAL_SOURCE};
pub use memory::MemoryClipboard;
pub use system::SystemClipboard;

/// Maximum clipboard content size (5MB)
pub const MAX_CLIPBOARD_SIZE: usize = 5 * 1024 * 1024;

/// Clipboard provider trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClipboardProvider: Send + Sync {
    /// Get current clipboard content, `None` when the clipboard is empty
    async fn get_content(&self) -> Result<Option<ClipboardContent>, ClipboardError>;

    /// Set clipboard content
    async fn set_content(&self, content: &ClipboardContent) -> Result<(), ClipboardError>;

    /// Get provider name
    fn name(&self) -> &str;
}

/// Clipboard errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Platform-specific error
    #[error("Platform error: {0}")]
    Platform(String),

    /// Content too large
    #[error("Content too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: usize, max: usize },

    /// Unsupported content type
    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Create a clipboard provider for the current platform
pub fn create_provider() -> Result<Box<dyn ClipboardProvider>, ClipboardError> {
    Ok(Box::new(SystemClipboard::new()?))
}
