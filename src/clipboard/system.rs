//! System clipboard backed by arboard
//!
//! arboard covers macOS, Windows, X11 and Wayland (data-control) behind one
//! API. Copied files are read as `file://` references, everything else as
//! text. References are never written back.

use arboard::Clipboard;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ClipboardContent, ClipboardError, ClipboardProvider, MAX_CLIPBOARD_SIZE};

/// Clipboard provider for the desktop session this process runs in
pub struct SystemClipboard {
    clipboard: Mutex<Clipboard>,
}

impl SystemClipboard {
    /// Connect to the platform clipboard
    pub fn new() -> Result<Self, ClipboardError> {
        let clipboard = Clipboard::new()
            .map_err(|e| ClipboardError::Platform(format!("Failed to open clipboard: {}", e)))?;

        Ok(Self {
            clipboard: Mutex::new(clipboard),
        })
    }
}

#[async_trait]
impl ClipboardProvider for SystemClipboard {
    async fn get_content(&self) -> Result<Option<ClipboardContent>, ClipboardError> {
        let mut clipboard = self.clipboard.lock().await;

        match clipboard.get().file_list() {
            Ok(files) => {
                if files.len() > 1 {
                    debug!("{} files on the clipboard, using the first", files.len());
                }
                if let Some(first) = files.first() {
                    return Ok(Some(ClipboardContent::file(first)));
                }
            }
            Err(arboard::Error::ContentNotAvailable) => {}
            Err(e) => debug!("No file list on the clipboard: {}", e),
        }

        match clipboard.get_text() {
            Ok(text) if text.is_empty() => Ok(None),
            Ok(text) => Ok(Some(ClipboardContent::Text(text))),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(ClipboardError::Platform(format!("Failed to read clipboard: {}", e))),
        }
    }

    async fn set_content(&self, content: &ClipboardContent) -> Result<(), ClipboardError> {
        let text = match content {
            ClipboardContent::Text(text) => text.clone(),
            ClipboardContent::Structured(_) => content.canonical(),
            ClipboardContent::Reference(_) => {
                return Err(ClipboardError::UnsupportedType("reference".to_string()));
            }
        };

        if text.len() > MAX_CLIPBOARD_SIZE {
            return Err(ClipboardError::TooLarge {
                size: text.len(),
                max: MAX_CLIPBOARD_SIZE,
            });
        }

        let mut clipboard = self.clipboard.lock().await;
        clipboard
            .set_text(text)
            .map_err(|e| ClipboardError::Platform(format!("Failed to write clipboard: {}", e)))
    }

    fn name(&self) -> &str {
        "system"
    }
}
