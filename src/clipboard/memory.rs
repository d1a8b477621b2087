//! In-process clipboard, for headless hosts and tests

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ClipboardContent, ClipboardError, ClipboardProvider, MAX_CLIPBOARD_SIZE};

/// Clipboard held in memory
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    content: RwLock<Option<ClipboardContent>>,
    writes: AtomicUsize,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clipboard already holding `text`
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            content: RwLock::new(Some(ClipboardContent::text(text))),
            writes: AtomicUsize::new(0),
        }
    }

    /// Replace the content as a user copy would, bypassing the write counter
    pub async fn copy(&self, content: ClipboardContent) {
        *self.content.write().await = Some(content);
    }

    /// Current content, if any
    pub async fn current(&self) -> Option<ClipboardContent> {
        self.content.read().await.clone()
    }

    /// Number of `set_content` calls that succeeded
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClipboardProvider for MemoryClipboard {
    async fn get_content(&self) -> Result<Option<ClipboardContent>, ClipboardError> {
        Ok(self.content.read().await.clone())
    }

    async fn set_content(&self, content: &ClipboardContent) -> Result<(), ClipboardError> {
        let size = content.size();
        if size > MAX_CLIPBOARD_SIZE {
            return Err(ClipboardError::TooLarge {
                size,
                max: MAX_CLIPBOARD_SIZE,
            });
        }
        *self.content.write().await = Some(content.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_by_default() {
        let clipboard = MemoryClipboard::new();
        assert!(clipboard.get_content().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let clipboard = MemoryClipboard::new();
        clipboard
            .set_content(&ClipboardContent::text("Hello, world!"))
            .await
            .unwrap();
        assert_eq!(
            clipboard.get_content().await.unwrap(),
            Some(ClipboardContent::text("Hello, world!"))
        );
        assert_eq!(clipboard.writes(), 1);
    }

    #[tokio::test]
    async fn test_copy_does_not_count_as_write() {
        let clipboard = MemoryClipboard::with_text("first");
        clipboard.copy(ClipboardContent::text("second")).await;
        assert_eq!(clipboard.writes(), 0);
        assert_eq!(clipboard.current().await, Some(ClipboardContent::text("second")));
    }

    #[tokio::test]
    async fn test_rejects_oversized_content() {
        let clipboard = MemoryClipboard::new();
        let large = "x".repeat(MAX_CLIPBOARD_SIZE + 1);
        let result = clipboard.set_content(&ClipboardContent::text(large)).await;
        assert!(matches!(result, Err(ClipboardError::TooLarge { .. })));
    }
}
