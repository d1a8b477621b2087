//! Content classification
//!
//! Turns a raw clipboard payload into a content type plus metadata. Pure:
//! the input is never modified and classification never fails. Reference
//! content may trigger read-only filesystem probes.

use serde::Serialize;
use serde_json::json;

use crate::clipboard::{ClipboardContent, ClipboardItem, ContentType, Metadata};

pub mod reference;
pub mod text;

pub use reference::classify_reference;
pub use text::{classify_text, detect_language};

/// Result of classifying one payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub metadata: Metadata,
}

/// Classify any clipboard payload
pub fn classify(content: &ClipboardContent) -> Classification {
    match content {
        ClipboardContent::Text(text) => classify_text(text),
        ClipboardContent::Reference(uri) => classify_reference(uri),
        ClipboardContent::Structured(map) => {
            let mut metadata = Metadata::new();
            metadata.insert(
                "note".to_string(),
                json!("unrecognized content shape: structured data is synced verbatim"),
            );
            metadata.insert("keys".to_string(), json!(map.keys().collect::<Vec<_>>()));
            Classification {
                content_type: ContentType::Unknown,
                metadata,
            }
        }
    }
}

/// Classify content and wrap it in a new local item
pub fn build_item(content: ClipboardContent) -> ClipboardItem {
    let Classification {
        content_type,
        metadata,
    } = classify(&content);
    ClipboardItem::new(content, content_type, metadata)
}
