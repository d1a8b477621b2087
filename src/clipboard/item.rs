//! The unit of synchronization and the content it carries.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Source device label for items that have not left this device yet
pub const LOCAL_SOURCE: &str = "local";

/// Characters escaped in the path of a `file://` URI
const FILE_URI_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Auxiliary attributes attached by the classifier. Key-ordered so its
/// serialized form is canonical.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Top-level content type of a clipboard item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Plain text
    Text,
    /// Text containing at least one http(s) URL
    Url,
    /// Text annotated with email addresses
    Email,
    /// Text containing source code keywords
    Code,
    /// Reference to a file
    File,
    /// Reference to an image resource
    Image,
    /// Content of a shape the classifier does not recognize
    Unknown,
}

impl ContentType {
    /// Whether this type is a refinement of plain text
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            ContentType::Text | ContentType::Url | ContentType::Email | ContentType::Code
        )
    }

    /// Whether content of this type travels as a locator rather than inline
    pub fn is_reference(self) -> bool {
        matches!(self, ContentType::File | ContentType::Image)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Url => "url",
            ContentType::Email => "email",
            ContentType::Code => "code",
            ContentType::File => "file",
            ContentType::Image => "image",
            ContentType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw clipboard payload
#[derive(Debug, Clone, PartialEq)]
pub enum ClipboardContent {
    /// Inline text
    Text(String),
    /// URI-like locator of a file or image
    Reference(String),
    /// Inline structured data
    Structured(Metadata),
}

impl ClipboardContent {
    pub fn text(text: impl Into<String>) -> Self {
        ClipboardContent::Text(text.into())
    }

    pub fn reference(uri: impl Into<String>) -> Self {
        ClipboardContent::Reference(uri.into())
    }

    /// Reference to a local file as a percent-encoded `file://` URI
    pub fn file(path: &Path) -> Self {
        let path = path.to_string_lossy().replace('\\', "/");
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        ClipboardContent::Reference(format!(
            "file://{}",
            utf8_percent_encode(&path, FILE_URI_PATH)
        ))
    }

    /// Canonical string form, used both for fingerprinting and as the
    /// `data` field on the wire.
    pub fn canonical(&self) -> String {
        match self {
            ClipboardContent::Text(text) => text.clone(),
            ClipboardContent::Reference(uri) => uri.clone(),
            // BTreeMap serializes in key order; serializing string-keyed JSON
            // values cannot fail.
            ClipboardContent::Structured(map) => serde_json::to_string(map).unwrap_or_default(),
        }
    }

    /// Get content as text if it is inline text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ClipboardContent::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Byte length of the serialized content
    pub fn size(&self) -> usize {
        match self {
            ClipboardContent::Text(text) => text.len(),
            ClipboardContent::Reference(uri) => uri.len(),
            ClipboardContent::Structured(_) => self.canonical().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ClipboardContent::Text(text) => text.is_empty(),
            ClipboardContent::Reference(uri) => uri.is_empty(),
            ClipboardContent::Structured(map) => map.is_empty(),
        }
    }

    /// Rebuild content from its wire form. References are recognized by
    /// their type; unknown content that parses as a JSON object comes back
    /// as structured data.
    pub fn from_wire(content_type: ContentType, data: String) -> Self {
        if content_type.is_reference() {
            return ClipboardContent::Reference(data);
        }
        if content_type == ContentType::Unknown {
            if let Ok(map) = serde_json::from_str::<Metadata>(&data) {
                return ClipboardContent::Structured(map);
            }
        }
        ClipboardContent::Text(data)
    }
}

/// Clipboard content plus everything the engine knows about it
#[derive(Debug, Clone, PartialEq)]
pub struct ClipboardItem {
    pub id: String,
    pub content: ClipboardContent,
    pub content_type: ContentType,
    pub source_device: String,
    /// Creation time in Unix milliseconds
    pub timestamp: i64,
    pub size: usize,
    pub hash: String,
    pub metadata: Metadata,
}

impl ClipboardItem {
    /// Build a locally originated item. The fingerprint is computed from the
    /// content; type and metadata come from the classifier.
    pub fn new(content: ClipboardContent, content_type: ContentType, metadata: Metadata) -> Self {
        let timestamp = next_timestamp();
        Self {
            id: generate_item_id(timestamp),
            size: content.size(),
            hash: crate::detector::fingerprint(&content),
            content,
            content_type,
            source_device: LOCAL_SOURCE.to_string(),
            timestamp,
            metadata,
        }
    }

    /// Whether this item originated on this device and has not been sent
    pub fn is_local(&self) -> bool {
        self.source_device == LOCAL_SOURCE
    }
}

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Wall-clock milliseconds, forced strictly increasing within this process.
pub fn next_timestamp() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let mut last = LAST_TIMESTAMP.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_TIMESTAMP.compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return candidate,
            Err(observed) => last = observed,
        }
    }
}

/// Opaque item id: timestamp and random salt through SHA-256. Independent
/// of the content, best-effort unique.
pub fn generate_item_id(timestamp: i64) -> String {
    let salt: u64 = rand::random();
    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_be_bytes());
    hasher.update(salt.to_be_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}
