//! Classification of file and image references
//!
//! Probes are read-only and best-effort: anything that cannot be resolved is
//! left out of the metadata instead of failing the classification.

use std::path::{Path, PathBuf};

use image::{ImageFormat, ImageReader};
use percent_encoding::percent_decode_str;
use serde_json::json;
use tracing::debug;

use super::Classification;
use crate::clipboard::{ContentType, Metadata};

/// Classify a URI-like locator
pub fn classify_reference(uri: &str) -> Classification {
    let mut content_type = ContentType::File;
    let mut metadata = Metadata::new();
    metadata.insert("uri".to_string(), json!(uri));

    let local_path = local_path(uri);

    let name = match &local_path {
        Some(path) => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
        None => remote_name(uri),
    };

    if let Some(path) = &local_path {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => {
                metadata.insert("size".to_string(), json!(meta.len()));
            }
            Ok(_) => {}
            Err(e) => debug!("No size for {}: {}", path.display(), e),
        }
    }

    let mime_type = name
        .as_deref()
        .and_then(|n| Path::new(n).extension())
        .and_then(ImageFormat::from_extension)
        .map(|format| format.to_mime_type());

    if let Some(mime_type) = mime_type.filter(|m| m.starts_with("image/")) {
        content_type = ContentType::Image;
        metadata.insert("mime_type".to_string(), json!(mime_type));

        if let Some((width, height)) = local_path.as_deref().and_then(image_dimensions) {
            metadata.insert("width".to_string(), json!(width));
            metadata.insert("height".to_string(), json!(height));
        }
    }

    if let Some(name) = name {
        metadata.insert("name".to_string(), json!(name));
    }

    Classification {
        content_type,
        metadata,
    }
}

/// Read only the image header to get its pixel size
fn image_dimensions(path: &Path) -> Option<(u32, u32)> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| debug!("Cannot open image {}: {}", path.display(), e))
        .ok()?;

    reader
        .into_dimensions()
        .map_err(|e| debug!("Cannot read dimensions of {}: {}", path.display(), e))
        .ok()
}

/// Resolve `file://` URIs and bare paths to a local filesystem path
fn local_path(uri: &str) -> Option<PathBuf> {
    if let Some(rest) = uri.strip_prefix("file://") {
        let rest = rest.strip_prefix("localhost").unwrap_or(rest);
        return Some(PathBuf::from(percent_decode(rest)));
    }
    if uri.contains("://") {
        return None;
    }
    Some(PathBuf::from(uri))
}

/// Last path segment of a non-local URI
fn remote_name(uri: &str) -> Option<String> {
    let without_suffix = uri.split(['?', '#']).next().unwrap_or(uri);
    let (_, after_scheme) = without_suffix.split_once("://")?;
    let (_, path) = after_scheme.split_once('/')?;
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(percent_decode)
}

fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}
