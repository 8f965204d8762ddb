//! Batch image upload.
//!
//! Each item is checked against the allow-list, given a fresh key and
//! streamed to the store on its own. A rejected or failed item adds a line to
//! `errors` and the batch moves on; nothing already stored is rolled back.

use crate::{
    models::api::{ImageItem, UploadResult},
    services::{listing_service::ObjectLinks, storage_service::StorageService},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::{collections::HashSet, io, sync::Arc};
use tracing::{info, warn};
use uuid::Uuid;

/// One file of a batch.
pub struct UploadItem<S> {
    pub content_type: Option<String>,
    pub filename: Option<String>,
    /// Declared length, checked against the bytes actually received.
    pub size: Option<u64>,
    pub body: S,
}

#[derive(Clone)]
pub struct UploadService {
    storage: StorageService,
    allowed_types: Arc<HashSet<String>>,
    links: ObjectLinks,
}

impl UploadService {
    pub fn new(storage: StorageService, allowed_types: &[String], links: ObjectLinks) -> Self {
        let allowed_types = allowed_types
            .iter()
            .map(|t| normalize_mime(t))
            .collect::<HashSet<_>>();
        Self {
            storage,
            allowed_types: Arc::new(allowed_types),
            links,
        }
    }

    /// Validate and store a single item. The error is the line reported
    /// back to the client.
    pub async fn store_one<S>(&self, item: UploadItem<S>) -> Result<ImageItem, String>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let label = item.filename.clone().unwrap_or_else(|| "(unnamed)".into());
        let mime = item
            .content_type
            .as_deref()
            .map(normalize_mime)
            .unwrap_or_default();

        if !self.allowed_types.contains(&mime) {
            let shown = if mime.is_empty() { "(none)" } else { mime.as_str() };
            warn!(file = %label, content_type = shown, "rejected upload");
            return Err(format!("{}: {} not supported", label, shown));
        }

        let key = derive_key(&mime, Utc::now());
        match self
            .storage
            .put_object_stream(&key, Some(mime.clone()), item.size, item.body)
            .await
        {
            Ok(object) => {
                info!(file = %label, key = %object.key, size = object.size(), "stored upload");
                Ok(self.links.item(&object.key, object.size(), item.filename))
            }
            Err(err) => {
                warn!(file = %label, %key, "upload failed: {}", err);
                Err(format!("{}: {}", label, err))
            }
        }
    }
}

impl UploadResult {
    pub fn record(&mut self, outcome: Result<ImageItem, String>) {
        match outcome {
            Ok(item) => self.accepted.push(item),
            Err(err) => self.errors.push(err),
        }
    }
}

/// `image/PNG; charset=x` -> `image/png`
fn normalize_mime(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// File extension for an image MIME type, also used as its key directory.
pub fn extension_for(mime: &str) -> String {
    let subtype = mime.split_once('/').map_or(mime, |(_, sub)| sub);
    match subtype {
        "jpeg" | "pjpeg" => "jpg".to_string(),
        "svg+xml" => "svg".to_string(),
        "x-icon" | "vnd.microsoft.icon" => "ico".to_string(),
        other => {
            let other = other.strip_prefix("x-").unwrap_or(other);
            let other = other.split('+').next().unwrap_or(other);
            if other.is_empty() {
                "bin".to_string()
            } else {
                other.to_string()
            }
        }
    }
}

/// `<ext>/<unix millis>-<random>.<ext>`
///
/// The random part keeps concurrent uploads in the same millisecond apart.
pub fn derive_key(mime: &str, now: DateTime<Utc>) -> String {
    let ext = extension_for(mime);
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{}/{}-{}.{}", ext, now.timestamp_millis(), &nonce[..12], ext)
}
