//! Represents an object (file) held by the keyspace store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata for a single stored object.
///
/// The row describes the payload; the bytes themselves live on disk and are
/// never cached by the gateway.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct StoredObject {
    /// Hierarchical key, `/` separated by convention.
    pub key: String,

    /// Content type (MIME type) recorded at upload time.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: String,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    pub fn size(&self) -> u64 {
        self.size_bytes.max(0) as u64
    }

    /// The etag as it appears on the wire, quoted.
    pub fn http_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }
}
