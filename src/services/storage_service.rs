//! src/services/storage_service.rs
//!
//! StorageService: the keyspace store behind the gateway. Object metadata
//! lives in SQLite, payloads on local disk sharded beneath
//! `base_path/{shard}/{shard}/{md5(key)}`. The store owns range resolution and
//! conditional-request evaluation; callers only pass the request through.

use crate::{
    models::object::StoredObject,
    range::{ByteRange, ResolvedRange},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, Take},
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Sorts after every key that starts with a given prefix.
const PREFIX_UPPER_BOUND: char = '\u{10FFFF}';

#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    /// Opaque token from a previous page.
    pub cursor: Option<String>,
    pub limit: usize,
}

/// One page of a listing. A common prefix counts as one entry toward the
/// limit; `truncated` is set iff another entry exists past `cursor`.
#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<StoredObject>,
    pub prefixes: Vec<String>,
    pub truncated: bool,
    pub cursor: Option<String>,
}

/// Conditional request headers, already parsed.
#[derive(Clone, Debug, Default)]
pub struct Conditions {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    pub range: Option<ByteRange>,
    pub conditions: Conditions,
}

/// Result of a successful lookup.
#[derive(Debug)]
pub enum GetOutcome {
    /// A condition withheld the body.
    NotModified(StoredObject),
    /// Payload reader positioned at the start of `range` (or of the object)
    /// and limited to the bytes to be sent.
    Body {
        object: StoredObject,
        range: Option<ResolvedRange>,
        reader: Take<File>,
    },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("invalid list cursor")]
    InvalidCursor,
    #[error("declared length {declared} does not match received length {received}")]
    LengthMismatch { declared: u64, received: u64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the keyspace operations the gateway needs:
/// - put an object from a byte stream (payload to disk, metadata upserted)
/// - get an object with range and conditional handling
/// - list keys with prefix, delimiter grouping and a continuation cursor
/// - delete an object (idempotent)
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl StorageService {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Rejects empty or oversized keys, keys starting with `/`, containing
    /// `..`, backslashes or control characters.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key.bytes().any(|b| b.is_ascii_control() || b == b'\\');
        if invalid {
            return Err(StorageError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    /// Payload path for a key: `base_path/{aa}/{bb}/{md5 hex}`.
    ///
    /// Hashing the key keeps arbitrary keys (including folder markers ending
    /// in `/`) off the real directory structure.
    fn object_path(&self, key: &str) -> PathBuf {
        let digest = md5::compute(key.as_bytes());
        let mut path = self.base_path.clone();
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}", digest));
        path
    }

    async fn fetch_object(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        let row = sqlx::query_as::<_, StoredObject>(
            "SELECT key, content_type, size_bytes, etag, last_modified
             FROM objects WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    /// Stream an object to disk and upsert its metadata.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Fails if `declared_len` is given and disagrees with what arrived.
    /// - Atomically renames into the final location.
    pub async fn put_object_stream<S>(
        &self,
        key: &str,
        content_type: Option<String>,
        declared_len: Option<u64>,
        stream: S,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let (size, etag) = match write_payload(&tmp_path, stream).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        if let Some(declared) = declared_len {
            if declared != size {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::LengthMismatch {
                    declared,
                    received: size,
                });
            }
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let insert_result = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING key, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(key)
        .bind(content_type)
        .bind(size as i64)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(obj) => {
                debug!(key, size, "stored object payload");
                Ok(obj)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Look up an object, evaluate conditions, and open its payload.
    ///
    /// A requested range is honored only when a body is returned and the
    /// range starts inside the object; otherwise the whole object is served.
    pub async fn get_object(&self, key: &str, opts: &GetOptions) -> StorageResult<GetOutcome> {
        self.ensure_key_safe(key)?;
        let object = self
            .fetch_object(key)
            .await?
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;

        if !opts.conditions.allows_body(&object) {
            return Ok(GetOutcome::NotModified(object));
        }

        let mut file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;

        let range = opts.range.and_then(|r| r.resolve(object.size()));
        let reader = match range {
            Some(r) => {
                file.seek(SeekFrom::Start(r.offset)).await?;
                file.take(r.len())
            }
            None => {
                let size = object.size();
                file.take(size)
            }
        };

        Ok(GetOutcome::Body {
            object,
            range,
            reader,
        })
    }

    /// List keys in lexicographical order.
    ///
    /// With a delimiter, keys sharing the segment up to the next delimiter
    /// (after the prefix) collapse into one common prefix, and the scan jumps
    /// past every key under it.
    pub async fn list(&self, opts: &ListOptions) -> StorageResult<ListPage> {
        let limit = opts.limit.max(1);
        let batch = limit + 1;
        let mut after = match opts.cursor.as_deref() {
            Some(token) => Some(decode_cursor(token)?),
            None => None,
        };

        let mut page = ListPage::default();
        'scan: loop {
            let rows = self
                .fetch_after(after.as_deref(), opts.prefix.as_deref(), batch)
                .await?;
            let exhausted = rows.len() < batch;

            for obj in rows {
                if page.objects.len() + page.prefixes.len() == limit {
                    page.truncated = true;
                    break 'scan;
                }
                if let Some(delim) = opts.delimiter.as_deref() {
                    if let Some(prefix) =
                        compute_common_prefix(&obj.key, opts.prefix.as_deref(), delim)
                    {
                        after = Some(format!("{}{}", prefix, PREFIX_UPPER_BOUND));
                        page.prefixes.push(prefix);
                        continue 'scan;
                    }
                }
                after = Some(obj.key.clone());
                page.objects.push(obj);
            }

            if exhausted {
                break;
            }
        }

        if page.truncated {
            page.cursor = after.as_deref().map(encode_cursor);
        }
        Ok(page)
    }

    async fn fetch_after(
        &self,
        after: Option<&str>,
        prefix: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<StoredObject>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT key, content_type, size_bytes, etag, last_modified FROM objects WHERE 1 = 1",
        );
        if let Some(after) = after {
            builder.push(" AND key > ");
            builder.push_bind(after.to_string());
        }
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            // substr avoids LIKE wildcards (`_` is legal in folder names).
            builder.push(" AND substr(key, 1, length(");
            builder.push_bind(prefix.to_string());
            builder.push(")) = ");
            builder.push_bind(prefix.to_string());
        }
        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(limit as i64);

        let rows: Vec<StoredObject> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    /// Remove an object's metadata and payload.
    ///
    /// Idempotent: returns `Ok(false)` if the key did not exist.
    pub async fn delete_object(&self, key: &str) -> StorageResult<bool> {
        self.ensure_key_safe(key)?;
        let result = sqlx::query("DELETE FROM objects WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }

        Ok(result.rows_affected() > 0)
    }

    /// Recursively remove empty shard directories up to the base path.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Write a stream to `path`, returning its size and hex MD5.
async fn write_payload<S>(path: &Path, stream: S) -> StorageResult<(u64, String)>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut file = File::create(path).await?;
    let mut size: u64 = 0;
    let mut digest = Context::new();
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((size, format!("{:x}", digest.compute())))
}

impl Conditions {
    /// Whether the body should be sent for `object`.
    ///
    /// Evaluation order: If-Match, else If-Unmodified-Since; then
    /// If-None-Match, else If-Modified-Since. Any failed or matching
    /// condition withholds the body.
    pub fn allows_body(&self, object: &StoredObject) -> bool {
        let modified = object.last_modified.timestamp();

        if let Some(if_match) = self.if_match.as_deref() {
            if !etag_list_matches(if_match, &object.etag) {
                return false;
            }
        } else if let Some(since) = self.if_unmodified_since {
            if modified > since.timestamp() {
                return false;
            }
        }

        if let Some(if_none_match) = self.if_none_match.as_deref() {
            if etag_list_matches(if_none_match, &object.etag) {
                return false;
            }
        } else if let Some(since) = self.if_modified_since {
            if modified <= since.timestamp() {
                return false;
            }
        }

        true
    }
}

/// Match an `If-Match`/`If-None-Match` value (`*` or a comma separated list of
/// optionally weak, quoted etags) against a bare etag.
fn etag_list_matches(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        if candidate == "*" {
            return true;
        }
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        candidate.trim_matches('"') == etag
    })
}

/// Compute a "common prefix" for delimiter grouping.
///
/// Returns Some(prefix) if the key belongs to a grouped prefix, otherwise None.
fn compute_common_prefix(
    key: &str,
    requested_prefix: Option<&str>,
    delimiter: &str,
) -> Option<String> {
    if delimiter.is_empty() {
        return None;
    }
    let requested_prefix = requested_prefix.unwrap_or("");
    let after_prefix = key.strip_prefix(requested_prefix)?;

    after_prefix.find(delimiter).map(|pos| {
        let mut combined = String::from(requested_prefix);
        combined.push_str(&after_prefix[..pos + delimiter.len()]);
        combined
    })
}

fn encode_cursor(after: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(after)
}

fn decode_cursor(token: &str) -> StorageResult<String> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(StorageError::InvalidCursor)
}
