//! Listing: request normalization and mapping store pages to client items.

use crate::{
    models::api::{ImageItem, ListPageResponse, ListReq},
    services::storage_service::{ListOptions, StorageResult, StorageService},
};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;
pub const DEFAULT_DELIMITER: &str = "/";

/// Builds the two links an object is reachable under.
#[derive(Clone, Debug)]
pub struct ObjectLinks {
    /// Prefix of the object route on this gateway, e.g. `/rest`.
    route_prefix: String,
    /// Public base URL, e.g. `https://img.example.com`.
    public_url: String,
}

impl ObjectLinks {
    pub fn new(route_prefix: impl Into<String>, public_url: impl Into<String>) -> Self {
        Self {
            route_prefix: route_prefix.into().trim_end_matches('/').to_string(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn relative(&self, key: &str) -> String {
        format!("{}/{}", self.route_prefix, key)
    }

    pub fn external(&self, key: &str) -> String {
        format!("{}/{}", self.public_url, key)
    }

    pub fn item(&self, key: &str, size: u64, filename: Option<String>) -> ImageItem {
        ImageItem {
            url: self.relative(key),
            external_url: self.external(key),
            key: key.to_string(),
            size,
            filename,
        }
    }
}

/// Clamp `limit` into `[1, 100]`; absent or non-positive means 10.
pub fn effective_limit(requested: Option<i64>) -> usize {
    match requested {
        Some(n) if n > 0 => (n as u64).min(MAX_LIMIT as u64) as usize,
        _ => DEFAULT_LIMIT,
    }
}

/// Translate a list request into store options.
///
/// The default delimiter `/` groups keys into folders with no prefix filter.
/// Any other delimiter value is taken as a literal key prefix and the listing
/// under it is flat: a caller wanting grouping must send `/`.
pub fn normalize(req: ListReq) -> ListOptions {
    let limit = effective_limit(req.limit);
    let delimiter = req
        .delimiter
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| DEFAULT_DELIMITER.to_string());
    let cursor = req.cursor.filter(|c| !c.is_empty());

    if delimiter == DEFAULT_DELIMITER {
        ListOptions {
            prefix: None,
            delimiter: Some(delimiter),
            cursor,
            limit,
        }
    } else {
        ListOptions {
            prefix: Some(delimiter),
            delimiter: None,
            cursor,
            limit,
        }
    }
}

#[derive(Clone)]
pub struct ListingService {
    storage: StorageService,
    links: ObjectLinks,
}

impl ListingService {
    pub fn new(storage: StorageService, links: ObjectLinks) -> Self {
        Self { storage, links }
    }

    pub async fn list(&self, req: ListReq) -> StorageResult<ListPageResponse> {
        let opts = normalize(req);
        tracing::debug!(?opts, "listing objects");
        let page = self.storage.list(&opts).await?;

        let items = page
            .objects
            .iter()
            .map(|obj| self.links.item(&obj.key, obj.size(), None))
            .collect();

        Ok(ListPageResponse {
            items,
            truncated: page.truncated,
            cursor: page.cursor,
            prefixes: page.prefixes,
        })
    }
}
