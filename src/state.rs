//! Shared handler state.

use crate::{
    config::{AppConfig, CounterBackend},
    services::{
        counter_store::{CounterStore, MemoryCounterStore, SqliteCounterStore},
        listing_service::{ListingService, ObjectLinks},
        rate_limiter::RateLimiter,
        storage_service::StorageService,
        upload_service::UploadService,
    },
};
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};

/// Mount point of the API routes; also the prefix of object `url`s.
pub const REST_PREFIX: &str = "/rest";

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub uploads: UploadService,
    pub listing: ListingService,
    /// Per client, applied to `/upload`.
    pub upload_limiter: RateLimiter,
    /// Across all clients, applied to `/upload`.
    pub global_limiter: RateLimiter,
    /// Shared secret for the mutating routes.
    pub auth_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(cfg: &AppConfig, db: Arc<SqlitePool>) -> Self {
        let storage = StorageService::new(db.clone(), cfg.storage_dir.clone());
        let links = ObjectLinks::new(REST_PREFIX, cfg.public_url.clone());

        let counters: Arc<dyn CounterStore> = match cfg.counter_backend {
            CounterBackend::Sqlite => Arc::new(SqliteCounterStore::new(db)),
            CounterBackend::Memory => Arc::new(MemoryCounterStore::new()),
        };
        let window = Duration::from_secs(cfg.rate_limit_window_secs);

        Self {
            uploads: UploadService::new(storage.clone(), &cfg.allowed_types, links.clone()),
            listing: ListingService::new(storage.clone(), links),
            upload_limiter: RateLimiter::per_identity(counters.clone(), cfg.upload_rate_limit, window)
                .with_fail_open(cfg.rate_limit_fail_open),
            global_limiter: RateLimiter::global(counters, cfg.global_rate_limit, window)
                .with_fail_open(cfg.rate_limit_fail_open),
            auth_token: cfg.auth_token.as_deref().map(Arc::from),
            storage,
        }
    }
}
