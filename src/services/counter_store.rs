//! Shared counter storage for rate-limit windows.
//!
//! Limiters never hold counters themselves; they read and write a
//! [`RateWindow`] through a [`CounterStore`]. Read-modify-write is not
//! transactional, so concurrent requests for one key may both pass.

use crate::models::rate_window::RateWindow;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    async fn load(&self, key: &str) -> Result<Option<RateWindow>, CounterError>;
    async fn save(&self, key: &str, window: RateWindow) -> Result<(), CounterError>;
}

/// Counters in the `rate_limits` table, shared by every gateway process
/// that opens the same database.
#[derive(Clone)]
pub struct SqliteCounterStore {
    db: Arc<SqlitePool>,
}

impl SqliteCounterStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn load(&self, key: &str) -> Result<Option<RateWindow>, CounterError> {
        let row = sqlx::query_as::<_, RateWindow>(
            "SELECT count, window_start_ms FROM rate_limits WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    async fn save(&self, key: &str, window: RateWindow) -> Result<(), CounterError> {
        sqlx::query(
            "INSERT INTO rate_limits (key, count, window_start_ms) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                count = excluded.count,
                window_start_ms = excluded.window_start_ms",
        )
        .bind(key)
        .bind(window.count)
        .bind(window.window_start_ms)
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}

/// Per-process counters. Limits are not shared between instances.
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    windows: Arc<RwLock<HashMap<String, RateWindow>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn load(&self, key: &str) -> Result<Option<RateWindow>, CounterError> {
        Ok(self.windows.read().await.get(key).copied())
    }

    async fn save(&self, key: &str, window: RateWindow) -> Result<(), CounterError> {
        self.windows.write().await.insert(key.to_string(), window);
        Ok(())
    }
}
