//! Fixed-window request limiter.
//!
//! One type covers both per-client and process-wide limits: the only
//! difference is how a caller identity maps to a counter key.

use crate::{
    models::rate_window::RateWindow,
    services::counter_store::{CounterError, CounterStore},
};
use chrono::Utc;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Maps a caller identity to the counter key it is charged against.
pub type KeyFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    name: &'static str,
    store: Arc<dyn CounterStore>,
    key_fn: KeyFn,
    max_requests: u32,
    window: Duration,
    fail_open: bool,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("fail_open", &self.fail_open)
            .finish()
    }
}

impl RateLimiter {
    pub fn new(
        name: &'static str,
        store: Arc<dyn CounterStore>,
        key_fn: KeyFn,
        max_requests: u32,
        window: Duration,
    ) -> Self {
        Self {
            name,
            store,
            key_fn,
            max_requests,
            window,
            fail_open: true,
        }
    }

    /// Each identity gets its own window, keyed `rate_limit_<identity>`.
    pub fn per_identity(store: Arc<dyn CounterStore>, max_requests: u32, window: Duration) -> Self {
        Self::new(
            "per_identity",
            store,
            Arc::new(|identity: &str| format!("rate_limit_{}", identity)),
            max_requests,
            window,
        )
    }

    /// Every identity shares one window.
    pub fn global(store: Arc<dyn CounterStore>, max_requests: u32, window: Duration) -> Self {
        Self::new(
            "global",
            store,
            Arc::new(|_: &str| "rate_limit_global".to_string()),
            max_requests,
            window,
        )
    }

    /// Whether to let requests through when the counter store fails.
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    pub async fn allow(&self, identity: &str) -> bool {
        self.check(identity).await.is_allowed()
    }

    pub async fn check(&self, identity: &str) -> Decision {
        self.check_at(identity, Utc::now().timestamp_millis()).await
    }

    /// Decide for a request arriving at `now_ms` (epoch milliseconds).
    pub async fn check_at(&self, identity: &str, now_ms: i64) -> Decision {
        let key = (self.key_fn)(identity);
        match self.try_check(&key, now_ms).await {
            Ok(decision) => decision,
            Err(err) if self.fail_open => {
                warn!(limiter = self.name, %key, "counter store failed, allowing: {}", err);
                Decision::Allowed
            }
            Err(err) => {
                warn!(limiter = self.name, %key, "counter store failed, denying: {}", err);
                Decision::Denied {
                    retry_after: self.window,
                }
            }
        }
    }

    async fn try_check(&self, key: &str, now_ms: i64) -> Result<Decision, CounterError> {
        let window_ms = self.window.as_millis() as i64;

        let next = match self.store.load(key).await? {
            Some(current) if current.is_current(now_ms, window_ms) => {
                if current.count >= i64::from(self.max_requests) {
                    let remaining = current.window_start_ms + window_ms - now_ms;
                    debug!(limiter = self.name, key, count = current.count, "request denied");
                    return Ok(Decision::Denied {
                        retry_after: Duration::from_millis(remaining.max(0) as u64),
                    });
                }
                RateWindow {
                    count: current.count + 1,
                    window_start_ms: current.window_start_ms,
                }
            }
            _ => RateWindow::fresh(now_ms),
        };

        self.store.save(key, next).await?;
        Ok(Decision::Allowed)
    }
}
