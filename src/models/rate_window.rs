//! Fixed-window request counter for one limiter key.

use sqlx::FromRow;

/// Counter state persisted per limiter key.
///
/// `count` only grows while `now` stays inside
/// `[window_start_ms, window_start_ms + window)`.
#[derive(Clone, Copy, FromRow, Debug, PartialEq, Eq)]
pub struct RateWindow {
    pub count: i64,
    /// Unix epoch milliseconds.
    pub window_start_ms: i64,
}

impl RateWindow {
    pub fn fresh(now_ms: i64) -> Self {
        Self {
            count: 1,
            window_start_ms: now_ms,
        }
    }

    pub fn is_current(&self, now_ms: i64, window_ms: i64) -> bool {
        now_ms - self.window_start_ms < window_ms
    }
}
