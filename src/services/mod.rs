//! Domain services behind the HTTP handlers.

pub mod counter_store;
pub mod listing_service;
pub mod rate_limiter;
pub mod storage_service;
pub mod upload_service;
