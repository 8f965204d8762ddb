//! Core data models for the image gateway.
//!
//! `object` and `rate_window` map to database rows via `sqlx::FromRow`;
//! `api` holds the JSON bodies exchanged with clients.

pub mod api;
pub mod object;
pub mod rate_window;
