//! HTTP gateway for an image object store: batch uploads, paginated
//! listings, range-aware downloads, folders and deletes, with a shared-secret
//! gate on mutating routes and fixed-window rate limits on uploads.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod range;
pub mod routes;
pub mod services;
pub mod state;
