//! Torii — HLS proxy gateway
//!
//! Fetches playlists and segments on a player's behalf, rewrites every
//! reference to route back through the proxy, and shields origins behind a
//! two-tier cache.
//!
//! Library interface for benchmarks and integration tests.
//! The binary entry point is in main.rs.

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod fetch;
pub mod guard;
pub mod metrics;
pub mod rewrite;
pub mod scraper;
pub mod server;
pub mod sign;
