//! GitMatch - open-source issue discovery, hybrid search, and personalized
//! recommendations.
//!
//! The crate is organized around the retrieval and recommendation core:
//!
//! - [`ingestion`]: Scout -> Gather -> Quality-Gate -> Publish -> Embed ->
//!   Persist -> Janitor pipeline
//! - [`search`]: two-stage hybrid search (lexical ∪ vector, RRF fusion)
//! - [`feed`]: profile-vector composition, similarity ranking, trending
//!   fallback, why-this explanations
//! - [`events`]: at-least-once impression/click capture and batched flush
//! - [`catalog`]: issue detail, repository listing, platform stats
//! - [`embedding`]: process-wide text encoder singleton
//! - [`db`], [`taxonomy`], [`types`], [`utils`]: storage adapters and shared
//!   foundations
//!
//! Two binaries build on this library: `gitmatch-server` (the HTTP API) and
//! `gitmatch-worker` (pipeline jobs dispatched on `JOB_TYPE`).

pub mod api;
pub mod auth;
pub mod catalog;
pub mod db;
pub mod embedding;
pub mod events;
pub mod feed;
pub mod ingestion;
pub mod search;
pub mod taxonomy;
pub mod types;
pub mod utils;

use std::sync::Arc;

use sqlx::PgPool;

use auth::RateLimiter;
use db::Cache;
use utils::Settings;

pub use types::{AppError, Result};

/// Shared application state. Everything here is a cheap clonable handle;
/// the settings are read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub pool: PgPool,
    pub cache: Cache,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(settings: Settings, pool: PgPool, cache: Cache) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(cache.clone(), &settings.rate_limit));
        Self {
            settings: Arc::new(settings),
            pool,
            cache,
            rate_limiter,
        }
    }
}
