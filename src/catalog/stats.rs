//! Platform statistics for the public landing page, cached for an hour.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::db::Cache;
use crate::types::Result;

const STATS_CACHE_KEY: &str = "platform:stats";
const STATS_CACHE_TTL_SECS: u64 = 3600;

/// Aggregate counts shown as landing-page trust signals.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PlatformStats {
    /// Open issues only, consistent with user-facing surfaces.
    pub total_issues: i64,
    pub total_repos: i64,
    pub total_languages: i64,
    /// Most recent repository scrape timestamp.
    pub indexed_at: Option<DateTime<Utc>>,
}

/// Fetch stats through the 1-hour cache; cache failures fall back to a
/// direct query.
pub async fn get_platform_stats(pool: &PgPool, cache: &Cache) -> Result<PlatformStats> {
    match cache.get_json::<PlatformStats>(STATS_CACHE_KEY).await {
        Ok(Some(cached)) => return Ok(cached),
        Ok(None) => {}
        Err(e) => tracing::debug!(error = %e, "stats cache read skipped"),
    }

    let stats = query_stats(pool).await?;

    if let Err(e) = cache
        .set_json(STATS_CACHE_KEY, &stats, STATS_CACHE_TTL_SECS)
        .await
    {
        tracing::debug!(error = %e, "stats cache write skipped");
    }

    Ok(stats)
}

async fn query_stats(pool: &PgPool) -> Result<PlatformStats> {
    let (total_issues,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM ingestion.issue WHERE state = 'open'")
            .fetch_one(pool)
            .await?;

    let (total_repos,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ingestion.repository")
        .fetch_one(pool)
        .await?;

    let (total_languages,): (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT primary_language) FROM ingestion.repository WHERE primary_language IS NOT NULL",
    )
    .fetch_one(pool)
    .await?;

    let (indexed_at,): (Option<DateTime<Utc>>,) =
        sqlx::query_as("SELECT MAX(last_scraped_at) FROM ingestion.repository")
            .fetch_one(pool)
            .await?;

    tracing::info!(total_issues, total_repos, total_languages, "stats queried");

    Ok(PlatformStats {
        total_issues,
        total_repos,
        total_languages,
        indexed_at,
    })
}
