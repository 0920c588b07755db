//! Public endpoints: trending feed, repository listing, platform stats.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::catalog::repositories::{list_repositories, RepositoryItem, DEFAULT_LIMIT};
use crate::catalog::stats::{get_platform_stats, PlatformStats};
use crate::feed::{get_trending_feed, FeedPage};
use crate::search::models::SearchFilters;
use crate::types::{PageParams, Result};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TrendingParams {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub page_size: Option<i64>,
    /// Comma-separated language filter.
    #[serde(default)]
    pub languages: Option<String>,
    /// Comma-separated label filter.
    #[serde(default)]
    pub labels: Option<String>,
    /// Comma-separated repository full-name filter.
    #[serde(default)]
    pub repos: Option<String>,
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// GET /feed/trending
///
/// Public landing feed: open issues with q_score >= 0.6, ordered by quality
/// then recency.
#[utoipa::path(
    get,
    path = "/feed/trending",
    responses((status = 200, body = FeedPage)),
    tag = "feed"
)]
pub async fn trending(
    State(state): State<AppState>,
    Query(params): Query<TrendingParams>,
) -> Result<Json<FeedPage>> {
    let filters = SearchFilters {
        languages: split_list(params.languages.as_deref()),
        labels: split_list(params.labels.as_deref()),
        repos: split_list(params.repos.as_deref()),
    };
    let paging = PageParams {
        page: params.page.unwrap_or(1),
        page_size: params.page_size.unwrap_or(crate::types::DEFAULT_PAGE_SIZE),
    };

    let page = get_trending_feed(&state.pool, &filters, paging).await?;
    Ok(Json(page))
}

#[derive(Debug, Default, Deserialize)]
pub struct RepositoryParams {
    pub language: Option<String>,
    /// Substring match against full_name; wildcards are escaped.
    pub q: Option<String>,
    pub limit: Option<i64>,
}

/// GET /repositories
pub async fn repositories(
    State(state): State<AppState>,
    Query(params): Query<RepositoryParams>,
) -> Result<Json<Vec<RepositoryItem>>> {
    let repos = list_repositories(
        &state.pool,
        params.language.as_deref(),
        params.q.as_deref(),
        params.limit.unwrap_or(DEFAULT_LIMIT),
    )
    .await?;

    Ok(Json(repos))
}

/// GET /stats
///
/// Platform counts for the landing page, cached for at least an hour.
pub async fn stats(State(state): State<AppState>) -> Result<Json<PlatformStats>> {
    let stats = get_platform_stats(&state.pool, &state.cache).await?;
    Ok(Json(stats))
}
