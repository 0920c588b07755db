//! Feed endpoints: personalized feed and onboarding previews.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::events::{
    generate_recommendation_batch_id, store_batch_context, RecommendationBatchContext,
};
use crate::feed::{self, FeedPage, PreviewIssue, PreviewSource};
use crate::types::{PageParams, Result};
use crate::AppState;

/// Feed page plus the batch id used for impression/click logging.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FeedResponse {
    #[serde(flatten)]
    pub page: FeedPage,
    /// Server-minted identifier for logging impressions and clicks against
    /// this response.
    pub recommendation_batch_id: String,
}

/// GET /feed
///
/// Personalized recommendations when the profile has a combined vector;
/// trending fallback with a profile call-to-action otherwise.
#[utoipa::path(
    get,
    path = "/feed",
    params(("page" = i64, Query, description = "1-indexed page"),
           ("page_size" = i64, Query, description = "results per page, max 50")),
    responses((status = 200, body = FeedResponse)),
    tag = "feed"
)]
pub async fn get_feed(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<PageParams>,
) -> Result<Json<FeedResponse>> {
    let page = feed::get_feed(&state.pool, user_id, params).await?;

    let batch_id = generate_recommendation_batch_id();
    let context = RecommendationBatchContext {
        recommendation_batch_id: batch_id,
        issue_node_ids: page.results.iter().map(|item| item.node_id.clone()).collect(),
        page: page.page,
        page_size: page.page_size,
        is_personalized: page.is_personalized,
        served_at: chrono::Utc::now(),
    };
    store_batch_context(&state.cache, &state.settings.events, &context).await;

    Ok(Json(FeedResponse {
        page,
        recommendation_batch_id: batch_id.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    pub source: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PreviewResponse {
    pub results: Vec<PreviewIssue>,
}

/// GET /feed/preview
///
/// Up to three issues ranked by a single profile source vector, for the
/// onboarding flow; trending when that vector is missing.
pub async fn get_preview(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<PreviewParams>,
) -> Result<Json<PreviewResponse>> {
    let source = params
        .source
        .as_deref()
        .map(str::parse::<PreviewSource>)
        .transpose()?;

    let results = feed::get_preview_recommendations(&state.pool, user_id, source).await?;
    Ok(Json(PreviewResponse { results }))
}
