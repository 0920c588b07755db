//! Hybrid search endpoints.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::client_ip;
use crate::auth::MaybeAuthUser;
use crate::search::{self, interact, models::SearchRequest, models::SearchResponse};
use crate::types::Result;
use crate::AppState;

/// POST /search
///
/// Two-stage hybrid search: lexical and vector candidates fused with RRF,
/// then enriched. Anonymous callers are served too; authenticated callers
/// get a user-scoped cache key.
#[utoipa::path(
    post,
    path = "/search",
    request_body = SearchRequest,
    responses((status = 200, body = SearchResponse)),
    tag = "search"
)]
pub async fn search(
    State(state): State<AppState>,
    MaybeAuthUser(user_id): MaybeAuthUser,
    headers: HeaderMap,
    Json(mut request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    state
        .rate_limiter
        .check(&client_ip(&headers), "search")
        .await?;

    request.user_id = user_id;
    let response = search::hybrid_search(
        &state.pool,
        &state.cache,
        &state.settings.search,
        request,
    )
    .await?;

    Ok(Json(response))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct InteractRequest {
    pub search_id: Uuid,
    pub selected_node_id: String,
    pub position: i64,
}

/// POST /search/interact
///
/// Log a click against a cached search context. Returns 204; telemetry
/// persistence failures are not surfaced to the client.
pub async fn search_interact(
    State(state): State<AppState>,
    MaybeAuthUser(user_id): MaybeAuthUser,
    Json(request): Json<InteractRequest>,
) -> Result<StatusCode> {
    interact::record_interaction(
        &state.pool,
        &state.cache,
        user_id,
        request.search_id,
        &request.selected_node_id,
        request.position,
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
