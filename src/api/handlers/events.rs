//! Recommendation event submission.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::events::{enqueue_events, get_batch_context, EnqueueOutcome, RecommendationEvent};
use crate::types::{AppError, Result};
use crate::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SubmitEventsRequest {
    pub recommendation_batch_id: Uuid,
    pub events: Vec<RecommendationEvent>,
}

/// POST /recommendations/events
///
/// Validates each event against the served batch context, dedups on
/// `event_id`, and enqueues for the flush job. Unknown batch is 404; a
/// cache outage is 503 (event capture cannot silently degrade).
#[utoipa::path(
    post,
    path = "/recommendations/events",
    request_body = SubmitEventsRequest,
    responses(
        (status = 200, body = EnqueueOutcome),
        (status = 404, description = "unknown batch id"),
        (status = 503, description = "cache unavailable")
    ),
    tag = "events"
)]
pub async fn submit_events(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<SubmitEventsRequest>,
) -> Result<Json<EnqueueOutcome>> {
    let context = get_batch_context(&state.cache, request.recommendation_batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound("recommendation batch not found".to_string()))?;

    let outcome = enqueue_events(
        &state.cache,
        &state.settings.events,
        user_id,
        &context,
        &request.events,
    )
    .await?;

    Ok(Json(outcome))
}
