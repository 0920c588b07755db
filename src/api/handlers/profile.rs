//! Profile vector recomputation.
//!
//! Field CRUD lives with the identity service; this surface only re-embeds
//! the intent source from its stored text and refreshes the combined
//! vector, flagging the profile as calculating for the duration.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::feed::profile::{
    generate_intent_vector, get_or_create_profile, refresh_combined_vector, set_calculating,
    store_intent_vector,
};
use crate::types::Result;
use crate::AppState;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProfileRefreshResponse {
    pub optimization_percent: u8,
    pub has_combined_vector: bool,
    pub is_calculating: bool,
}

/// POST /profile/refresh
///
/// Regenerate the intent vector from the stored intent fields (retried
/// with backoff; a permanent failure leaves the previous vector null) and
/// recompose the combined vector.
pub async fn refresh_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileRefreshResponse>> {
    let profile = get_or_create_profile(&state.pool, user_id).await?;
    set_calculating(&state.pool, user_id, true).await?;

    let intent_vector =
        generate_intent_vector(&profile.intent_stack_areas, &profile.intent_text).await;
    store_intent_vector(&state.pool, user_id, intent_vector).await?;

    // Clears is_calculating and recomposes from whatever sources exist.
    refresh_combined_vector(&state.pool, user_id).await?;

    let refreshed = get_or_create_profile(&state.pool, user_id).await?;
    Ok(Json(ProfileRefreshResponse {
        optimization_percent: refreshed.optimization_percent(),
        has_combined_vector: refreshed.combined_vector.is_some(),
        is_calculating: refreshed.is_calculating,
    }))
}
