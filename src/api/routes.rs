use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::api::handlers;
use crate::auth::middleware::{optional_auth, require_auth};
use crate::AppState;

/// Assemble the API route table.
///
/// Three auth tiers: public (no session), mixed (session honored when
/// presented), protected (session required). Auth runs before any input
/// validation inside the handlers.
pub fn create_router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new()
        .route("/feed/trending", get(handlers::public::trending))
        .route("/repositories", get(handlers::public::repositories))
        .route("/stats", get(handlers::public::stats))
        .route("/taxonomy/languages", get(handlers::taxonomy::get_languages))
        .route(
            "/taxonomy/stack-areas",
            get(handlers::taxonomy::get_stack_areas),
        );

    let mixed_routes = Router::new()
        .route("/search", post(handlers::search::search))
        .route("/search/interact", post(handlers::search::search_interact))
        .layer(middleware::from_fn_with_state(state.clone(), optional_auth));

    let protected_routes = Router::new()
        .route("/feed", get(handlers::feed::get_feed))
        .route("/feed/preview", get(handlers::feed::get_preview))
        .route("/issues/{node_id}", get(handlers::issues::issue_detail))
        .route(
            "/issues/{node_id}/similar",
            get(handlers::issues::similar_issues),
        )
        .route(
            "/recommendations/events",
            post(handlers::events::submit_events),
        )
        .route("/profile/refresh", post(handlers::profile::refresh_profile))
        .layer(middleware::from_fn_with_state(state, require_auth));

    Router::new()
        .merge(public_routes)
        .merge(mixed_routes)
        .merge(protected_routes)
}
