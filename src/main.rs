//! GitMatch API server binary.
//!
//! For library usage, import from the `gitmatch` crate instead.

use axum::{routing::get, Json, Router};
use gitmatch::{api, db, embedding, utils::Settings, AppState};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

const MAX_BODY_BYTES: usize = 256 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        gitmatch::api::handlers::feed::get_feed,
        gitmatch::api::handlers::public::trending,
        gitmatch::api::handlers::search::search,
        gitmatch::api::handlers::events::submit_events,
    ),
    components(schemas(
        gitmatch::api::handlers::feed::FeedResponse,
        gitmatch::api::handlers::search::InteractRequest,
        gitmatch::api::handlers::events::SubmitEventsRequest,
        gitmatch::search::models::SearchRequest,
        gitmatch::search::models::SearchResponse,
        gitmatch::feed::FeedPage,
        gitmatch::events::EnqueueOutcome,
    )),
    tags(
        (name = "feed", description = "Personalized and trending feeds"),
        (name = "search", description = "Hybrid text + semantic search"),
        (name = "events", description = "Recommendation event capture"),
    ),
    info(
        title = "GitMatch API",
        version = "0.1.0",
        description = "Open-source issue discovery, hybrid search, and personalized recommendations"
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting GitMatch API server");

    let settings = Settings::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    settings.validate().map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // =================================================================
    // Initialize Database
    // =================================================================
    let pool = db::init_pool(&settings.database)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    db::apply_schema(&pool)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // =================================================================
    // Initialize Cache
    // =================================================================
    let cache = db::Cache::new(settings.cache.redis_url.clone());
    if !cache.configured() {
        tracing::warn!("REDIS_URL not set; caching, rate limits, and event capture degrade");
    }

    // =================================================================
    // Build CORS policy (wildcards rejected earlier by validate())
    // =================================================================
    let origins: Vec<_> = settings
        .server
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let state = AppState::new(settings, pool, cache);

    // =================================================================
    // Build Router
    // =================================================================
    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .merge(api::routes::create_router(state.clone()))
        .layer(axum::middleware::from_fn(api::middleware::security_headers))
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // =================================================================
    // Start Server
    // =================================================================
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release process-scoped resources deterministically.
    embedding::close_embedder();
    tracing::info!("Server stopped");

    Ok(())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Resolve on SIGINT or SIGTERM; drives graceful drain of in-flight requests.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
