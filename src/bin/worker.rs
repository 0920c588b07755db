//! GitMatch worker binary: one entrypoint for all pipeline jobs.
//!
//! Usage:
//!     JOB_TYPE=collector  gitmatch-worker   # Scout + Gather -> staging + broker
//!     JOB_TYPE=embedder   gitmatch-worker   # issue topic -> embed -> DB
//!     JOB_TYPE=janitor    gitmatch-worker   # prune low-survival issues
//!     JOB_TYPE=reco_flush gitmatch-worker   # flush recommendation events
//!
//! All jobs share a health endpoint on PORT (default 8080). For the embedder
//! job the health check returns 200 only when a probe embed produces a
//! vector of the expected dimension.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Timelike;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gitmatch::db::{self, Cache};
use gitmatch::embedding::{self, EMBEDDING_DIM};
use gitmatch::events::flush::run_flush_job;
use gitmatch::ingestion::broker::{MessageBroker, RedisStreamBroker};
use gitmatch::ingestion::gatherer::Gatherer;
use gitmatch::ingestion::github::GitHubClient;
use gitmatch::ingestion::janitor::Janitor;
use gitmatch::ingestion::persistence;
use gitmatch::ingestion::producer::{IssueProducer, RepoProducer};
use gitmatch::ingestion::scout::{filter_shard, Scout};
use gitmatch::ingestion::worker::{DbIssueProcessor, EmbedderWorker};
use gitmatch::utils::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Worker logs ship as JSON lines for log-pipeline ingestion.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let settings = Settings::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let job_type = std::env::var("JOB_TYPE")
        .unwrap_or_else(|_| "collector".to_string())
        .to_lowercase();

    tracing::info!(job_type, "starting worker job");

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(Arc::clone(&shutdown));

    let health_port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let needs_embedder = job_type == "embedder";
    tokio::spawn(run_health_server(health_port, needs_embedder));

    let pool = db::init_pool(&settings.database)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    db::apply_schema(&pool)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let cache = Cache::new(settings.cache.redis_url.clone());

    let result = match job_type.as_str() {
        "collector" => run_collector_job(&settings, &pool, &cache).await,
        "embedder" => run_embedder_job(&settings, &pool, &cache, Arc::clone(&shutdown)).await,
        "janitor" => run_janitor_job(&settings, &pool).await,
        "reco_flush" => run_reco_flush_job(&settings, &pool, &cache).await,
        other => Err(gitmatch::AppError::InvalidInput(format!(
            "unknown job type: {}",
            other
        ))),
    };

    embedding::close_embedder();

    match result {
        Ok(report) => {
            tracing::info!(job_type, result = %report, "job completed");
            Ok(())
        }
        Err(e) => {
            tracing::error!(job_type, error = %e, "job failed");
            std::process::exit(1);
        }
    }
}

fn spawn_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.ok();
        };

        #[cfg(unix)]
        let terminate = async {
            if let Ok(mut signal) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                signal.recv().await;
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        tracing::info!("shutdown signal received");
        shutdown.store(true, Ordering::SeqCst);
    });
}

// ============= Health =============

async fn run_health_server(port: u16, needs_embedder: bool) {
    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(needs_embedder);

    let addr = format!("0.0.0.0:{}", port);
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            tracing::info!(port, "health server listening");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "health server exited");
            }
        }
        Err(e) => tracing::error!(error = %e, port, "health server bind failed"),
    }
}

/// 200 iff the process is live and, for embedder jobs, a probe embed
/// produces a vector of the expected dimension.
async fn health_check(
    State(needs_embedder): State<bool>,
) -> (StatusCode, Json<serde_json::Value>) {
    if !needs_embedder {
        return (StatusCode::OK, Json(serde_json::json!({"status": "ok"})));
    }

    match embedding::embed_query("health check").await {
        Some(vector) if vector.len() == EMBEDDING_DIM => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "ok", "embedding_dim": EMBEDDING_DIM})),
        ),
        Some(vector) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "error",
                "detail": format!("expected {}-dim, got {}-dim", EMBEDDING_DIM, vector.len()),
            })),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "error", "detail": "embedder unavailable"})),
        ),
    }
}

// ============= Jobs =============

/// Collector: discover repositories, fan out tasks, harvest this hour's
/// shard, stage and publish the gated issues.
async fn run_collector_job(
    settings: &Settings,
    pool: &sqlx::PgPool,
    cache: &Cache,
) -> gitmatch::Result<serde_json::Value> {
    let client = GitHubClient::new(&settings.github)?;
    let scout = Scout::new(&client, &settings.ingestion);

    let repos = scout.discover_repositories().await?;
    if repos.is_empty() {
        tracing::warn!("no repositories discovered; skipping ingestion");
        return Ok(serde_json::json!({"repos_discovered": 0, "issues_published": 0}));
    }

    // Repositories are persisted first: issues reference them by FK.
    let repos_upserted = persistence::upsert_repositories(pool, &repos).await?;

    let broker: Arc<dyn MessageBroker> = Arc::new(RedisStreamBroker::new(cache.clone()));
    let repo_stats = RepoProducer::new(Arc::clone(&broker), &settings.ingestion)
        .publish_repos(&repos)
        .await?;

    // This run only visits the current UTC hour's shard; over 24 hourly
    // runs every repository is visited exactly once.
    let hour = chrono::Utc::now().hour();
    let shard = filter_shard(repos.clone(), hour);
    tracing::info!(
        hour,
        shard_size = shard.len(),
        total = repos.len(),
        "shard selected"
    );

    let gatherer = Gatherer::new(client, &settings.ingestion);
    let mut harvested = gatherer.harvest_issues(shard);

    // Stage each gated issue before it enters the broker, then forward it
    // to the bounded publisher.
    let (staged_tx, staged_rx) = mpsc::channel(256);
    let staging_pool = pool.clone();
    let staging = tokio::spawn(async move {
        let mut staged = 0usize;
        while let Some(record) = harvested.recv().await {
            if let Err(e) = persistence::stage_pending(&staging_pool, &record).await {
                tracing::warn!(node_id = %record.node_id, error = %e, "staging write failed");
            } else {
                staged += 1;
            }
            if staged_tx.send(record).await.is_err() {
                break;
            }
        }
        staged
    });

    let issue_stats = IssueProducer::new(broker, &settings.ingestion)
        .publish_stream(staged_rx)
        .await?;
    let staged = staging.await.unwrap_or(0);

    Ok(serde_json::json!({
        "repos_discovered": repos.len(),
        "repos_upserted": repos_upserted,
        "repo_tasks_published": repo_stats.published,
        "issues_staged": staged,
        "issues_published": issue_stats.published,
        "issues_deduped": issue_stats.deduped,
        "issues_failed": issue_stats.failed,
    }))
}

/// Embedder: warm the model, then consume the issue topic until shutdown.
async fn run_embedder_job(
    settings: &Settings,
    pool: &sqlx::PgPool,
    cache: &Cache,
    shutdown: Arc<AtomicBool>,
) -> gitmatch::Result<serde_json::Value> {
    tracing::info!("warming embedding model");
    let embedder = embedding::get_embedder().await?;
    if embedder.embed("warmup").await.is_none() {
        return Err(gitmatch::AppError::Internal(
            "embedder warmup failed".to_string(),
        ));
    }

    let broker = Arc::new(RedisStreamBroker::new(cache.clone()));
    let consumer = format!("embedder-{}", std::process::id());
    let worker = EmbedderWorker::new(
        broker,
        DbIssueProcessor::new(pool.clone()),
        &settings.ingestion,
        consumer,
        shutdown,
    );

    let stats = worker.run().await?;
    Ok(serde_json::json!({
        "embedded": stats.embedded,
        "skipped": stats.skipped,
        "nacked": stats.nacked,
    }))
}

/// Janitor: percentile prune plus staging sweep.
async fn run_janitor_job(
    settings: &Settings,
    pool: &sqlx::PgPool,
) -> gitmatch::Result<serde_json::Value> {
    let janitor = Janitor::new(pool.clone(), settings.ingestion.janitor_min_issues);
    let report = janitor.execute_pruning().await?;
    let swept = janitor.sweep_staging().await?;

    Ok(serde_json::json!({
        "deleted_count": report.deleted_count,
        "remaining_count": report.remaining_count,
        "staging_swept": swept,
    }))
}

/// Flush queued recommendation events into the analytics table.
async fn run_reco_flush_job(
    settings: &Settings,
    pool: &sqlx::PgPool,
    cache: &Cache,
) -> gitmatch::Result<serde_json::Value> {
    let report = run_flush_job(pool, cache, &settings.events).await?;
    Ok(serde_json::json!({
        "loops": report.loops,
        "popped": report.popped,
        "inserted": report.inserted,
    }))
}
