//! Flush job: drains the event queue into the analytics table.
//!
//! Pops up to `flush_batch_size` events per loop and bulk-inserts them with
//! `ON CONFLICT (event_id) DO NOTHING`, so redelivered events are idempotent
//! at the warehouse. Terminates when the queue is empty or the time budget
//! elapses.

use std::time::Instant;

use serde::Serialize;
use sqlx::PgPool;

use crate::db::Cache;
use crate::events::{QueuedEvent, RECO_EVENTS_QUEUE_KEY};
use crate::types::Result;
use crate::utils::config::EventSettings;

/// Counters for one flush run.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct FlushReport {
    pub loops: u32,
    pub popped: u64,
    pub inserted: u64,
}

/// One pop-and-insert pass. Returns (popped, inserted).
pub async fn flush_queue_once(
    pool: &PgPool,
    cache: &Cache,
    batch_size: usize,
) -> Result<(u64, u64)> {
    let raw_events = cache.lpop_batch(RECO_EVENTS_QUEUE_KEY, batch_size).await?;
    if raw_events.is_empty() {
        return Ok((0, 0));
    }

    let popped = raw_events.len() as u64;
    let mut inserted = 0u64;

    let mut tx = pool.begin().await?;
    for raw in &raw_events {
        let event: QueuedEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "dropping undecodable queued event");
                continue;
            }
        };

        let result = sqlx::query(
            r#"
            INSERT INTO analytics.recommendation_events
                (event_id, user_id, recommendation_batch_id, event_type,
                 issue_node_id, position, surface, is_personalized,
                 created_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id)
        .bind(event.user_id)
        .bind(event.recommendation_batch_id)
        .bind(&event.event_type)
        .bind(&event.issue_node_id)
        .bind(event.position)
        .bind(&event.surface)
        .bind(event.is_personalized)
        .bind(event.created_at)
        .bind(&event.metadata)
        .execute(&mut *tx)
        .await?;

        inserted += result.rows_affected();
    }
    tx.commit().await?;

    Ok((popped, inserted))
}

/// Run the flush job within its time budget.
pub async fn run_flush_job(
    pool: &PgPool,
    cache: &Cache,
    settings: &EventSettings,
) -> Result<FlushReport> {
    let started = Instant::now();
    let mut report = FlushReport::default();

    loop {
        report.loops += 1;
        let (popped, inserted) = flush_queue_once(pool, cache, settings.flush_batch_size).await?;
        report.popped += popped;
        report.inserted += inserted;

        if popped == 0 {
            break;
        }
        if started.elapsed().as_secs() >= settings.flush_max_seconds {
            tracing::info!(
                elapsed_secs = started.elapsed().as_secs(),
                "flush time budget elapsed"
            );
            break;
        }
    }

    tracing::info!(
        loops = report.loops,
        popped = report.popped,
        inserted = report.inserted,
        "recommendation event flush complete"
    );
    Ok(report)
}
