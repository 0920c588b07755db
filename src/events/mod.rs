//! Recommendation event capture: at-least-once impressions and clicks.
//!
//! Serving a feed page stores a short-TTL batch context (the ordered issue
//! ids served). Clients post events against that context; each event is
//! position-validated, deduplicated on `event_id` with a SETNX-style key,
//! and appended to a single queue for the flush job. Cache unavailability
//! surfaces as 503 — event capture cannot degrade silently.

pub mod flush;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Cache;
use crate::types::Result;
use crate::utils::config::EventSettings;

/// Single queue key drained by the flush job.
pub const RECO_EVENTS_QUEUE_KEY: &str = "reco:events:queue";

/// Event types accepted from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Impression,
    Click,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Impression => "impression",
            EventType::Click => "click",
        }
    }
}

/// Surfaces an event can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Feed,
    Search,
    Email,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Feed => "feed",
            Surface::Search => "search",
            Surface::Email => "email",
        }
    }
}

/// Cached mapping from a batch id to the issues served in that response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationBatchContext {
    pub recommendation_batch_id: Uuid,
    pub issue_node_ids: Vec<String>,
    pub page: i64,
    pub page_size: i64,
    pub is_personalized: bool,
    pub served_at: DateTime<Utc>,
}

/// One client-submitted event.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct RecommendationEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub issue_node_id: String,
    pub position: i64,
    pub surface: Surface,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// The queued wire form consumed by the flush job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub recommendation_batch_id: Uuid,
    pub event_type: String,
    pub issue_node_id: String,
    pub position: i64,
    pub surface: String,
    pub is_personalized: bool,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Counters returned from one submission.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq, utoipa::ToSchema)]
pub struct EnqueueOutcome {
    pub queued: u32,
    pub deduped: u32,
}

pub fn generate_recommendation_batch_id() -> Uuid {
    Uuid::new_v4()
}

fn batch_context_key(batch_id: Uuid) -> String {
    format!("reco:batch:{}", batch_id)
}

fn dedup_key(event_id: Uuid) -> String {
    format!("reco:event:{}", event_id)
}

/// Store the batch context at serve time. Best-effort: a failure only
/// disables event capture for this batch and is logged.
pub async fn store_batch_context(
    cache: &Cache,
    settings: &EventSettings,
    context: &RecommendationBatchContext,
) -> bool {
    match cache
        .set_json(
            &batch_context_key(context.recommendation_batch_id),
            context,
            settings.batch_context_ttl_secs,
        )
        .await
    {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                error = %e,
                batch_id = %context.recommendation_batch_id,
                "batch context store failed"
            );
            false
        }
    }
}

/// Load a batch context. Cache errors propagate (the caller maps them to
/// 503); a missing context is `None` (404).
pub async fn get_batch_context(
    cache: &Cache,
    batch_id: Uuid,
) -> Result<Option<RecommendationBatchContext>> {
    cache.get_json(&batch_context_key(batch_id)).await
}

/// An event is acceptable iff the served issue at its position matches.
pub fn validate_event_against_context(
    context: &RecommendationBatchContext,
    issue_node_id: &str,
    position: i64,
) -> bool {
    if position < 0 {
        return false;
    }
    context
        .issue_node_ids
        .get(position as usize)
        .is_some_and(|served| served.as_str() == issue_node_id)
}

/// Validate, dedup, and enqueue a batch of events.
///
/// Position mismatches are dropped silently with a counter increment; a
/// duplicate `event_id` counts as deduped and is skipped.
pub async fn enqueue_events(
    cache: &Cache,
    settings: &EventSettings,
    user_id: Uuid,
    context: &RecommendationBatchContext,
    events: &[RecommendationEvent],
) -> Result<EnqueueOutcome> {
    let mut outcome = EnqueueOutcome::default();
    let mut dropped = 0u32;

    for event in events {
        if !validate_event_against_context(context, &event.issue_node_id, event.position) {
            dropped += 1;
            continue;
        }

        let newly_set = cache
            .set_nx_ex(&dedup_key(event.event_id), "1", settings.dedup_ttl_secs)
            .await?;
        if !newly_set {
            outcome.deduped += 1;
            continue;
        }

        let queued = QueuedEvent {
            event_id: event.event_id,
            user_id,
            recommendation_batch_id: context.recommendation_batch_id,
            event_type: event.event_type.as_str().to_string(),
            issue_node_id: event.issue_node_id.clone(),
            position: event.position,
            surface: event.surface.as_str().to_string(),
            is_personalized: context.is_personalized,
            created_at: Utc::now(),
            metadata: event.metadata.clone(),
        };

        let payload = serde_json::to_string(&queued)
            .map_err(|e| crate::types::AppError::Internal(format!("event encode: {}", e)))?;
        cache.rpush(RECO_EVENTS_QUEUE_KEY, &payload).await?;
        outcome.queued += 1;
    }

    if dropped > 0 {
        tracing::warn!(
            dropped,
            batch_id = %context.recommendation_batch_id,
            "events dropped on position mismatch"
        );
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(ids: &[&str]) -> RecommendationBatchContext {
        RecommendationBatchContext {
            recommendation_batch_id: Uuid::new_v4(),
            issue_node_ids: ids.iter().map(|s| s.to_string()).collect(),
            page: 1,
            page_size: 20,
            is_personalized: true,
            served_at: Utc::now(),
        }
    }

    #[test]
    fn validation_requires_position_and_id_agreement() {
        let ctx = context(&["x", "y", "z"]);
        assert!(validate_event_against_context(&ctx, "y", 1));
        assert!(!validate_event_against_context(&ctx, "y", 2));
        assert!(!validate_event_against_context(&ctx, "y", 3));
        assert!(!validate_event_against_context(&ctx, "y", -1));
        assert!(!validate_event_against_context(&ctx, "missing", 0));
    }

    #[test]
    fn batch_context_round_trips_through_json() {
        let ctx = context(&["a", "b"]);
        let raw = serde_json::to_string(&ctx).unwrap();
        let back: RecommendationBatchContext = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.issue_node_ids, vec!["a", "b"]);
        assert!(back.is_personalized);
        assert_eq!(back.recommendation_batch_id, ctx.recommendation_batch_id);
    }

    #[test]
    fn event_enums_serialize_lowercase() {
        assert_eq!(
            serde_json::to_value(EventType::Impression).unwrap(),
            serde_json::json!("impression")
        );
        assert_eq!(
            serde_json::to_value(Surface::Email).unwrap(),
            serde_json::json!("email")
        );

        let event: RecommendationEvent = serde_json::from_value(serde_json::json!({
            "event_id": Uuid::new_v4().to_string(),
            "event_type": "click",
            "issue_node_id": "I_1",
            "position": 0,
            "surface": "feed"
        }))
        .unwrap();
        assert_eq!(event.event_type, EventType::Click);
        assert_eq!(event.surface, Surface::Feed);
        assert!(event.metadata.is_none());
    }
}
