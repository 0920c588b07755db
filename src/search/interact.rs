//! Search context persistence and click capture.
//!
//! Every search response persists a short-TTL context keyed by a freshly
//! minted `search_id`. A later `interact` call validates the clicked
//! position against that context and inserts a `SearchInteraction` row.
//! The insert is best-effort telemetry: database failures are logged and
//! reported to the client as success.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::Cache;
use crate::search::models::SearchRequest;
use crate::types::{AppError, Result};
use crate::utils::audit::{log_audit_event, AuditEvent};
use crate::utils::config::SearchSettings;

/// Cached context for one search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchContext {
    pub query_text: String,
    pub filters_json: serde_json::Value,
    pub result_count: i64,
    pub page: i64,
    pub page_size: i64,
}

fn context_key(search_id: Uuid) -> String {
    format!("search:context:{}", search_id)
}

/// Persist the context for a search response. Best-effort: a cache failure
/// only disables later interaction capture for this search.
pub async fn store_search_context(
    cache: &Cache,
    settings: &SearchSettings,
    search_id: Uuid,
    request: &SearchRequest,
    result_count: i64,
) {
    let context = SearchContext {
        query_text: request.query.clone(),
        filters_json: serde_json::to_value(&request.filters).unwrap_or(serde_json::Value::Null),
        result_count,
        page: request.page,
        page_size: request.page_size,
    };

    if let Err(e) = cache
        .set_json(&context_key(search_id), &context, settings.context_ttl_secs)
        .await
    {
        tracing::debug!(error = %e, %search_id, "search context store skipped");
    }
}

/// Fetch a cached search context.
pub async fn get_search_context(cache: &Cache, search_id: Uuid) -> Result<Option<SearchContext>> {
    cache.get_json(&context_key(search_id)).await
}

/// Validate and record a search click.
///
/// `position` is zero-indexed within the served page: it must be below both
/// the page size and the result count. Unknown `search_id` is 404;
/// out-of-range position is 400; an insert failure is swallowed after
/// logging (best-effort telemetry).
pub async fn record_interaction(
    pool: &PgPool,
    cache: &Cache,
    user_id: Option<Uuid>,
    search_id: Uuid,
    selected_node_id: &str,
    position: i64,
) -> Result<()> {
    let context = get_search_context(cache, search_id)
        .await?
        .ok_or_else(|| AppError::NotFound("search context not found".to_string()))?;

    let position_bound = context.page_size.min(context.result_count);
    if position < 0 || position >= position_bound {
        return Err(AppError::InvalidInput(format!(
            "position {} out of range (bound {})",
            position, position_bound
        )));
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO analytics.search_interactions
            (search_id, user_id, query_text, filters_json, result_count,
             selected_node_id, position)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(search_id)
    .bind(user_id)
    .bind(&context.query_text)
    .bind(&context.filters_json)
    .bind(context.result_count)
    .bind(selected_node_id)
    .bind(position)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => {
            log_audit_event(
                AuditEvent::SearchInteraction,
                user_id,
                Some(serde_json::json!({
                    "search_id": search_id.to_string(),
                    "position": position,
                })),
            );
        }
        Err(e) => {
            tracing::error!(error = %e, %search_id, "search interaction insert failed");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(result_count: i64, page: i64, page_size: i64) -> SearchContext {
        SearchContext {
            query_text: "python error".to_string(),
            filters_json: serde_json::json!({"languages": [], "labels": [], "repos": []}),
            result_count,
            page,
            page_size,
        }
    }

    fn validate(context: &SearchContext, position: i64) -> bool {
        let bound = context.page_size.min(context.result_count);
        position >= 0 && position < bound
    }

    #[test]
    fn position_must_fit_the_served_page() {
        let ctx = context(30, 2, 20);
        assert!(!validate(&ctx, 25));
        for position in 0..20 {
            assert!(validate(&ctx, position), "position {} should pass", position);
        }
        assert!(!validate(&ctx, -1));
    }

    #[test]
    fn position_bound_shrinks_with_short_result_sets() {
        let ctx = context(5, 1, 20);
        assert!(validate(&ctx, 4));
        assert!(!validate(&ctx, 5));
    }

    #[test]
    fn context_round_trips_through_json() {
        let ctx = context(100, 2, 20);
        let raw = serde_json::to_string(&ctx).unwrap();
        let back: SearchContext = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.result_count, 100);
        assert_eq!(back.page, 2);
        assert_eq!(back.query_text, "python error");
    }
}
