//! Issue detail and similar-issue lookups.
//!
//! Detail views return the issue regardless of state (deep links to closed
//! issues stay valid); similarity queries participate only with open,
//! embedded rows above a minimum similarity.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::types::Result;

/// Minimum cosine similarity to include in similar-issue results.
pub const MIN_SIMILARITY_THRESHOLD: f64 = 0.3;
pub const DEFAULT_SIMILAR_LIMIT: i64 = 5;
pub const MAX_SIMILAR_LIMIT: i64 = 10;

/// Full issue detail with repository metadata.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct IssueDetail {
    pub node_id: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub q_score: f32,
    pub repo_name: String,
    pub repo_url: String,
    pub github_url: String,
    pub primary_language: Option<String>,
    pub github_created_at: DateTime<Utc>,
    pub state: String,
}

/// A similar issue with its similarity score.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct SimilarIssue {
    pub node_id: String,
    pub title: String,
    pub repo_name: String,
    pub similarity_score: f64,
}

/// Fetch one issue by node_id, any state.
pub async fn get_issue_by_node_id(pool: &PgPool, node_id: &str) -> Result<Option<IssueDetail>> {
    let detail = sqlx::query_as::<_, IssueDetail>(
        r#"
        SELECT
            i.node_id,
            i.title,
            i.body_text AS body,
            i.labels,
            i.q_score,
            r.full_name AS repo_name,
            'https://github.com/' || r.full_name AS repo_url,
            'https://github.com/' || r.full_name || '/issues/' ||
                SUBSTRING(i.node_id FROM '[0-9]+$') AS github_url,
            r.primary_language,
            i.github_created_at,
            i.state
        FROM ingestion.issue i
        JOIN ingestion.repository r ON i.repo_id = r.node_id
        WHERE i.node_id = $1
        "#,
    )
    .bind(node_id)
    .fetch_optional(pool)
    .await?;

    Ok(detail)
}

/// Top-K open issues similar to the given one.
///
/// Returns `None` when the source issue does not exist; an empty list when
/// the source has no embedding yet or nothing clears the similarity
/// threshold.
pub async fn get_similar_issues(
    pool: &PgPool,
    node_id: &str,
    limit: i64,
) -> Result<Option<Vec<SimilarIssue>>> {
    let limit = if limit < 1 {
        DEFAULT_SIMILAR_LIMIT
    } else {
        limit.min(MAX_SIMILAR_LIMIT)
    };

    let source: Option<(Option<pgvector::Vector>,)> =
        sqlx::query_as("SELECT embedding FROM ingestion.issue WHERE node_id = $1")
            .bind(node_id)
            .fetch_optional(pool)
            .await?;

    let Some((embedding,)) = source else {
        return Ok(None);
    };
    let Some(embedding) = embedding else {
        tracing::info!(node_id, "issue has no embedding yet; empty similar list");
        return Ok(Some(Vec::new()));
    };

    let similar = sqlx::query_as::<_, SimilarIssue>(
        r#"
        SELECT
            i.node_id,
            i.title,
            r.full_name AS repo_name,
            (1 - (i.embedding <=> $2))::float8 AS similarity_score
        FROM ingestion.issue i
        JOIN ingestion.repository r ON i.repo_id = r.node_id
        WHERE i.node_id != $1
          AND i.embedding IS NOT NULL
          AND i.state = 'open'
          AND 1 - (i.embedding <=> $2) >= $3
        ORDER BY i.embedding <=> $2
        LIMIT $4
        "#,
    )
    .bind(node_id)
    .bind(&embedding)
    .bind(MIN_SIMILARITY_THRESHOLD)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(Some(similar))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similar_limit_clamps() {
        // Mirrors the clamp applied inside get_similar_issues.
        let clamp = |limit: i64| {
            if limit < 1 {
                DEFAULT_SIMILAR_LIMIT
            } else {
                limit.min(MAX_SIMILAR_LIMIT)
            }
        };
        assert_eq!(clamp(0), DEFAULT_SIMILAR_LIMIT);
        assert_eq!(clamp(-3), DEFAULT_SIMILAR_LIMIT);
        assert_eq!(clamp(7), 7);
        assert_eq!(clamp(100), MAX_SIMILAR_LIMIT);
    }
}
