//! Transactional persistence for the ingestion pipeline.
//!
//! Repositories and issues are upserted by `node_id`; issue writes set the
//! full scoring and embedding state in one statement so a row is never
//! half-updated. The staging table gives the collector a durable record of
//! work in flight; the embedder promotes rows and the sweeper ages them out.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;

use crate::ingestion::{IssueRecord, RepositoryTask};
use crate::types::Result;

/// Prior content state of a persisted issue, used for idempotency checks.
#[derive(Debug, sqlx::FromRow)]
pub struct StoredContent {
    pub content_hash: String,
    pub has_embedding: bool,
}

/// Upsert a batch of repositories discovered by Scout. Returns rows written.
pub async fn upsert_repositories(pool: &PgPool, repos: &[RepositoryTask]) -> Result<u64> {
    let mut written = 0u64;

    for repo in repos {
        let result = sqlx::query(
            r#"
            INSERT INTO ingestion.repository
                (node_id, full_name, primary_language, stargazer_count, topics, last_scraped_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (node_id) DO UPDATE SET
                full_name = EXCLUDED.full_name,
                primary_language = EXCLUDED.primary_language,
                stargazer_count = EXCLUDED.stargazer_count,
                topics = EXCLUDED.topics,
                last_scraped_at = now()
            "#,
        )
        .bind(&repo.node_id)
        .bind(&repo.full_name)
        .bind(&repo.primary_language)
        .bind(repo.stargazer_count)
        .bind(&repo.topics)
        .execute(pool)
        .await?;

        written += result.rows_affected();
    }

    Ok(written)
}

/// Look up the stored content hash and embedding presence for an issue.
pub async fn fetch_content_state(pool: &PgPool, node_id: &str) -> Result<Option<StoredContent>> {
    let row = sqlx::query_as::<_, StoredContent>(
        r#"
        SELECT content_hash, (embedding IS NOT NULL) AS has_embedding
        FROM ingestion.issue
        WHERE node_id = $1
        "#,
    )
    .bind(node_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Upsert an issue with its freshly computed embedding.
///
/// Sets state, Q-components, scores, hash, and `ingested_at = now()` in one
/// statement; survival equals q_score at ingest time (age zero).
pub async fn upsert_issue(pool: &PgPool, record: &IssueRecord, embedding: Vector) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ingestion.issue
            (node_id, repo_id, title, body_text, labels, state,
             has_code, has_template_headers, tech_stack_weight,
             q_score, survival_score, content_hash, embedding,
             github_created_at, ingested_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10, $11, $12, $13, now())
        ON CONFLICT (node_id) DO UPDATE SET
            repo_id = EXCLUDED.repo_id,
            title = EXCLUDED.title,
            body_text = EXCLUDED.body_text,
            labels = EXCLUDED.labels,
            state = EXCLUDED.state,
            has_code = EXCLUDED.has_code,
            has_template_headers = EXCLUDED.has_template_headers,
            tech_stack_weight = EXCLUDED.tech_stack_weight,
            q_score = EXCLUDED.q_score,
            survival_score = EXCLUDED.survival_score,
            content_hash = EXCLUDED.content_hash,
            embedding = EXCLUDED.embedding,
            github_created_at = EXCLUDED.github_created_at,
            ingested_at = now()
        "#,
    )
    .bind(&record.node_id)
    .bind(&record.repo_id)
    .bind(&record.title)
    .bind(&record.body_text)
    .bind(&record.labels)
    .bind(record.state.as_str())
    .bind(record.q_components.has_code)
    .bind(record.q_components.has_template_headers)
    .bind(record.q_components.tech_stack_weight)
    .bind(record.q_score)
    .bind(&record.content_hash)
    .bind(embedding)
    .bind(record.github_created_at)
    .execute(pool)
    .await?;

    Ok(())
}

// ============= Staging =============

/// A claimed staging row.
#[derive(Debug, sqlx::FromRow)]
pub struct PendingRow {
    pub node_id: String,
    pub repo_id: String,
    pub title: String,
    pub body_text: String,
    pub labels: Vec<String>,
    pub github_created_at: DateTime<Utc>,
    pub content_hash: String,
    pub attempts: i32,
}

/// Record a gated issue in the staging table before fan-out.
pub async fn stage_pending(pool: &PgPool, record: &IssueRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO staging.pending_issue
            (node_id, repo_id, title, body_text, labels, github_created_at,
             has_code, has_template_headers, tech_stack_weight, q_score,
             state, content_hash, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'pending')
        ON CONFLICT (node_id) DO UPDATE SET
            title = EXCLUDED.title,
            body_text = EXCLUDED.body_text,
            labels = EXCLUDED.labels,
            q_score = EXCLUDED.q_score,
            state = EXCLUDED.state,
            content_hash = EXCLUDED.content_hash,
            status = 'pending',
            attempts = 0
        "#,
    )
    .bind(&record.node_id)
    .bind(&record.repo_id)
    .bind(&record.title)
    .bind(&record.body_text)
    .bind(&record.labels)
    .bind(record.github_created_at)
    .bind(record.q_components.has_code)
    .bind(record.q_components.has_template_headers)
    .bind(record.q_components.tech_stack_weight)
    .bind(record.q_score)
    .bind(record.state.as_str())
    .bind(&record.content_hash)
    .execute(pool)
    .await?;

    Ok(())
}

/// Claim a batch of pending rows for processing. Uses SKIP LOCKED so
/// concurrent workers never claim the same row.
pub async fn claim_pending_batch(pool: &PgPool, limit: i64) -> Result<Vec<PendingRow>> {
    let rows = sqlx::query_as::<_, PendingRow>(
        r#"
        UPDATE staging.pending_issue
        SET status = 'processing', attempts = attempts + 1
        WHERE node_id IN (
            SELECT node_id FROM staging.pending_issue
            WHERE status = 'pending'
            ORDER BY created_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING node_id, repo_id, title, body_text, labels,
                  github_created_at, content_hash, attempts
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Mark a staged row completed after its issue was promoted.
pub async fn mark_pending_completed(pool: &PgPool, node_id: &str) -> Result<()> {
    sqlx::query("UPDATE staging.pending_issue SET status = 'completed' WHERE node_id = $1")
        .bind(node_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a staged row failed; it stays for inspection until swept.
pub async fn mark_pending_failed(pool: &PgPool, node_id: &str) -> Result<()> {
    sqlx::query("UPDATE staging.pending_issue SET status = 'failed' WHERE node_id = $1")
        .bind(node_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete completed staging rows older than the given age. Returns rows
/// removed.
pub async fn sweep_completed(pool: &PgPool, older_than_hours: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM staging.pending_issue
        WHERE status = 'completed'
          AND created_at < now() - ($1 * interval '1 hour')
        "#,
    )
    .bind(older_than_hours)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
