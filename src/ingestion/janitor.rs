//! Janitor: set-based pruning of the lowest-survival issues.
//!
//! Deletes the bottom 20% of issues by `survival_score` with a single
//! indexed DELETE. Survival scores are pre-calculated during ingestion, so
//! no refresh step is needed; the statement leans on the
//! `ix_issue_survival_vacuum (survival_score, ingested_at)` composite index.

use serde::Serialize;
use sqlx::PgPool;

use crate::types::Result;

/// Fraction of rows pruned per run.
pub const PRUNE_PERCENTILE: f64 = 0.2;

/// How long completed staging rows are retained before sweeping.
const STAGING_RETENTION_HOURS: i64 = 24;

/// Result of one pruning pass.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct JanitorReport {
    pub deleted_count: u64,
    pub remaining_count: i64,
}

pub struct Janitor {
    pool: PgPool,
    min_issues: i64,
}

impl Janitor {
    pub fn new(pool: PgPool, min_issues: i64) -> Self {
        Self { pool, min_issues }
    }

    /// Delete all issues below the 20th percentile of survival score,
    /// provided the table holds at least `janitor_min_issues` rows.
    pub async fn execute_pruning(&self) -> Result<JanitorReport> {
        let before = self.count_issues().await?;

        if before < self.min_issues {
            tracing::info!(
                row_count = before,
                min_count = self.min_issues,
                "janitor skipping prune below minimum row count"
            );
            return Ok(JanitorReport {
                deleted_count: 0,
                remaining_count: before,
            });
        }

        let result = sqlx::query(
            r#"
            DELETE FROM ingestion.issue
            WHERE survival_score < (
                SELECT PERCENTILE_CONT($1) WITHIN GROUP (ORDER BY survival_score)
                FROM ingestion.issue
            )
            "#,
        )
        .bind(PRUNE_PERCENTILE)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        let remaining = self.count_issues().await?;

        tracing::info!(
            deleted_count = deleted,
            remaining_count = remaining,
            "janitor prune complete"
        );

        Ok(JanitorReport {
            deleted_count: deleted,
            remaining_count: remaining,
        })
    }

    /// Age out completed staging rows. Returns rows swept.
    pub async fn sweep_staging(&self) -> Result<u64> {
        let swept =
            crate::ingestion::persistence::sweep_completed(&self.pool, STAGING_RETENTION_HOURS)
                .await?;
        if swept > 0 {
            tracing::info!(swept, "staging sweep complete");
        }
        Ok(swept)
    }

    async fn count_issues(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ingestion.issue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
