//! PostgreSQL pool setup.
//!
//! The store requires the pgvector extension: vector columns use the
//! `vector(768)` type with the cosine-distance operator, and the issue table
//! maintains a generated tsvector column for lexical search. All DDL lives in
//! `schema.sql` and is applied idempotently at startup.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::types::Result;
use crate::utils::config::DatabaseSettings;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Connect a pool with short acquire timeouts; sessions are checked out per
/// request or per batch and returned on all exit paths.
pub async fn init_pool(settings: &DatabaseSettings) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&settings.url)
        .await?;

    tracing::info!(max_connections = settings.max_connections, "database pool initialized");
    Ok(pool)
}

/// Apply the idempotent DDL (`CREATE ... IF NOT EXISTS`).
pub async fn apply_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    tracing::info!("database schema applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_covers_all_layouts() {
        assert!(SCHEMA_SQL.contains("ingestion.repository"));
        assert!(SCHEMA_SQL.contains("ingestion.issue"));
        assert!(SCHEMA_SQL.contains("staging.pending_issue"));
        assert!(SCHEMA_SQL.contains("analytics.search_interactions"));
        assert!(SCHEMA_SQL.contains("analytics.recommendation_events"));
        assert!(SCHEMA_SQL.contains("vector(768)"));
        assert!(SCHEMA_SQL.contains("ix_issue_survival_vacuum"));
        assert!(SCHEMA_SQL.contains("GENERATED ALWAYS AS"));
    }
}
