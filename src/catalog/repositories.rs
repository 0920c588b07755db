//! Repository listing with language and substring filters.

use serde::Serialize;
use sqlx::PgPool;

use crate::types::Result;

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 100;

/// Repository summary with its open-issue count.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct RepositoryItem {
    /// Full name like "rust-lang/rust".
    pub name: String,
    pub primary_language: Option<String>,
    pub issue_count: i64,
}

/// Escape `%`, `_`, and `\` so LIKE/ILIKE treats the input literally.
pub fn escape_like_pattern(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// List repositories ordered by stars, optionally filtered by language
/// (case-insensitive equality) and a name substring (wildcards escaped).
pub async fn list_repositories(
    pool: &PgPool,
    language: Option<&str>,
    search_query: Option<&str>,
    limit: i64,
) -> Result<Vec<RepositoryItem>> {
    let limit = if limit < 1 {
        DEFAULT_LIMIT
    } else {
        limit.min(MAX_LIMIT)
    };

    let search_pattern = search_query
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{}%", escape_like_pattern(q)));

    let rows = sqlx::query_as::<_, RepositoryItem>(
        r#"
        SELECT
            r.full_name AS name,
            r.primary_language,
            COALESCE(ic.issue_count, 0) AS issue_count
        FROM ingestion.repository r
        LEFT JOIN (
            SELECT repo_id, COUNT(*) AS issue_count
            FROM ingestion.issue
            WHERE state = 'open'
            GROUP BY repo_id
        ) ic ON ic.repo_id = r.node_id
        WHERE ($1::text IS NULL OR LOWER(r.primary_language) = LOWER($1))
          AND ($2::text IS NULL OR r.full_name ILIKE $2 ESCAPE '\')
        ORDER BY r.stargazer_count DESC, r.full_name ASC
        LIMIT $3
        "#,
    )
    .bind(language)
    .bind(search_pattern)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_escaping_covers_wildcards() {
        assert_eq!(escape_like_pattern("100%"), "100\\%");
        assert_eq!(escape_like_pattern("under_score"), "under\\_score");
        assert_eq!(escape_like_pattern("back\\slash"), "back\\\\slash");
        assert_eq!(escape_like_pattern("plain"), "plain");
        // Backslash is escaped before the other characters so it never
        // double-escapes their escapes.
        assert_eq!(escape_like_pattern("\\%"), "\\\\\\%");
    }
}
