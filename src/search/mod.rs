//! Hybrid search engine: lexical ∪ vector candidate generation fused with
//! Reciprocal Rank Fusion, followed by an enrichment stage.
//!
//! Stage 1 runs a full-text subquery and (for queries of three or more
//! tokens whose embedding succeeded) a cosine-distance subquery, both
//! filter-constrained and capped at [`models::CANDIDATE_LIMIT`], then fuses
//! the two ranked lists. Stage 2 re-queries the requested page slice by id
//! and projects result items in exactly the fused order. Stage-1 results are
//! cached under a canonical request hash with a short TTL.

pub mod interact;
pub mod models;

use std::collections::HashMap;

use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::Cache;
use crate::embedding;
use crate::types::Result;
use crate::utils::audit::{log_audit_event, AuditEvent};
use crate::utils::config::SearchSettings;
use models::{
    SearchRequest, SearchResponse, SearchResultItem, Stage1Result, CANDIDATE_LIMIT, RRF_K,
};

/// Minimum whitespace tokens before the vector path is attempted.
const MIN_QUERY_TOKENS: usize = 3;

// ============= RRF Fusion =============

/// Fuse two 1-based ranked lists with Reciprocal Rank Fusion.
///
/// Each list contributes `1 / (k + rank)` per appearance; candidates are
/// ordered by fused score descending, ties broken by the smaller of the two
/// ranks, then by `node_id` ascending for determinism.
pub fn rrf_fuse(lexical: &[String], vector: &[String], k: f64) -> Vec<(String, f64)> {
    struct Candidate {
        score: f64,
        best_rank: usize,
    }

    let mut candidates: HashMap<&str, Candidate> = HashMap::new();

    for (index, node_id) in lexical.iter().enumerate() {
        let rank = index + 1;
        let entry = candidates.entry(node_id.as_str()).or_insert(Candidate {
            score: 0.0,
            best_rank: rank,
        });
        entry.score += 1.0 / (k + rank as f64);
        entry.best_rank = entry.best_rank.min(rank);
    }

    for (index, node_id) in vector.iter().enumerate() {
        let rank = index + 1;
        let entry = candidates.entry(node_id.as_str()).or_insert(Candidate {
            score: 0.0,
            best_rank: rank,
        });
        entry.score += 1.0 / (k + rank as f64);
        entry.best_rank = entry.best_rank.min(rank);
    }

    let mut fused: Vec<(String, f64, usize)> = candidates
        .into_iter()
        .map(|(node_id, c)| (node_id.to_string(), c.score, c.best_rank))
        .collect();

    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.2.cmp(&b.2))
            .then_with(|| a.0.cmp(&b.0))
    });

    fused.into_iter().map(|(id, score, _)| (id, score)).collect()
}

// ============= Stage 1 =============

/// Candidate generation: lexical and vector subqueries, fused.
async fn execute_stage1(
    pool: &PgPool,
    request: &SearchRequest,
    query_embedding: Option<&Vector>,
) -> Result<Stage1Result> {
    let filters = &request.filters;
    let languages: Vec<String> = filters
        .languages
        .iter()
        .map(|l| l.to_lowercase())
        .collect();

    let lexical: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT i.node_id
        FROM ingestion.issue i
        JOIN ingestion.repository r ON i.repo_id = r.node_id
        WHERE i.state = 'open'
          AND i.search_vector @@ plainto_tsquery('english', $1)
          AND (cardinality($2::text[]) = 0 OR LOWER(r.primary_language) = ANY($2))
          AND (cardinality($3::text[]) = 0 OR i.labels && $3)
          AND (cardinality($4::text[]) = 0 OR r.full_name = ANY($4))
        ORDER BY ts_rank(i.search_vector, plainto_tsquery('english', $1)) DESC
        LIMIT $5
        "#,
    )
    .bind(&request.query)
    .bind(&languages)
    .bind(&filters.labels)
    .bind(&filters.repos)
    .bind(CANDIDATE_LIMIT as i64)
    .fetch_all(pool)
    .await?;

    let vector: Vec<(String,)> = match query_embedding {
        Some(embedding) => {
            sqlx::query_as(
                r#"
                SELECT i.node_id
                FROM ingestion.issue i
                JOIN ingestion.repository r ON i.repo_id = r.node_id
                WHERE i.state = 'open'
                  AND i.embedding IS NOT NULL
                  AND (cardinality($2::text[]) = 0 OR LOWER(r.primary_language) = ANY($2))
                  AND (cardinality($3::text[]) = 0 OR i.labels && $3)
                  AND (cardinality($4::text[]) = 0 OR r.full_name = ANY($4))
                ORDER BY i.embedding <=> $1
                LIMIT $5
                "#,
            )
            .bind(embedding)
            .bind(&languages)
            .bind(&filters.labels)
            .bind(&filters.repos)
            .bind(CANDIDATE_LIMIT as i64)
            .fetch_all(pool)
            .await?
        }
        None => Vec::new(),
    };

    let is_capped = lexical.len() >= CANDIDATE_LIMIT || vector.len() >= CANDIDATE_LIMIT;

    let lexical_ids: Vec<String> = lexical.into_iter().map(|(id,)| id).collect();
    let vector_ids: Vec<String> = vector.into_iter().map(|(id,)| id).collect();

    let fused = rrf_fuse(&lexical_ids, &vector_ids, RRF_K);

    let mut node_ids = Vec::with_capacity(fused.len());
    let mut rrf_scores = HashMap::with_capacity(fused.len());
    for (node_id, score) in fused {
        rrf_scores.insert(node_id.clone(), score);
        node_ids.push(node_id);
    }
    node_ids.truncate(CANDIDATE_LIMIT);

    Ok(Stage1Result {
        total: node_ids.len() as i64,
        node_ids,
        rrf_scores,
        is_capped,
    })
}

// ============= Stage 2 =============

/// Enrichment: re-query the page slice by id, joined to repository, ordered
/// exactly by the Stage-1 fused order.
async fn execute_stage2(
    pool: &PgPool,
    page_ids: &[String],
    rrf_scores: &HashMap<String, f64>,
) -> Result<Vec<SearchResultItem>> {
    if page_ids.is_empty() {
        return Ok(Vec::new());
    }

    #[derive(sqlx::FromRow)]
    struct Stage2Row {
        node_id: String,
        title: String,
        body_preview: String,
        github_url: Option<String>,
        labels: Vec<String>,
        q_score: f32,
        repo_name: String,
        primary_language: Option<String>,
        github_created_at: chrono::DateTime<chrono::Utc>,
    }

    let rows: Vec<Stage2Row> = sqlx::query_as(
        r#"
        SELECT
            i.node_id,
            i.title,
            LEFT(i.body_text, 280) AS body_preview,
            'https://github.com/' || r.full_name || '/issues/' ||
                SUBSTRING(i.node_id FROM '[0-9]+$') AS github_url,
            i.labels,
            i.q_score,
            r.full_name AS repo_name,
            r.primary_language,
            i.github_created_at
        FROM ingestion.issue i
        JOIN ingestion.repository r ON i.repo_id = r.node_id
        WHERE i.node_id = ANY($1)
        "#,
    )
    .bind(page_ids)
    .fetch_all(pool)
    .await?;

    let mut by_id: HashMap<String, Stage2Row> =
        rows.into_iter().map(|r| (r.node_id.clone(), r)).collect();

    // Stage 2 never reorders: project in the fused order.
    let items = page_ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(|row| SearchResultItem {
            rrf_score: rrf_scores.get(&row.node_id).copied().unwrap_or(0.0),
            node_id: row.node_id,
            title: row.title,
            body_preview: row.body_preview,
            github_url: row.github_url,
            labels: row.labels,
            q_score: row.q_score,
            repo_name: row.repo_name,
            primary_language: row.primary_language,
            github_created_at: row.github_created_at,
        })
        .collect();

    Ok(items)
}

// ============= Orchestration =============

/// Execute a hybrid search end to end.
pub async fn hybrid_search(
    pool: &PgPool,
    cache: &Cache,
    settings: &SearchSettings,
    request: SearchRequest,
) -> Result<SearchResponse> {
    let request = request.clamped();

    // Vector path gate: short queries rarely embed into anything useful.
    let use_vector_path = request.query.split_whitespace().count() >= MIN_QUERY_TOKENS;
    let query_embedding = if use_vector_path {
        match embedding::embed_query(&request.query).await {
            Some(vector) => {
                embedding::assert_vector_dim(&vector)?;
                Some(Vector::from(vector))
            }
            None => None,
        }
    } else {
        None
    };

    let cache_key = format!(
        "search:stage1:{}",
        request.cache_key(request.user_id.is_some())
    );

    let stage1 = match cache.get_json::<Stage1Result>(&cache_key).await {
        Ok(Some(cached)) => cached,
        Ok(None) | Err(_) => {
            let computed = execute_stage1(pool, &request, query_embedding.as_ref()).await?;
            if let Err(e) = cache
                .set_json(&cache_key, &computed, settings.cache_ttl_secs)
                .await
            {
                tracing::debug!(error = %e, "stage1 cache write skipped");
            }
            computed
        }
    };

    let offset = request.offset();
    let end = (offset + request.page_size as usize).min(stage1.node_ids.len());
    let page_ids: &[String] = if offset < stage1.node_ids.len() {
        &stage1.node_ids[offset..end]
    } else {
        &[]
    };

    let results = execute_stage2(pool, page_ids, &stage1.rrf_scores).await?;

    let search_id = Uuid::new_v4();
    interact::store_search_context(
        cache,
        settings,
        search_id,
        &request,
        stage1.total,
    )
    .await;

    log_audit_event(
        AuditEvent::Search,
        request.user_id,
        Some(serde_json::json!({
            "query_len": request.query.len(),
            "result_count": stage1.total,
            "vector_path": query_embedding.is_some(),
        })),
    );

    Ok(SearchResponse {
        search_id,
        has_more: request.page * request.page_size < stage1.total,
        total: stage1.total,
        total_is_capped: stage1.is_capped,
        page: request.page,
        page_size: request.page_size,
        results,
        query: request.query,
        filters: request.filters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rrf_fusion_matches_reference_example() {
        // Lexical ranks A=1, B=2; vector ranks B=1, C=2.
        let fused = rrf_fuse(&ids(&["A", "B"]), &ids(&["B", "C"]), 60.0);

        let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);

        let scores: HashMap<&str, f64> =
            fused.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        assert!((scores["A"] - 1.0 / 61.0).abs() < 1e-12);
        assert!((scores["B"] - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert!((scores["C"] - 1.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn rrf_is_invariant_to_absent_documents() {
        let without = rrf_fuse(&ids(&["A"]), &ids(&["B"]), 60.0);
        let with = rrf_fuse(&ids(&["A"]), &ids(&["B"]), 60.0);
        assert_eq!(without, with);

        // A document only in the lexical list at rank r contributes 1/(60+r).
        let single = rrf_fuse(&ids(&["X", "Y", "Z"]), &[], 60.0);
        let scores: HashMap<&str, f64> =
            single.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        assert!((scores["X"] - 1.0 / 61.0).abs() < 1e-12);
        assert!((scores["Y"] - 1.0 / 62.0).abs() < 1e-12);
        assert!((scores["Z"] - 1.0 / 63.0).abs() < 1e-12);
    }

    #[test]
    fn rrf_ties_break_on_min_rank_then_node_id() {
        // Both appear once at rank 1 in opposite lists: equal score and
        // equal best rank, so node_id ascending decides.
        let fused = rrf_fuse(&ids(&["B"]), &ids(&["A"]), 60.0);
        let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["A", "B"]);
    }

    #[test]
    fn rrf_handles_empty_lists() {
        assert!(rrf_fuse(&[], &[], 60.0).is_empty());
    }
}
