//! Request/response models and shared constants for hybrid search.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Upper bound on Stage-1 candidates per subquery.
pub const CANDIDATE_LIMIT: usize = 300;

/// Reciprocal Rank Fusion constant.
pub const RRF_K: f64 = 60.0;

/// Multi-select filters for hybrid search.
///
/// All filters use ANY semantics: OR within a filter list, AND across lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SearchFilters {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub repos: Vec<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.languages.is_empty() && self.labels.is_empty() && self.repos.is_empty()
    }

    /// Canonical form for cache keys: each list sorted so equivalent filter
    /// sets hash identically.
    pub fn to_cache_key(&self) -> String {
        let mut languages = self.languages.clone();
        let mut labels = self.labels.clone();
        let mut repos = self.repos.clone();
        languages.sort();
        labels.sort();
        repos.sort();

        serde_json::json!({
            "languages": languages,
            "labels": labels,
            "repos": repos,
        })
        .to_string()
    }
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl SearchRequest {
    /// Clamp pagination into valid ranges.
    pub fn clamped(mut self) -> Self {
        if self.page < 1 {
            self.page = 1;
        }
        if self.page_size < 1 {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
        if self.page_size > MAX_PAGE_SIZE {
            self.page_size = MAX_PAGE_SIZE;
        }
        self
    }

    pub fn offset(&self) -> usize {
        ((self.page - 1) * self.page_size) as usize
    }

    /// SHA-256 cache key over query, canonical filters, and pagination;
    /// optionally personalized by user id.
    pub fn cache_key(&self, include_user: bool) -> String {
        let mut key_data = format!(
            "{}|{}|{}|{}",
            self.query,
            self.filters.to_cache_key(),
            self.page,
            self.page_size
        );
        if include_user {
            if let Some(user_id) = self.user_id {
                key_data.push('|');
                key_data.push_str(&user_id.to_string());
            }
        }
        hex::encode(Sha256::digest(key_data.as_bytes()))
    }
}

/// One enriched search result.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SearchResultItem {
    pub node_id: String,
    pub title: String,
    pub body_preview: String,
    pub github_url: Option<String>,
    pub labels: Vec<String>,
    pub q_score: f32,
    pub repo_name: String,
    pub primary_language: Option<String>,
    pub github_created_at: DateTime<Utc>,
    pub rrf_score: f64,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SearchResponse {
    pub search_id: Uuid,
    pub results: Vec<SearchResultItem>,
    pub total: i64,
    pub total_is_capped: bool,
    pub page: i64,
    pub page_size: i64,
    pub has_more: bool,
    pub query: String,
    pub filters: SearchFilters,
}

/// Stage-1 output: fused candidate order plus per-candidate scores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stage1Result {
    pub node_ids: Vec<String>,
    pub rrf_scores: std::collections::HashMap<String, f64>,
    pub total: i64,
    pub is_capped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let request = SearchRequest {
            query: "q".into(),
            filters: SearchFilters::default(),
            page: 0,
            page_size: 999,
            user_id: None,
        }
        .clamped();

        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn cache_key_is_invariant_to_filter_order() {
        let a = SearchRequest {
            query: "rust panic".into(),
            filters: SearchFilters {
                languages: vec!["Rust".into(), "Go".into()],
                labels: vec![],
                repos: vec![],
            },
            page: 1,
            page_size: 20,
            user_id: None,
        };
        let b = SearchRequest {
            query: "rust panic".into(),
            filters: SearchFilters {
                languages: vec!["Go".into(), "Rust".into()],
                labels: vec![],
                repos: vec![],
            },
            page: 1,
            page_size: 20,
            user_id: None,
        };

        assert_eq!(a.cache_key(false), b.cache_key(false));
    }

    #[test]
    fn cache_key_varies_with_inputs() {
        let base = SearchRequest {
            query: "rust panic".into(),
            filters: SearchFilters::default(),
            page: 1,
            page_size: 20,
            user_id: None,
        };

        let other_page = SearchRequest {
            page: 2,
            ..base.clone()
        };
        assert_ne!(base.cache_key(false), other_page.cache_key(false));

        let other_query = SearchRequest {
            query: "go panic".into(),
            ..base.clone()
        };
        assert_ne!(base.cache_key(false), other_query.cache_key(false));
    }

    #[test]
    fn cache_key_optionally_includes_user() {
        let user_id = Uuid::new_v4();
        let request = SearchRequest {
            query: "q".into(),
            filters: SearchFilters::default(),
            page: 1,
            page_size: 20,
            user_id: Some(user_id),
        };

        assert_ne!(request.cache_key(false), request.cache_key(true));
    }
}
