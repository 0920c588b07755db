//! Personalized feed engine.
//!
//! When a user's combined vector exists, issues are ranked by cosine
//! similarity discounted by freshness, under the profile's preference
//! filters. Without a profile the feed falls back to trending (high quality,
//! recent) with a call to action to complete the profile.

pub mod profile;
pub mod why_this;

use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::search::models::SearchFilters;
use crate::types::{AppError, PageParams, Result};
use profile::{get_or_create_profile, UserProfile};
use why_this::{compute_why_this, WhyThisItem, DEFAULT_TOP_K};

/// Trending requires at least this q_score.
pub const TRENDING_MIN_Q_SCORE: f32 = 0.6;

/// Freshness floor applied in personalized ranking.
const FEED_DECAY_FLOOR: f64 = 0.2;

/// Items returned by onboarding preview recommendations.
pub const PREVIEW_LIMIT: i64 = 3;

const PROFILE_CTA: &str =
    "Complete your profile to unlock personalized recommendations.";

/// One feed entry. `similarity_score` and `why_this` are present only on
/// personalized results.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct FeedItem {
    pub node_id: String,
    pub title: String,
    pub body_preview: String,
    pub labels: Vec<String>,
    pub q_score: f32,
    pub repo_name: String,
    pub primary_language: Option<String>,
    pub github_created_at: DateTime<Utc>,
    pub similarity_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub why_this: Option<Vec<WhyThisItem>>,
}

/// A page of feed results with personalization metadata.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct FeedPage {
    pub results: Vec<FeedItem>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub has_more: bool,
    pub is_personalized: bool,
    pub profile_cta: Option<String>,
}

#[derive(sqlx::FromRow)]
struct FeedRow {
    node_id: String,
    title: String,
    body_preview: String,
    labels: Vec<String>,
    q_score: f32,
    repo_name: String,
    primary_language: Option<String>,
    repo_topics: Vec<String>,
    github_created_at: DateTime<Utc>,
    similarity_score: Option<f64>,
}

/// Serve a feed page for a user: personalized when the combined vector is
/// present, trending otherwise.
pub async fn get_feed(pool: &PgPool, user_id: Uuid, params: PageParams) -> Result<FeedPage> {
    let params = params.clamped();
    let profile = get_or_create_profile(pool, user_id).await?;

    match profile.combined_vector.clone() {
        Some(combined) => get_personalized_feed(pool, &profile, combined, params).await,
        None => get_trending_feed(pool, &SearchFilters::default(), params).await,
    }
}

async fn get_personalized_feed(
    pool: &PgPool,
    profile: &UserProfile,
    combined: Vector,
    params: PageParams,
) -> Result<FeedPage> {
    let preferred_languages: Vec<String> = profile
        .preferred_languages
        .iter()
        .map(|l| l.to_lowercase())
        .collect();

    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM ingestion.issue i
        JOIN ingestion.repository r ON i.repo_id = r.node_id
        WHERE i.state = 'open'
          AND i.embedding IS NOT NULL
          AND i.q_score >= $1
          AND (cardinality($2::text[]) = 0 OR LOWER(r.primary_language) = ANY($2))
          AND (cardinality($3::text[]) = 0 OR r.topics && $3)
        "#,
    )
    .bind(profile.min_heat_threshold)
    .bind(&preferred_languages)
    .bind(&profile.preferred_topics)
    .fetch_one(pool)
    .await?;

    // Rank by similarity discounted with a 7-day half-life freshness decay
    // (floor 0.2); ties resolve on node_id for stable paging.
    let rows: Vec<FeedRow> = sqlx::query_as(
        r#"
        SELECT
            i.node_id,
            i.title,
            LEFT(i.body_text, 280) AS body_preview,
            i.labels,
            i.q_score,
            r.full_name AS repo_name,
            r.primary_language,
            r.topics AS repo_topics,
            i.github_created_at,
            (1 - (i.embedding <=> $4))::float8 AS similarity_score
        FROM ingestion.issue i
        JOIN ingestion.repository r ON i.repo_id = r.node_id
        WHERE i.state = 'open'
          AND i.embedding IS NOT NULL
          AND i.q_score >= $1
          AND (cardinality($2::text[]) = 0 OR LOWER(r.primary_language) = ANY($2))
          AND (cardinality($3::text[]) = 0 OR r.topics && $3)
        ORDER BY
            (1 - (i.embedding <=> $4)) *
            GREATEST(
                $5,
                POWER(2, -GREATEST(EXTRACT(EPOCH FROM (now() - i.github_created_at)), 0) / 86400.0 / 7.0)
            ) DESC,
            i.node_id ASC
        LIMIT $6 OFFSET $7
        "#,
    )
    .bind(profile.min_heat_threshold)
    .bind(&preferred_languages)
    .bind(&profile.preferred_topics)
    .bind(&combined)
    .bind(FEED_DECAY_FLOOR)
    .bind(params.page_size)
    .bind(params.offset())
    .fetch_all(pool)
    .await?;

    let results = rows
        .into_iter()
        .map(|row| {
            let explanations = compute_why_this(
                profile,
                &row.title,
                &row.body_preview,
                &row.labels,
                row.primary_language.as_deref(),
                &row.repo_topics,
                DEFAULT_TOP_K,
            );
            FeedItem {
                node_id: row.node_id,
                title: row.title,
                body_preview: row.body_preview,
                labels: row.labels,
                q_score: row.q_score,
                repo_name: row.repo_name,
                primary_language: row.primary_language,
                github_created_at: row.github_created_at,
                similarity_score: row.similarity_score,
                why_this: Some(explanations),
            }
        })
        .collect();

    Ok(FeedPage {
        results,
        total,
        page: params.page,
        page_size: params.page_size,
        has_more: params.has_more(total),
        is_personalized: true,
        profile_cta: None,
    })
}

/// Trending: open, high-quality, recent issues. Public landing surface and
/// the fallback for profile-less users.
pub async fn get_trending_feed(
    pool: &PgPool,
    filters: &SearchFilters,
    params: PageParams,
) -> Result<FeedPage> {
    let params = params.clamped();
    let languages: Vec<String> = filters.languages.iter().map(|l| l.to_lowercase()).collect();

    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM ingestion.issue i
        JOIN ingestion.repository r ON i.repo_id = r.node_id
        WHERE i.state = 'open'
          AND i.q_score >= $1
          AND (cardinality($2::text[]) = 0 OR LOWER(r.primary_language) = ANY($2))
          AND (cardinality($3::text[]) = 0 OR i.labels && $3)
          AND (cardinality($4::text[]) = 0 OR r.full_name = ANY($4))
        "#,
    )
    .bind(TRENDING_MIN_Q_SCORE)
    .bind(&languages)
    .bind(&filters.labels)
    .bind(&filters.repos)
    .fetch_one(pool)
    .await?;

    let rows: Vec<FeedRow> = sqlx::query_as(
        r#"
        SELECT
            i.node_id,
            i.title,
            LEFT(i.body_text, 280) AS body_preview,
            i.labels,
            i.q_score,
            r.full_name AS repo_name,
            r.primary_language,
            r.topics AS repo_topics,
            i.github_created_at,
            NULL::float8 AS similarity_score
        FROM ingestion.issue i
        JOIN ingestion.repository r ON i.repo_id = r.node_id
        WHERE i.state = 'open'
          AND i.q_score >= $1
          AND (cardinality($2::text[]) = 0 OR LOWER(r.primary_language) = ANY($2))
          AND (cardinality($3::text[]) = 0 OR i.labels && $3)
          AND (cardinality($4::text[]) = 0 OR r.full_name = ANY($4))
        ORDER BY i.q_score DESC, i.github_created_at DESC
        LIMIT $5 OFFSET $6
        "#,
    )
    .bind(TRENDING_MIN_Q_SCORE)
    .bind(&languages)
    .bind(&filters.labels)
    .bind(&filters.repos)
    .bind(params.page_size)
    .bind(params.offset())
    .fetch_all(pool)
    .await?;

    let results = rows
        .into_iter()
        .map(|row| FeedItem {
            node_id: row.node_id,
            title: row.title,
            body_preview: row.body_preview,
            labels: row.labels,
            q_score: row.q_score,
            repo_name: row.repo_name,
            primary_language: row.primary_language,
            github_created_at: row.github_created_at,
            similarity_score: None,
            why_this: None,
        })
        .collect();

    Ok(FeedPage {
        results,
        total,
        page: params.page,
        page_size: params.page_size,
        has_more: params.has_more(total),
        is_personalized: false,
        profile_cta: Some(PROFILE_CTA.to_string()),
    })
}

// ============= Onboarding Preview =============

/// Source vector selector for preview recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewSource {
    Intent,
    Resume,
    Github,
}

impl std::str::FromStr for PreviewSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "intent" => Ok(PreviewSource::Intent),
            "resume" => Ok(PreviewSource::Resume),
            "github" => Ok(PreviewSource::Github),
            other => Err(AppError::InvalidInput(format!(
                "invalid source: '{}'. Valid options: github, intent, resume",
                other
            ))),
        }
    }
}

/// A preview item for the onboarding flow.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct PreviewIssue {
    pub node_id: String,
    pub title: String,
    pub repo_name: String,
    pub primary_language: Option<String>,
    pub q_score: f32,
}

/// Up to three issues ranked by a single source vector; falls back to
/// trending when that vector is absent.
pub async fn get_preview_recommendations(
    pool: &PgPool,
    user_id: Uuid,
    source: Option<PreviewSource>,
) -> Result<Vec<PreviewIssue>> {
    let profile = get_or_create_profile(pool, user_id).await?;

    let source_vector = match source {
        Some(PreviewSource::Intent) => profile.intent_vector,
        Some(PreviewSource::Resume) => profile.resume_vector,
        Some(PreviewSource::Github) => profile.github_vector,
        None => None,
    };

    match source_vector {
        Some(vector) => preview_by_similarity(pool, vector).await,
        None => preview_trending(pool).await,
    }
}

async fn preview_by_similarity(pool: &PgPool, vector: Vector) -> Result<Vec<PreviewIssue>> {
    let rows = sqlx::query_as::<_, PreviewIssue>(
        r#"
        SELECT i.node_id, i.title, r.full_name AS repo_name, r.primary_language, i.q_score
        FROM ingestion.issue i
        JOIN ingestion.repository r ON i.repo_id = r.node_id
        WHERE i.embedding IS NOT NULL AND i.state = 'open'
        ORDER BY i.embedding <=> $1
        LIMIT $2
        "#,
    )
    .bind(vector)
    .bind(PREVIEW_LIMIT)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

async fn preview_trending(pool: &PgPool) -> Result<Vec<PreviewIssue>> {
    let rows = sqlx::query_as::<_, PreviewIssue>(
        r#"
        SELECT i.node_id, i.title, r.full_name AS repo_name, r.primary_language, i.q_score
        FROM ingestion.issue i
        JOIN ingestion.repository r ON i.repo_id = r.node_id
        WHERE i.q_score >= $1 AND i.state = 'open'
        ORDER BY i.q_score DESC, i.github_created_at DESC
        LIMIT $2
        "#,
    )
    .bind(TRENDING_MIN_Q_SCORE)
    .bind(PREVIEW_LIMIT)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn preview_source_parses_known_values() {
        assert_eq!(
            PreviewSource::from_str("intent").unwrap(),
            PreviewSource::Intent
        );
        assert_eq!(
            PreviewSource::from_str("resume").unwrap(),
            PreviewSource::Resume
        );
        assert_eq!(
            PreviewSource::from_str("github").unwrap(),
            PreviewSource::Github
        );
        assert!(PreviewSource::from_str("linkedin").is_err());
    }

    #[test]
    fn trending_threshold_matches_contract() {
        assert!((TRENDING_MIN_Q_SCORE - 0.6).abs() < f32::EPSILON);
    }
}
