//! User profiles: source vectors, preference fields, and combined-vector
//! composition.
//!
//! The combined vector is a weighted fusion of the intent, resume, and
//! GitHub source vectors. Each present source is L2-normalized, the weighted
//! sum is taken per the composition table, and the result is normalized
//! again. With no sources, the combined vector is null and the feed falls
//! back to trending.

use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use crate::embedding::embed_with_retry;
use crate::types::Result;

/// One row of `user_profiles`, lazily created with defaults on first access.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub intent_vector: Option<Vector>,
    pub resume_vector: Option<Vector>,
    pub github_vector: Option<Vector>,
    pub combined_vector: Option<Vector>,
    pub intent_text: String,
    pub intent_stack_areas: Vec<String>,
    pub intent_languages: Vec<String>,
    pub intent_experience_level: Option<String>,
    pub resume_skills: Vec<String>,
    pub resume_job_titles: Vec<String>,
    pub github_languages: Vec<String>,
    pub github_topics: Vec<String>,
    pub github_username: Option<String>,
    pub preferred_languages: Vec<String>,
    pub preferred_topics: Vec<String>,
    pub min_heat_threshold: f32,
    pub onboarding_status: String,
    pub is_calculating: bool,
}

impl UserProfile {
    /// Profile completion percentage: intent 50, resume 30, github 20.
    pub fn optimization_percent(&self) -> u8 {
        let mut percent = 0;
        if !self.intent_text.is_empty() {
            percent += 50;
        }
        if !self.resume_skills.is_empty() {
            percent += 30;
        }
        if self.github_username.is_some() {
            percent += 20;
        }
        percent
    }
}

/// Fetch a user's profile, creating an empty one on first access.
pub async fn get_or_create_profile(pool: &PgPool, user_id: Uuid) -> Result<UserProfile> {
    sqlx::query("INSERT INTO user_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(pool)
        .await?;

    let profile = sqlx::query_as::<_, UserProfile>(
        r#"
        SELECT user_id, intent_vector, resume_vector, github_vector, combined_vector,
               intent_text, intent_stack_areas, intent_languages, intent_experience_level,
               resume_skills, resume_job_titles, github_languages, github_topics,
               github_username, preferred_languages, preferred_topics,
               min_heat_threshold, onboarding_status, is_calculating
        FROM user_profiles
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(profile)
}

/// Recompute and persist the combined vector from the stored source vectors.
pub async fn refresh_combined_vector(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let profile = get_or_create_profile(pool, user_id).await?;

    let combined = combine_vectors(
        profile.intent_vector.as_ref().map(|v| v.as_slice()),
        profile.resume_vector.as_ref().map(|v| v.as_slice()),
        profile.github_vector.as_ref().map(|v| v.as_slice()),
    );

    sqlx::query(
        "UPDATE user_profiles SET combined_vector = $2, is_calculating = FALSE, updated_at = now() WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(combined.map(Vector::from))
    .execute(pool)
    .await?;

    Ok(())
}

/// Flip the in-progress flag while source embeddings are recomputed.
pub async fn set_calculating(pool: &PgPool, user_id: Uuid, calculating: bool) -> Result<()> {
    sqlx::query("UPDATE user_profiles SET is_calculating = $2, updated_at = now() WHERE user_id = $1")
        .bind(user_id)
        .bind(calculating)
        .execute(pool)
        .await?;
    Ok(())
}

/// Persist a freshly generated intent source vector.
pub async fn store_intent_vector(
    pool: &PgPool,
    user_id: Uuid,
    vector: Option<Vec<f32>>,
) -> Result<()> {
    sqlx::query(
        "UPDATE user_profiles SET intent_vector = $2, updated_at = now() WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(vector.map(Vector::from))
    .execute(pool)
    .await?;
    Ok(())
}

// ============= Vector Math =============

/// L2-normalize a vector. A zero vector is returned unchanged.
pub fn l2_normalize(vector: &[f32]) -> Vec<f32> {
    let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / magnitude).collect()
}

fn weighted_sum(parts: &[(&[f32], f32)]) -> Vec<f32> {
    let Some((first, _)) = parts.first() else {
        return Vec::new();
    };
    let mut result = vec![0.0; first.len()];
    for (vector, weight) in parts {
        for (slot, value) in result.iter_mut().zip(vector.iter()) {
            *slot += value * weight;
        }
    }
    result
}

/// Compose the combined vector from whichever sources are present.
///
/// | sources present          | weights          |
/// |--------------------------|------------------|
/// | intent + resume + github | 0.50, 0.30, 0.20 |
/// | intent + resume          | 0.60, 0.40       |
/// | intent + github          | 0.70, 0.30       |
/// | resume + github          | 0.60, 0.40       |
/// | exactly one              | identity         |
pub fn combine_vectors(
    intent: Option<&[f32]>,
    resume: Option<&[f32]>,
    github: Option<&[f32]>,
) -> Option<Vec<f32>> {
    let intent_norm = intent.map(l2_normalize);
    let resume_norm = resume.map(l2_normalize);
    let github_norm = github.map(l2_normalize);

    let combined = match (&intent_norm, &resume_norm, &github_norm) {
        (Some(i), Some(r), Some(g)) => {
            weighted_sum(&[(i.as_slice(), 0.5), (r.as_slice(), 0.3), (g.as_slice(), 0.2)])
        }
        (Some(i), Some(r), None) => weighted_sum(&[(i.as_slice(), 0.6), (r.as_slice(), 0.4)]),
        (Some(i), None, Some(g)) => weighted_sum(&[(i.as_slice(), 0.7), (g.as_slice(), 0.3)]),
        (None, Some(r), Some(g)) => weighted_sum(&[(r.as_slice(), 0.6), (g.as_slice(), 0.4)]),
        (Some(i), None, None) => return Some(i.clone()),
        (None, Some(r), None) => return Some(r.clone()),
        (None, None, Some(g)) => return Some(g.clone()),
        (None, None, None) => return None,
    };

    Some(l2_normalize(&combined))
}

// ============= Intent Embedding =============

/// Embed format for the intent source: `"{comma-joined stack_areas}. {text}"`.
/// Languages and experience level feed filter predicates only and are never
/// embedded.
pub fn format_intent_text(stack_areas: &[String], text: &str) -> String {
    let stack_str = stack_areas.join(", ");

    match (stack_str.is_empty(), text.is_empty()) {
        (false, false) => format!("{}. {}", stack_str, text),
        (false, true) => stack_str,
        (true, _) => text.to_string(),
    }
}

/// Generate the intent source vector under the standard retry policy.
/// Returns `None` when there is nothing to embed or embedding permanently
/// failed.
pub async fn generate_intent_vector(stack_areas: &[String], text: &str) -> Option<Vec<f32>> {
    let formatted = format_intent_text(stack_areas, text);
    if formatted.is_empty() {
        tracing::warn!("cannot generate intent vector: no text content");
        return None;
    }
    embed_with_retry(&formatted).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_unit(vector: &[f32]) {
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {}", norm);
    }

    #[test]
    fn l2_normalize_produces_unit_vectors() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
        assert_unit(&normalized);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector_alone() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn combine_all_three_uses_primary_weights() {
        let intent = vec![1.0, 0.0, 0.0];
        let resume = vec![0.0, 1.0, 0.0];
        let github = vec![0.0, 0.0, 1.0];

        let combined = combine_vectors(
            Some(&intent),
            Some(&resume),
            Some(&github),
        )
        .unwrap();

        assert_unit(&combined);
        // Component ratios preserve the 0.5 / 0.3 / 0.2 weighting.
        assert!((combined[0] / combined[1] - 0.5 / 0.3).abs() < 1e-5);
        assert!((combined[1] / combined[2] - 0.3 / 0.2).abs() < 1e-5);
    }

    #[test]
    fn combine_pairs_use_table_weights() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];

        let intent_resume = combine_vectors(Some(&a), Some(&b), None).unwrap();
        assert!((intent_resume[0] / intent_resume[1] - 0.6 / 0.4).abs() < 1e-5);

        let intent_github = combine_vectors(Some(&a), None, Some(&b)).unwrap();
        assert!((intent_github[0] / intent_github[1] - 0.7 / 0.3).abs() < 1e-5);

        let resume_github = combine_vectors(None, Some(&a), Some(&b)).unwrap();
        assert!((resume_github[0] / resume_github[1] - 0.6 / 0.4).abs() < 1e-5);
    }

    #[test]
    fn single_source_is_identity_after_normalization() {
        let resume = vec![2.0, 0.0];
        let combined = combine_vectors(None, Some(&resume), None).unwrap();
        assert_eq!(combined, vec![1.0, 0.0]);
    }

    #[test]
    fn no_sources_yields_none() {
        assert!(combine_vectors(None, None, None).is_none());
    }

    #[test]
    fn intent_text_format() {
        let areas = vec!["backend".to_string(), "devops".to_string()];
        assert_eq!(
            format_intent_text(&areas, "I like distributed systems"),
            "backend, devops. I like distributed systems"
        );
        assert_eq!(format_intent_text(&areas, ""), "backend, devops");
        assert_eq!(format_intent_text(&[], "just text"), "just text");
        assert_eq!(format_intent_text(&[], ""), "");
    }

    #[test]
    fn optimization_percent_weights_sources() {
        let mut profile = UserProfile {
            user_id: Uuid::new_v4(),
            intent_vector: None,
            resume_vector: None,
            github_vector: None,
            combined_vector: None,
            intent_text: String::new(),
            intent_stack_areas: vec![],
            intent_languages: vec![],
            intent_experience_level: None,
            resume_skills: vec![],
            resume_job_titles: vec![],
            github_languages: vec![],
            github_topics: vec![],
            github_username: None,
            preferred_languages: vec![],
            preferred_topics: vec![],
            min_heat_threshold: 0.6,
            onboarding_status: "pending".to_string(),
            is_calculating: false,
        };
        assert_eq!(profile.optimization_percent(), 0);

        profile.intent_text = "backend work".to_string();
        assert_eq!(profile.optimization_percent(), 50);

        profile.resume_skills = vec!["rust".to_string()];
        assert_eq!(profile.optimization_percent(), 80);

        profile.github_username = Some("octocat".to_string());
        assert_eq!(profile.optimization_percent(), 100);
    }
}
