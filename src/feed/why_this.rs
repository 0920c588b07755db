//! Deterministic "why this" explanations for personalized feed items.
//!
//! Scores a whitelisted set of profile entities against an issue and its
//! repository, returning the top-K entities. The scorer accepts any profile
//! shape through [`ProfileEntities`], so it is unit-testable with fakes.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::taxonomy::{
    is_valid_language, is_valid_stack_area, normalize_skill, tech_keywords_for,
};

/// Default number of explanations attached per item.
pub const DEFAULT_TOP_K: usize = 3;

const SCORE_LABEL_MATCH: f64 = 3.0;
const SCORE_LANGUAGE_MATCH: f64 = 2.5;
const SCORE_TOPIC_MATCH: f64 = 2.0;
const SCORE_TEXT_MATCH: f64 = 1.0;

/// One ranked explanation entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WhyThisItem {
    pub entity: String,
    pub score: f64,
}

/// The profile attributes the scorer is allowed to read.
pub trait ProfileEntities {
    fn preferred_languages(&self) -> &[String];
    fn github_languages(&self) -> &[String];
    fn intent_stack_areas(&self) -> &[String];
    fn resume_skills(&self) -> &[String];
    fn resume_job_titles(&self) -> &[String];
    fn preferred_topics(&self) -> &[String];
    fn github_topics(&self) -> &[String];
}

impl ProfileEntities for super::profile::UserProfile {
    fn preferred_languages(&self) -> &[String] {
        &self.preferred_languages
    }
    fn github_languages(&self) -> &[String] {
        &self.github_languages
    }
    fn intent_stack_areas(&self) -> &[String] {
        &self.intent_stack_areas
    }
    fn resume_skills(&self) -> &[String] {
        &self.resume_skills
    }
    fn resume_job_titles(&self) -> &[String] {
        &self.resume_job_titles
    }
    fn preferred_topics(&self) -> &[String] {
        &self.preferred_topics
    }
    fn github_topics(&self) -> &[String] {
        &self.github_topics
    }
}

/// Lowercase and strip everything but letters and digits.
fn norm(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Tokens of lowercase letters, digits, `+`, `#`, and `.`.
fn tokenize(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    let mut tokens = HashSet::new();
    let mut current = String::new();
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() || c == '+' || c == '#' || c == '.' {
            current.push(c);
        } else if !current.is_empty() {
            tokens.insert(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.insert(current);
    }
    tokens
}

/// Collect the whitelisted entity set from a profile. Languages and stack
/// areas must pass the taxonomy whitelist; free-form skills, titles, and
/// topics are canonicalized through [`normalize_skill`].
fn extract_profile_entities(profile: &dyn ProfileEntities) -> HashSet<String> {
    let mut entities = HashSet::new();

    for lang in profile.preferred_languages() {
        if is_valid_language(lang) {
            entities.insert(lang.clone());
        }
    }
    for lang in profile.github_languages() {
        if is_valid_language(lang) {
            entities.insert(lang.clone());
        }
    }

    for area in profile.intent_stack_areas() {
        if is_valid_stack_area(area) {
            entities.insert(area.clone());
        }
    }

    for raw in profile
        .preferred_topics()
        .iter()
        .chain(profile.github_topics())
        .chain(profile.resume_skills())
        .chain(profile.resume_job_titles())
    {
        if let Some(canonical) = normalize_skill(raw) {
            entities.insert(canonical);
        }
    }

    entities
}

/// Compute why-this explanations for one issue.
///
/// Per entity: +3.0 for a label match, +2.5 for the repo's primary language,
/// +2.0 for a repo topic, +1.0 for a title/body token or tech-table match.
/// Returns the top-K entities ordered by score descending, then entity
/// ascending (case-insensitive).
pub fn compute_why_this(
    profile: &dyn ProfileEntities,
    issue_title: &str,
    issue_body_preview: &str,
    issue_labels: &[String],
    repo_primary_language: Option<&str>,
    repo_topics: &[String],
    top_k: usize,
) -> Vec<WhyThisItem> {
    let entities = extract_profile_entities(profile);
    if entities.is_empty() {
        return Vec::new();
    }

    let label_norms: HashSet<String> = issue_labels
        .iter()
        .filter(|l| !l.is_empty())
        .map(|l| norm(l))
        .collect();

    let topic_norms: HashSet<String> = repo_topics
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| {
            let canonical = normalize_skill(t).unwrap_or_else(|| t.to_string());
            norm(&canonical)
        })
        .collect();

    let lang_norm = repo_primary_language.map(norm).unwrap_or_default();

    let text = format!("{}\n{}", issue_title, issue_body_preview).to_lowercase();
    let token_norms: HashSet<String> = tokenize(&text).iter().map(|t| norm(t)).collect();

    let tech_norms: HashSet<String> = tech_keywords_for(repo_primary_language)
        .iter()
        .map(|k| norm(k))
        .collect();

    let mut scores: HashMap<String, f64> = HashMap::new();

    for entity in entities {
        let entity_norm = norm(&entity);
        if entity_norm.is_empty() {
            continue;
        }

        let mut score = 0.0;

        if label_norms.contains(&entity_norm) {
            score += SCORE_LABEL_MATCH;
        }
        if !lang_norm.is_empty() && entity_norm == lang_norm {
            score += SCORE_LANGUAGE_MATCH;
        }
        if topic_norms.contains(&entity_norm) {
            score += SCORE_TOPIC_MATCH;
        }
        if token_norms.contains(&entity_norm)
            || tech_norms.contains(&entity_norm)
            || text.contains(&entity.to_lowercase())
        {
            score += SCORE_TEXT_MATCH;
        }

        if score > 0.0 {
            scores.insert(entity, score);
        }
    }

    let mut ranked: Vec<WhyThisItem> = scores
        .into_iter()
        .map(|(entity, score)| WhyThisItem { entity, score })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity.to_lowercase().cmp(&b.entity.to_lowercase()))
    });

    ranked.truncate(top_k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fake profile for exercising the scorer without a database row.
    #[derive(Default)]
    struct FakeProfile {
        preferred_languages: Vec<String>,
        github_languages: Vec<String>,
        intent_stack_areas: Vec<String>,
        resume_skills: Vec<String>,
        resume_job_titles: Vec<String>,
        preferred_topics: Vec<String>,
        github_topics: Vec<String>,
    }

    impl ProfileEntities for FakeProfile {
        fn preferred_languages(&self) -> &[String] {
            &self.preferred_languages
        }
        fn github_languages(&self) -> &[String] {
            &self.github_languages
        }
        fn intent_stack_areas(&self) -> &[String] {
            &self.intent_stack_areas
        }
        fn resume_skills(&self) -> &[String] {
            &self.resume_skills
        }
        fn resume_job_titles(&self) -> &[String] {
            &self.resume_job_titles
        }
        fn preferred_topics(&self) -> &[String] {
            &self.preferred_topics
        }
        fn github_topics(&self) -> &[String] {
            &self.github_topics
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_profile_yields_no_explanations() {
        let profile = FakeProfile::default();
        let items = compute_why_this(
            &profile,
            "Fix tokio panic",
            "panic in runtime",
            &strings(&["bug"]),
            Some("Rust"),
            &[],
            DEFAULT_TOP_K,
        );
        assert!(items.is_empty());
    }

    #[test]
    fn label_match_scores_highest() {
        let profile = FakeProfile {
            resume_skills: strings(&["kubernetes"]),
            ..Default::default()
        };

        let items = compute_why_this(
            &profile,
            "Scheduler ignores taints",
            "pods land on tainted nodes",
            &strings(&["kubernetes"]),
            Some("Go"),
            &strings(&["kubernetes"]),
            DEFAULT_TOP_K,
        );

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].entity, "kubernetes");
        // Label (3.0) + topic (2.0) + tech table for Go (1.0).
        assert!((items[0].score - 6.0).abs() < 1e-9);
    }

    #[test]
    fn language_match_scores_2_5() {
        let profile = FakeProfile {
            preferred_languages: strings(&["Rust"]),
            ..Default::default()
        };

        let items = compute_why_this(
            &profile,
            "Segfault in parser",
            "crashes on malformed input",
            &[],
            Some("Rust"),
            &[],
            DEFAULT_TOP_K,
        );

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].entity, "Rust");
        assert!((items[0].score - 2.5).abs() < 1e-9);
    }

    #[test]
    fn non_whitelisted_languages_are_ignored() {
        let profile = FakeProfile {
            preferred_languages: strings(&["Brainfuck"]),
            ..Default::default()
        };

        let items = compute_why_this(
            &profile,
            "brainfuck interpreter broken",
            "",
            &[],
            None,
            &[],
            DEFAULT_TOP_K,
        );
        assert!(items.is_empty());
    }

    #[test]
    fn results_are_ordered_and_truncated() {
        let profile = FakeProfile {
            preferred_languages: strings(&["Python"]),
            intent_stack_areas: strings(&["backend"]),
            resume_skills: strings(&["django", "postgresql", "redis"]),
            ..Default::default()
        };

        let items = compute_why_this(
            &profile,
            "django ORM emits wrong SQL for postgresql upserts",
            "also seen with redis cache layer and backend workers",
            &strings(&["django"]),
            Some("Python"),
            &strings(&["postgresql"]),
            2,
        );

        assert_eq!(items.len(), 2);
        // django: label 3.0 + text 1.0 = 4.0 beats postgresql: topic 2.0 + text 1.0.
        assert_eq!(items[0].entity, "django");
        assert!(items[0].score >= items[1].score);
    }

    #[test]
    fn ties_break_alphabetically_case_insensitive() {
        let profile = FakeProfile {
            resume_skills: strings(&["vue", "react"]),
            ..Default::default()
        };

        let items = compute_why_this(
            &profile,
            "react and vue bindings both leak",
            "",
            &[],
            None,
            &[],
            DEFAULT_TOP_K,
        );

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].entity, "react");
        assert_eq!(items[1].entity, "vue");
        assert_eq!(items[0].score, items[1].score);
    }

    #[test]
    fn topics_are_canonicalized_before_matching() {
        let profile = FakeProfile {
            github_topics: strings(&["K8s"]),
            ..Default::default()
        };

        let items = compute_why_this(
            &profile,
            "Node pool autoscaling broken",
            "",
            &[],
            None,
            &strings(&["kubernetes"]),
            DEFAULT_TOP_K,
        );

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].entity, "kubernetes");
        // Topic (2.0) + language-agnostic tech table (1.0).
        assert!((items[0].score - 3.0).abs() < 1e-9);
    }
}
