//! Quality gate and scoring: pure functions over issue content.
//!
//! Every score is deterministic in (title, body, language) so re-ingesting
//! unchanged content never changes a row. The content hash identifies a
//! content version; embedding regeneration is keyed on it.

use sha2::{Digest, Sha256};

use crate::taxonomy::tech_keywords_for;

/// Weights for the q-score components.
const WEIGHT_HAS_CODE: f32 = 0.4;
const WEIGHT_HAS_HEADERS: f32 = 0.3;
const WEIGHT_TECH_STACK: f32 = 0.3;

/// Freshness half-life driving survival decay.
pub const SURVIVAL_HALF_LIFE_DAYS: f64 = 7.0;

/// Markdown headers recognized as issue-template structure.
const TEMPLATE_HEADERS: &[&str] = &[
    "steps to reproduce",
    "expected behavior",
    "expected behaviour",
    "actual behavior",
    "actual behaviour",
    "describe the bug",
    "to reproduce",
    "reproduction",
    "environment",
    "what happened",
    "system info",
];

/// Low-effort bodies dropped outright by the junk filter.
const BOILERPLATE_BODIES: &[&str] = &["+1", "same issue", "same here", "any update", "bump", "me too"];

/// Q-score components, persisted alongside the score itself.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QScoreComponents {
    pub has_code: bool,
    pub has_template_headers: bool,
    pub tech_stack_weight: f32,
}

/// SHA-256 over `node_id ':' title ':' body_text`, hex-encoded.
///
/// Uniquely identifies a content version: stable under permutation of
/// unrelated fields, changed iff one of the three inputs changes.
pub fn content_hash(node_id: &str, title: &str, body_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(node_id.as_bytes());
    hasher.update(b":");
    hasher.update(title.as_bytes());
    hasher.update(b":");
    hasher.update(body_text.as_bytes());
    hex::encode(hasher.finalize())
}

/// True iff the body contains a fenced code block or an inline code span.
pub fn has_code(body: &str) -> bool {
    if body.contains("```") {
        return true;
    }
    // Inline span: a backtick pair enclosing at least one character.
    let mut open = None;
    for (i, c) in body.char_indices() {
        if c == '`' {
            match open {
                Some(start) if i > start + 1 => return true,
                Some(_) => open = None,
                None => open = Some(i),
            }
        }
    }
    false
}

/// True iff the body carries markdown headers matching a known issue template.
pub fn has_template_headers(body: &str) -> bool {
    for line in body.lines() {
        let trimmed = line.trim_start();
        if !trimmed.starts_with('#') && !trimmed.starts_with("**") {
            continue;
        }
        let heading = trimmed
            .trim_start_matches('#')
            .trim_matches('*')
            .trim()
            .to_ascii_lowercase();
        if TEMPLATE_HEADERS.iter().any(|h| heading.starts_with(h)) {
            return true;
        }
    }
    false
}

/// Overlap of content tokens with the per-language tech keyword table,
/// saturating at four distinct hits. Unknown languages fall back to the
/// language-agnostic table.
pub fn tech_stack_weight(title: &str, body: &str, primary_language: Option<&str>) -> f32 {
    let keywords = tech_keywords_for(primary_language);
    let text = format!("{} {}", title, body).to_ascii_lowercase();

    let tokens: std::collections::HashSet<&str> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#' || c == '.'))
        .filter(|t| !t.is_empty())
        .collect();

    let matches = keywords
        .iter()
        .filter(|k| tokens.contains(**k))
        .count() as f32;

    (matches / 4.0).clamp(0.0, 1.0)
}

/// Weighted sum of the three components, clamped to [0, 1].
pub fn q_score(components: &QScoreComponents) -> f32 {
    let score = WEIGHT_HAS_CODE * (components.has_code as u8 as f32)
        + WEIGHT_HAS_HEADERS * (components.has_template_headers as u8 as f32)
        + WEIGHT_TECH_STACK * components.tech_stack_weight;
    score.clamp(0.0, 1.0)
}

/// Compute all components in one pass.
pub fn score_components(
    title: &str,
    body: &str,
    primary_language: Option<&str>,
) -> QScoreComponents {
    QScoreComponents {
        has_code: has_code(body),
        has_template_headers: has_template_headers(body),
        tech_stack_weight: tech_stack_weight(title, body, primary_language),
    }
}

/// Exponential freshness decay with a floor.
///
/// Returns 1.0 for non-positive age, otherwise
/// `max(floor, 2^(-age / half_life))`.
pub fn freshness_decay(age_days: f64, half_life_days: f64, floor: f64) -> f64 {
    if age_days <= 0.0 {
        return 1.0;
    }
    let decay = (2.0_f64).powf(-age_days / half_life_days);
    decay.max(floor)
}

/// Q-score discounted by freshness (half-life 7 days, no floor), clamped.
pub fn survival_score(q_score: f32, age_days: f64) -> f32 {
    let decay = freshness_decay(age_days, SURVIVAL_HALF_LIFE_DAYS, 0.0);
    ((q_score as f64) * decay).clamp(0.0, 1.0) as f32
}

/// Short-circuit filter for empty, boilerplate, or non-English dominated
/// bodies.
pub fn is_junk(body: &str) -> bool {
    let trimmed = body.trim();
    if trimmed.len() < 20 {
        return true;
    }

    let lowered = trimmed.to_ascii_lowercase();
    if BOILERPLATE_BODIES.iter().any(|b| lowered == *b) {
        return true;
    }

    // Dominated by non-ASCII letters: likely not English.
    let mut alphabetic = 0usize;
    let mut non_ascii = 0usize;
    for c in trimmed.chars() {
        if c.is_alphabetic() {
            alphabetic += 1;
            if !c.is_ascii() {
                non_ascii += 1;
            }
        }
    }
    alphabetic > 0 && non_ascii * 2 > alphabetic
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_known_vector() {
        assert_eq!(
            content_hash("I_123", "Bug report", "Description"),
            "56deae1f9857c5766cb6e34463d8697b48fffe350935a94784c85c9d6902f325"
        );
    }

    #[test]
    fn content_hash_changes_with_any_input() {
        let base = content_hash("I_123", "Bug report", "Description");
        assert_ne!(base, content_hash("I_124", "Bug report", "Description"));
        assert_ne!(base, content_hash("I_123", "Bug report!", "Description"));
        assert_ne!(base, content_hash("I_123", "Bug report", "Description."));
    }

    #[test]
    fn has_code_detects_fenced_blocks() {
        assert!(has_code("see below\n```rust\npanic!()\n```"));
        assert!(has_code("call `foo()` first"));
        assert!(!has_code("no code here"));
        assert!(!has_code("stray ` tick"));
        assert!(!has_code("empty `` span"));
    }

    #[test]
    fn has_template_headers_matches_known_sections() {
        assert!(has_template_headers("## Steps to reproduce\n1. run it"));
        assert!(has_template_headers("### Expected Behavior\nworks"));
        assert!(has_template_headers("**Environment**\nlinux"));
        assert!(!has_template_headers("just prose, no headers"));
        assert!(!has_template_headers("# Unrelated heading"));
    }

    #[test]
    fn tech_stack_weight_counts_distinct_hits() {
        let w = tech_stack_weight(
            "tokio runtime panics",
            "cargo build fails; serde and axum involved",
            Some("Rust"),
        );
        assert!((w - 1.0).abs() < f32::EPSILON);

        let one = tech_stack_weight("tokio issue", "plain text", Some("Rust"));
        assert!((one - 0.25).abs() < f32::EPSILON);

        assert_eq!(tech_stack_weight("nothing", "relevant", Some("Rust")), 0.0);
    }

    #[test]
    fn tech_stack_weight_falls_back_for_unknown_language() {
        let w = tech_stack_weight("docker api", "rest sql cache", None);
        assert!(w > 0.0);
    }

    #[test]
    fn q_score_is_clamped_weighted_sum() {
        let all = QScoreComponents {
            has_code: true,
            has_template_headers: true,
            tech_stack_weight: 1.0,
        };
        assert!((q_score(&all) - 1.0).abs() < f32::EPSILON);

        let none = QScoreComponents {
            has_code: false,
            has_template_headers: false,
            tech_stack_weight: 0.0,
        };
        assert_eq!(q_score(&none), 0.0);

        let code_only = QScoreComponents {
            has_code: true,
            has_template_headers: false,
            tech_stack_weight: 0.0,
        };
        assert!((q_score(&code_only) - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn freshness_decay_fixed_points() {
        assert_eq!(freshness_decay(0.0, 7.0, 0.2), 1.0);
        assert_eq!(freshness_decay(-1.0, 7.0, 0.2), 1.0);
        assert!((freshness_decay(7.0, 7.0, 0.0) - 0.5).abs() < 1e-9);
        assert!((freshness_decay(14.0, 7.0, 0.0) - 0.25).abs() < 1e-9);
        assert!(freshness_decay(365.0, 7.0, 0.2) >= 0.2);
    }

    #[test]
    fn survival_score_decays_with_age() {
        let fresh = survival_score(0.8, 0.0);
        assert!((fresh - 0.8).abs() < 1e-6);

        let week_old = survival_score(0.8, 7.0);
        assert!((week_old - 0.4).abs() < 1e-6);

        assert!(survival_score(1.0, 1000.0) >= 0.0);
    }

    #[test]
    fn is_junk_filters_low_effort_bodies() {
        assert!(is_junk(""));
        assert!(is_junk("   +1   "));
        assert!(is_junk("same issue"));
        assert!(is_junk("short"));
        assert!(!is_junk(
            "The parser crashes when the input file contains a BOM marker."
        ));
    }

    #[test]
    fn is_junk_filters_non_english_dominated_bodies() {
        assert!(is_junk("这个问题在最新版本中仍然存在，请尽快修复这个错误"));
        assert!(!is_junk(
            "The error message includes 日本語 but the report is in English."
        ));
    }
}
