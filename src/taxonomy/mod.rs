//! Shared taxonomy tables: language whitelist, stack areas, tech keyword
//! tables, and skill normalization.
//!
//! These tables are the single source of truth for profile validation, the
//! quality gate's tech-stack weighting, and the why-this scorer.

use serde::Serialize;

/// Languages accepted in profile preferences and taxonomy endpoints.
pub const PROFILE_LANGUAGES: &[&str] = &[
    "Python",
    "TypeScript",
    "JavaScript",
    "Rust",
    "Go",
    "Java",
    "C++",
    "C#",
    "Ruby",
    "PHP",
    "Swift",
    "Kotlin",
];

/// Stack areas as (id, description). Labels are derived by title-casing the id.
pub const STACK_AREAS: &[(&str, &str)] = &[
    ("backend", "APIs, services, databases, and server-side logic"),
    ("frontend", "User interfaces, web apps, and client-side frameworks"),
    ("mobile", "iOS, Android, and cross-platform applications"),
    ("devops", "CI/CD, infrastructure, containers, and deployment"),
    ("data_engineering", "Pipelines, warehouses, and data platforms"),
    ("machine_learning", "Model training, inference, and ML tooling"),
    ("security", "Application security, cryptography, and auditing"),
    ("systems", "Operating systems, compilers, and low-level tooling"),
];

/// Experience levels accepted on intent profiles.
pub const EXPERIENCE_LEVELS: &[&str] = &["beginner", "intermediate", "advanced"];

/// Language-agnostic tech keywords used when a repository's primary language
/// is unknown or has no dedicated table.
pub const DEFAULT_TECH_KEYWORDS: &[&str] = &[
    "api", "cli", "database", "docker", "http", "json", "kubernetes", "linux", "rest", "sql",
    "test", "ci", "cache", "async", "auth",
];

/// Per-language tech keyword tables for `tech_stack_weight` and why-this.
pub fn tech_keywords_for(primary_language: Option<&str>) -> &'static [&'static str] {
    match primary_language.map(|l| l.to_ascii_lowercase()).as_deref() {
        Some("python") => &[
            "django", "flask", "fastapi", "pandas", "numpy", "pytest", "asyncio", "celery",
            "sqlalchemy", "pydantic", "pip", "poetry",
        ],
        Some("typescript") | Some("javascript") => &[
            "react", "node", "nextjs", "vue", "angular", "express", "webpack", "vite", "npm",
            "jest", "eslint", "typescript",
        ],
        Some("rust") => &[
            "cargo", "tokio", "async", "serde", "wasm", "clippy", "crate", "axum", "unsafe",
            "borrow", "lifetime",
        ],
        Some("go") => &[
            "goroutine", "channel", "grpc", "gin", "module", "interface", "context", "mutex",
            "kubernetes", "docker",
        ],
        Some("java") => &[
            "spring", "maven", "gradle", "jvm", "hibernate", "junit", "kotlin", "servlet",
            "tomcat",
        ],
        Some("c++") | Some("c") => &[
            "cmake", "template", "memory", "pointer", "stl", "gcc", "clang", "segfault",
            "valgrind",
        ],
        Some("ruby") => &["rails", "gem", "bundler", "rspec", "sidekiq", "rake"],
        _ => DEFAULT_TECH_KEYWORDS,
    }
}

/// Stack area with display label and description.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct StackAreaInfo {
    pub id: String,
    pub label: String,
    pub description: String,
}

/// All profile languages, in whitelist order.
pub fn languages() -> Vec<String> {
    PROFILE_LANGUAGES.iter().map(|l| l.to_string()).collect()
}

/// All stack areas with derived labels.
pub fn stack_areas() -> Vec<StackAreaInfo> {
    STACK_AREAS
        .iter()
        .map(|(id, description)| StackAreaInfo {
            id: id.to_string(),
            label: title_case_id(id),
            description: description.to_string(),
        })
        .collect()
}

/// "data_engineering" -> "Data Engineering"
fn title_case_id(id: &str) -> String {
    id.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check membership of a language in the profile whitelist.
pub fn is_valid_language(language: &str) -> bool {
    PROFILE_LANGUAGES.contains(&language)
}

/// Check membership of a stack area id.
pub fn is_valid_stack_area(area: &str) -> bool {
    STACK_AREAS.iter().any(|(id, _)| *id == area)
}

/// Check membership of an experience level.
pub fn is_valid_experience_level(level: &str) -> bool {
    EXPERIENCE_LEVELS.contains(&level)
}

/// Canonicalize a free-form skill or topic string.
///
/// Lowercases, trims, and folds common aliases onto a canonical form.
/// Returns `None` for empty input.
pub fn normalize_skill(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return None;
    }

    let canonical = match lowered.as_str() {
        "js" | "ecmascript" => "javascript",
        "ts" => "typescript",
        "reactjs" | "react.js" => "react",
        "nodejs" | "node.js" => "node",
        "nextjs" | "next.js" => "nextjs",
        "vuejs" | "vue.js" => "vue",
        "k8s" => "kubernetes",
        "postgres" | "postgresql" => "postgresql",
        "golang" => "go",
        "py" => "python",
        "ml" => "machine learning",
        "ai" => "artificial intelligence",
        "ci/cd" | "cicd" => "ci",
        other => other,
    };

    Some(canonical.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn languages_match_whitelist() {
        let result = languages();
        assert_eq!(result.len(), PROFILE_LANGUAGES.len());
        assert!(result.contains(&"Python".to_string()));
        assert!(result.contains(&"TypeScript".to_string()));
    }

    #[test]
    fn stack_areas_have_labels_and_descriptions() {
        let areas = stack_areas();
        assert_eq!(areas.len(), STACK_AREAS.len());
        for area in &areas {
            assert!(!area.label.is_empty());
            assert!(!area.description.is_empty());
        }
    }

    #[test]
    fn stack_area_labels_are_title_cased() {
        let areas = stack_areas();
        let backend = areas.iter().find(|a| a.id == "backend").unwrap();
        assert_eq!(backend.label, "Backend");

        let data_eng = areas.iter().find(|a| a.id == "data_engineering").unwrap();
        assert_eq!(data_eng.label, "Data Engineering");
    }

    #[test]
    fn validation_helpers() {
        assert!(is_valid_language("Rust"));
        assert!(!is_valid_language("COBOL"));
        assert!(is_valid_stack_area("frontend"));
        assert!(!is_valid_stack_area("blockchain"));
        assert!(is_valid_experience_level("beginner"));
        assert!(!is_valid_experience_level("wizard"));
    }

    #[test]
    fn normalize_skill_folds_aliases() {
        assert_eq!(normalize_skill("K8s").as_deref(), Some("kubernetes"));
        assert_eq!(normalize_skill("  ReactJS ").as_deref(), Some("react"));
        assert_eq!(normalize_skill("Postgres").as_deref(), Some("postgresql"));
        assert_eq!(normalize_skill("rust").as_deref(), Some("rust"));
        assert_eq!(normalize_skill("   "), None);
    }

    #[test]
    fn tech_keywords_fall_back_to_default() {
        assert_eq!(tech_keywords_for(None), DEFAULT_TECH_KEYWORDS);
        assert_eq!(tech_keywords_for(Some("Fortran")), DEFAULT_TECH_KEYWORDS);
        assert!(tech_keywords_for(Some("Rust")).contains(&"tokio"));
        assert!(tech_keywords_for(Some("python")).contains(&"django"));
    }
}
