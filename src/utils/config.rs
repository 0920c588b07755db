use serde::Deserialize;
use std::env;

use crate::types::{AppError, Result};

/// Process-wide settings, loaded once at startup from environment variables
/// and passed by reference afterwards. `.env` files are honored in
/// development via `dotenvy`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub github: GitHubSettings,
    pub ingestion: IngestionSettings,
    pub search: SearchSettings,
    pub events: EventSettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// "production" enables strict CORS validation.
    pub environment: String,
    /// Comma-separated allowed CORS origins. "*" is rejected in production.
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL. The server requires the pgvector extension.
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Redis connection URL. Optional: callers that can degrade (rate
    /// limiter, stats cache) fall back to in-process storage when absent.
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSettings {
    /// API token for issue/repository harvesting.
    pub token: String,
    /// API base URL, overridable for tests.
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionSettings {
    /// Minimum stargazer count for Scout discovery.
    pub scout_min_stars: u32,
    /// Upper bound on repositories discovered per Scout run.
    pub scout_max_repos: usize,
    /// Per-repository cap on harvested issues.
    pub max_issues_per_repo: usize,
    /// Concurrent repositories gathered at once.
    pub gatherer_concurrency: usize,
    /// Broker stream carrying repository tasks.
    pub repo_topic: String,
    /// Broker stream carrying harvested issues.
    pub issue_topic: String,
    /// Consumer group name for the embedder worker.
    pub consumer_group: String,
    /// Cap on concurrently outstanding publish futures.
    pub publisher_max_inflight: usize,
    /// Per-publish deadline in seconds.
    pub publish_timeout_secs: u64,
    /// Messages pulled per embedder batch.
    pub embedder_batch_size: usize,
    /// Janitor skips pruning below this row count.
    pub janitor_min_issues: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSettings {
    /// Stage-1 cache TTL in seconds.
    pub cache_ttl_secs: u64,
    /// Search context (interact window) TTL in seconds.
    pub context_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventSettings {
    /// Batch context TTL in seconds.
    pub batch_context_ttl_secs: u64,
    /// Event-id dedup key TTL in seconds.
    pub dedup_ttl_secs: u64,
    /// Flush job time budget in seconds.
    pub flush_max_seconds: u64,
    /// Events popped per flush loop.
    pub flush_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Requests allowed per window per (ip, flow) key.
    pub requests_per_window: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::Configuration(format!("{} is not a valid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Configuration("DATABASE_URL must be set".to_string()))?;

        let github_token = env::var("GITHUB_TOKEN").unwrap_or_default();

        let cors_origins: Vec<String> = env_or("CORS_ORIGINS", "http://localhost:3000")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Settings {
            server: ServerSettings {
                host: env_or("HOST", "0.0.0.0"),
                port: parse_env("PORT", 8000)?,
                environment: env_or("ENVIRONMENT", "development"),
                cors_origins,
            },
            database: DatabaseSettings {
                url: database_url,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            cache: CacheSettings {
                redis_url: env::var("REDIS_URL").ok(),
            },
            github: GitHubSettings {
                token: github_token,
                api_base: env_or("GITHUB_API_BASE", "https://api.github.com"),
            },
            ingestion: IngestionSettings {
                scout_min_stars: parse_env("SCOUT_MIN_STARS", 500)?,
                scout_max_repos: parse_env("SCOUT_MAX_REPOS", 500)?,
                max_issues_per_repo: parse_env("MAX_ISSUES_PER_REPO", 100)?,
                gatherer_concurrency: parse_env("GATHERER_CONCURRENCY", 10)?,
                repo_topic: env_or("REPO_TOPIC", "gitmatch:repo-tasks"),
                issue_topic: env_or("ISSUE_TOPIC", "gitmatch:issues"),
                consumer_group: env_or("ISSUE_CONSUMER_GROUP", "embedder"),
                publisher_max_inflight: parse_env("PUBLISHER_MAX_INFLIGHT", 1000)?,
                publish_timeout_secs: parse_env("PUBLISH_TIMEOUT_SECS", 30)?,
                embedder_batch_size: parse_env("EMBEDDER_BATCH_SIZE", 50)?,
                janitor_min_issues: parse_env("JANITOR_MIN_ISSUES", 1000)?,
            },
            search: SearchSettings {
                cache_ttl_secs: parse_env("SEARCH_CACHE_TTL_SECS", 300)?,
                context_ttl_secs: parse_env("SEARCH_CONTEXT_TTL_SECS", 1800)?,
            },
            events: EventSettings {
                batch_context_ttl_secs: parse_env("RECO_BATCH_CONTEXT_TTL_SECS", 1800)?,
                dedup_ttl_secs: parse_env("RECO_EVENT_DEDUP_TTL_SECS", 86_400)?,
                flush_max_seconds: parse_env("RECO_FLUSH_MAX_SECONDS", 60)?,
                flush_batch_size: parse_env("RECO_EVENTS_FLUSH_BATCH_SIZE", 1000)?,
            },
            rate_limit: RateLimitSettings {
                requests_per_window: parse_env("RATE_LIMIT_REQUESTS", 60)?,
                window_secs: parse_env("RATE_LIMIT_WINDOW_SECS", 60)?,
            },
        })
    }

    /// Check if running with production hardening enabled.
    pub fn is_production(&self) -> bool {
        self.server.environment.eq_ignore_ascii_case("production")
    }

    /// Reject wildcard CORS origins in production. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.is_production() && self.server.cors_origins.iter().any(|o| o == "*") {
            return Err(AppError::Configuration(
                "wildcard CORS origin is not allowed in production".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8000,
                environment: "development".to_string(),
                cors_origins: vec!["http://localhost:3000".to_string()],
            },
            database: DatabaseSettings {
                url: "postgres://localhost/gitmatch".to_string(),
                max_connections: 10,
            },
            cache: CacheSettings { redis_url: None },
            github: GitHubSettings {
                token: String::new(),
                api_base: "https://api.github.com".to_string(),
            },
            ingestion: IngestionSettings {
                scout_min_stars: 500,
                scout_max_repos: 500,
                max_issues_per_repo: 100,
                gatherer_concurrency: 10,
                repo_topic: "gitmatch:repo-tasks".to_string(),
                issue_topic: "gitmatch:issues".to_string(),
                consumer_group: "embedder".to_string(),
                publisher_max_inflight: 1000,
                publish_timeout_secs: 30,
                embedder_batch_size: 50,
                janitor_min_issues: 1000,
            },
            search: SearchSettings {
                cache_ttl_secs: 300,
                context_ttl_secs: 1800,
            },
            events: EventSettings {
                batch_context_ttl_secs: 1800,
                dedup_ttl_secs: 86_400,
                flush_max_seconds: 60,
                flush_batch_size: 1000,
            },
            rate_limit: RateLimitSettings {
                requests_per_window: 60,
                window_secs: 60,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_pass_validation() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert!(!settings.is_production());
    }

    #[test]
    fn production_rejects_wildcard_origin() {
        let mut settings = Settings::default();
        settings.server.environment = "production".to_string();
        settings.server.cors_origins = vec!["*".to_string()];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn production_accepts_explicit_origins() {
        let mut settings = Settings::default();
        settings.server.environment = "production".to_string();
        settings.server.cors_origins = vec!["https://gitmatch.dev".to_string()];
        assert!(settings.validate().is_ok());
    }
}
