//! GitHub REST API client for repository discovery and issue harvesting.
//!
//! Every request carries an explicit deadline; pagination is capped by the
//! caller. Pull requests surfaced by the issues endpoint are filtered out.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;

use crate::types::{AppError, Result};
use crate::utils::config::GitHubSettings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PER_PAGE: usize = 100;

/// Thin typed wrapper over the GitHub REST API.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct SearchRepositoriesResponse {
    items: Vec<RepoItem>,
}

#[derive(Debug, Deserialize)]
pub struct RepoItem {
    pub node_id: String,
    pub full_name: String,
    pub language: Option<String>,
    pub stargazers_count: i32,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct IssueItem {
    pub node_id: String,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub labels: Vec<LabelItem>,
    /// Present when the "issue" is actually a pull request.
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct LabelItem {
    pub name: String,
}

impl GitHubClient {
    pub fn new(settings: &GitHubSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("gitmatch-ingestion"));
        if !settings.token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", settings.token))
                .map_err(|_| AppError::Configuration("invalid GitHub token".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Configuration(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Page through repository search results above a star floor.
    pub async fn search_repositories(&self, min_stars: u32, max_repos: usize) -> Result<Vec<RepoItem>> {
        let mut items = Vec::new();
        let mut page = 1usize;

        while items.len() < max_repos {
            let url = format!("{}/search/repositories", self.api_base);
            let response = self
                .http
                .get(&url)
                .query(&[
                    ("q", format!("stars:>={} is:public archived:false", min_stars)),
                    ("sort", "stars".to_string()),
                    ("order", "desc".to_string()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await
                .map_err(|e| AppError::External(format!("repository search: {}", e)))?;

            if !response.status().is_success() {
                return Err(AppError::External(format!(
                    "repository search returned {}",
                    response.status()
                )));
            }

            let body: SearchRepositoriesResponse = response
                .json()
                .await
                .map_err(|e| AppError::External(format!("repository search decode: {}", e)))?;

            if body.items.is_empty() {
                break;
            }

            let received = body.items.len();
            items.extend(body.items);
            if received < PER_PAGE {
                break;
            }
            page += 1;
        }

        items.truncate(max_repos);
        Ok(items)
    }

    /// Page through a repository's issues, newest first, up to `max_issues`
    /// actual issues (pull requests do not count against the cap).
    pub async fn list_issues(&self, full_name: &str, max_issues: usize) -> Result<Vec<IssueItem>> {
        let mut issues = Vec::new();
        let mut page = 1usize;

        while issues.len() < max_issues {
            let url = format!("{}/repos/{}/issues", self.api_base, full_name);
            let response = self
                .http
                .get(&url)
                .query(&[
                    ("state", "all".to_string()),
                    ("sort", "created".to_string()),
                    ("direction", "desc".to_string()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await
                .map_err(|e| AppError::External(format!("issue list: {}", e)))?;

            if !response.status().is_success() {
                return Err(AppError::External(format!(
                    "issue list for {} returned {}",
                    full_name,
                    response.status()
                )));
            }

            let batch: Vec<IssueItem> = response
                .json()
                .await
                .map_err(|e| AppError::External(format!("issue list decode: {}", e)))?;

            if batch.is_empty() {
                break;
            }

            let received = batch.len();
            issues.extend(batch.into_iter().filter(|i| i.pull_request.is_none()));
            if received < PER_PAGE {
                break;
            }
            page += 1;
        }

        issues.truncate(max_issues);
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::GitHubSettings;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer) -> GitHubSettings {
        GitHubSettings {
            token: "test-token".to_string(),
            api_base: server.uri(),
        }
    }

    #[tokio::test]
    async fn search_repositories_decodes_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/repositories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "node_id": "R_1",
                    "full_name": "rust-lang/rust",
                    "language": "Rust",
                    "stargazers_count": 90000,
                    "topics": ["compiler"]
                }]
            })))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&settings_for(&server)).unwrap();
        let repos = client.search_repositories(500, 10).await.unwrap();

        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].full_name, "rust-lang/rust");
        assert_eq!(repos[0].topics, vec!["compiler"]);
    }

    #[tokio::test]
    async fn list_issues_filters_pull_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/rust-lang/rust/issues"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "node_id": "I_1",
                    "title": "real issue",
                    "body": "body",
                    "state": "open",
                    "created_at": "2026-01-01T00:00:00Z",
                    "labels": [{"name": "bug"}]
                },
                {
                    "node_id": "PR_1",
                    "title": "a pull request",
                    "body": null,
                    "state": "open",
                    "created_at": "2026-01-01T00:00:00Z",
                    "labels": [],
                    "pull_request": {"url": "https://example.com"}
                }
            ])))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&settings_for(&server)).unwrap();
        let issues = client.list_issues("rust-lang/rust", 50).await.unwrap();

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].node_id, "I_1");
        assert_eq!(issues[0].labels[0].name, "bug");
    }

    #[tokio::test]
    async fn upstream_error_maps_to_external() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/repositories"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&settings_for(&server)).unwrap();
        let result = client.search_repositories(500, 10).await;
        assert!(matches!(result, Err(AppError::External(_))));
    }
}
