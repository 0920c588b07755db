//! Gather: per-repository issue harvesting.
//!
//! Consumes repository tasks, pulls issues via paginated API calls capped by
//! `max_issues_per_repo`, computes Q-components on the fly, drops junk rows,
//! and emits a lazy, finite, non-restartable stream of issue records.
//! Concurrency across repositories is bounded by `gatherer_concurrency`.

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::ingestion::github::GitHubClient;
use crate::ingestion::quality_gate::{self, content_hash};
use crate::ingestion::{IssueRecord, IssueState, RepositoryTask};
use crate::utils::config::IngestionSettings;

/// Bounded queue between harvesting tasks and the consumer. Keeps memory flat
/// when the downstream publisher is slower than the API.
const STREAM_BUFFER: usize = 256;

pub struct Gatherer {
    client: GitHubClient,
    max_issues_per_repo: usize,
    concurrency: usize,
}

impl Gatherer {
    pub fn new(client: GitHubClient, settings: &IngestionSettings) -> Self {
        Self {
            client,
            max_issues_per_repo: settings.max_issues_per_repo,
            concurrency: settings.gatherer_concurrency.max(1),
        }
    }

    /// Harvest all repositories, streaming issue records as they are gated.
    ///
    /// The returned receiver is a one-shot sequence: once drained it cannot
    /// be replayed. Per-repo failures are logged and skipped; they do not
    /// poison the stream.
    pub fn harvest_issues(&self, repos: Vec<RepositoryTask>) -> mpsc::Receiver<IssueRecord> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let client = self.client.clone();
        let max_issues = self.max_issues_per_repo;
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        tokio::spawn(async move {
            let mut tasks = JoinSet::new();

            for repo in repos {
                let client = client.clone();
                let tx = tx.clone();
                let semaphore = Arc::clone(&semaphore);

                tasks.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    harvest_one(&client, &repo, max_issues, &tx).await;
                });
            }

            // Keep the stream open until every repo task has finished.
            while tasks.join_next().await.is_some() {}
        });

        rx
    }
}

async fn harvest_one(
    client: &GitHubClient,
    repo: &RepositoryTask,
    max_issues: usize,
    tx: &mpsc::Sender<IssueRecord>,
) {
    let items = match client.list_issues(&repo.full_name, max_issues).await {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(repo = %repo.full_name, error = %e, "issue harvest failed");
            return;
        }
    };

    let mut gated = 0usize;
    let mut dropped = 0usize;

    for item in items {
        let body = item.body.unwrap_or_default();
        if quality_gate::is_junk(&body) {
            dropped += 1;
            continue;
        }

        let state = match IssueState::from_str(&item.state) {
            Ok(state) => state,
            Err(_) => {
                dropped += 1;
                continue;
            }
        };

        let components = quality_gate::score_components(
            &item.title,
            &body,
            repo.primary_language.as_deref(),
        );
        let q_score = quality_gate::q_score(&components);
        let hash = content_hash(&item.node_id, &item.title, &body);

        let record = IssueRecord {
            node_id: item.node_id,
            repo_id: repo.node_id.clone(),
            title: item.title,
            body_text: body,
            labels: item.labels.into_iter().map(|l| l.name).collect(),
            state,
            github_created_at: item.created_at,
            q_components: components,
            q_score,
            content_hash: hash,
        };

        if tx.send(record).await.is_err() {
            // Consumer dropped the stream; stop producing.
            return;
        }
        gated += 1;
    }

    tracing::debug!(
        repo = %repo.full_name,
        gated,
        dropped,
        "repository harvest complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::{GitHubSettings, IngestionSettings, Settings};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_settings() -> IngestionSettings {
        let mut settings = Settings::default().ingestion;
        settings.max_issues_per_repo = 50;
        settings.gatherer_concurrency = 2;
        settings
    }

    fn repo_task(node_id: &str, full_name: &str) -> RepositoryTask {
        RepositoryTask {
            node_id: node_id.to_string(),
            full_name: full_name.to_string(),
            primary_language: Some("Rust".to_string()),
            stargazer_count: 1000,
            topics: vec![],
        }
    }

    #[tokio::test]
    async fn harvest_streams_gated_issues_and_drops_junk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "node_id": "I_1",
                    "title": "Panic in parser",
                    "body": "## Steps to reproduce\nRun with `--strict` and the parser panics.",
                    "state": "open",
                    "created_at": "2026-01-01T00:00:00Z",
                    "labels": [{"name": "bug"}]
                },
                {
                    "node_id": "I_2",
                    "title": "Me too",
                    "body": "+1",
                    "state": "open",
                    "created_at": "2026-01-01T00:00:00Z",
                    "labels": []
                }
            ])))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&GitHubSettings {
            token: String::new(),
            api_base: server.uri(),
        })
        .unwrap();

        let gatherer = Gatherer::new(client, &test_settings());
        let mut stream = gatherer.harvest_issues(vec![repo_task("R_1", "o/r")]);

        let mut records = Vec::new();
        while let Some(record) = stream.recv().await {
            records.push(record);
        }

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].node_id, "I_1");
        assert_eq!(records[0].repo_id, "R_1");
        assert!(records[0].q_components.has_code);
        assert!(records[0].q_components.has_template_headers);
        assert_eq!(records[0].content_hash.len(), 64);
    }

    #[tokio::test]
    async fn harvest_skips_failing_repositories() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/bad/issues"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/o/good/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "node_id": "I_9",
                    "title": "Broken link checker misses anchors",
                    "body": "The link checker does not resolve intra-page anchors at all.",
                    "state": "closed",
                    "created_at": "2026-01-02T00:00:00Z",
                    "labels": []
                }
            ])))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&GitHubSettings {
            token: String::new(),
            api_base: server.uri(),
        })
        .unwrap();

        let gatherer = Gatherer::new(client, &test_settings());
        let mut stream = gatherer.harvest_issues(vec![
            repo_task("R_bad", "o/bad"),
            repo_task("R_good", "o/good"),
        ]);

        let mut records = Vec::new();
        while let Some(record) = stream.recv().await {
            records.push(record);
        }

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].node_id, "I_9");
        assert_eq!(records[0].state, IssueState::Closed);
    }
}
