//! Broker producers for repository and issue fan-out.
//!
//! The issue producer has two explicit bounds: a counting semaphore caps
//! concurrently outstanding publish futures (`MAX_INFLIGHT`), and each
//! publish runs under a deadline so a hung broker counts as a failure and
//! unblocks the producer. Partial failures are counted and logged; the
//! process does not exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::ingestion::broker::MessageBroker;
use crate::ingestion::{IssueRecord, RepositoryTask};
use crate::types::{AppError, Result};
use crate::utils::config::IngestionSettings;

const LOG_EVERY: usize = 500;

/// Outcome counters for one publishing pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub published: usize,
    pub deduped: usize,
    pub failed: usize,
}

enum Outcome {
    Published,
    Deduped,
    Failed,
}

// ============= Repository Fan-Out =============

/// Publishes one message per repository to the repo topic.
pub struct RepoProducer {
    broker: Arc<dyn MessageBroker>,
    topic: String,
}

impl RepoProducer {
    pub fn new(broker: Arc<dyn MessageBroker>, settings: &IngestionSettings) -> Self {
        Self {
            broker,
            topic: settings.repo_topic.clone(),
        }
    }

    /// Publish a repository list; returns counts. Failures are logged per
    /// repository and do not abort the pass.
    pub async fn publish_repos(&self, repos: &[RepositoryTask]) -> Result<PublishStats> {
        let mut stats = PublishStats::default();

        for (index, repo) in repos.iter().enumerate() {
            let payload = serde_json::to_string(repo)
                .map_err(|e| AppError::Internal(format!("repo task encode: {}", e)))?;

            match self.broker.publish(&self.topic, &payload, None).await {
                Ok(_) => stats.published += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(repo = %repo.full_name, error = %e, "repo task publish failed");
                }
            }

            if (index + 1) % 50 == 0 {
                tracing::info!(published = stats.published, topic = %self.topic, "repo fan-out progress");
            }
        }

        if stats.failed > 0 {
            tracing::warn!(
                published = stats.published,
                failed = stats.failed,
                "repo fan-out complete with failures"
            );
        } else {
            tracing::info!(published = stats.published, "repo fan-out complete");
        }

        Ok(stats)
    }
}

// ============= Issue Fan-Out =============

/// Publishes harvested issues to the issue topic with the content hash as
/// both a broker dedup attribute and a payload field.
pub struct IssueProducer {
    broker: Arc<dyn MessageBroker>,
    topic: String,
    max_inflight: usize,
    publish_timeout: Duration,
}

impl IssueProducer {
    pub fn new(broker: Arc<dyn MessageBroker>, settings: &IngestionSettings) -> Self {
        Self {
            broker,
            topic: settings.issue_topic.clone(),
            max_inflight: settings.publisher_max_inflight.max(1),
            publish_timeout: Duration::from_secs(settings.publish_timeout_secs),
        }
    }

    /// Drain the issue stream, publishing with bounded in-flight concurrency.
    pub async fn publish_stream(
        &self,
        mut issues: mpsc::Receiver<IssueRecord>,
    ) -> Result<PublishStats> {
        let semaphore = Arc::new(Semaphore::new(self.max_inflight));
        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        let mut stats = PublishStats::default();
        let mut seen = 0usize;

        while let Some(issue) = issues.recv().await {
            seen += 1;

            let payload = match serde_json::to_string(&issue) {
                Ok(payload) => payload,
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(node_id = %issue.node_id, error = %e, "issue encode failed");
                    continue;
                }
            };

            // The permit is acquired before spawning, so at most
            // `max_inflight` publish futures are outstanding.
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| AppError::Internal("publisher semaphore closed".to_string()))?;

            let broker = Arc::clone(&self.broker);
            let topic = self.topic.clone();
            let hash = issue.content_hash.clone();
            let node_id = issue.node_id.clone();
            let timeout = self.publish_timeout;

            tasks.spawn(async move {
                let _permit = permit;
                match tokio::time::timeout(timeout, broker.publish(&topic, &payload, Some(&hash)))
                    .await
                {
                    Ok(Ok(true)) => Outcome::Published,
                    Ok(Ok(false)) => Outcome::Deduped,
                    Ok(Err(e)) => {
                        tracing::error!(node_id = %node_id, error = %e, "issue publish failed");
                        Outcome::Failed
                    }
                    Err(_) => {
                        tracing::error!(node_id = %node_id, "issue publish timed out");
                        Outcome::Failed
                    }
                }
            });

            // Reap finished futures as we go so the set stays small.
            while let Some(joined) = tasks.try_join_next() {
                stats.record(joined);
            }

            if seen % LOG_EVERY == 0 {
                tracing::info!(seen, published = stats.published, "issue fan-out progress");
            }
        }

        while let Some(joined) = tasks.join_next().await {
            stats.record(joined);
        }

        if stats.failed > 0 {
            tracing::warn!(
                published = stats.published,
                deduped = stats.deduped,
                failed = stats.failed,
                "issue fan-out complete with failures"
            );
        } else {
            tracing::info!(
                published = stats.published,
                deduped = stats.deduped,
                "issue fan-out complete"
            );
        }

        Ok(stats)
    }
}

impl PublishStats {
    fn record(&mut self, joined: std::result::Result<Outcome, tokio::task::JoinError>) {
        match joined {
            Ok(Outcome::Published) => self.published += 1,
            Ok(Outcome::Deduped) => self.deduped += 1,
            Ok(Outcome::Failed) | Err(_) => self.failed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::broker::InMemoryBroker;
    use crate::ingestion::quality_gate::QScoreComponents;
    use crate::ingestion::IssueState;
    use crate::utils::config::Settings;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn issue(node_id: &str, hash: &str) -> IssueRecord {
        IssueRecord {
            node_id: node_id.to_string(),
            repo_id: "R_1".to_string(),
            title: "Test".to_string(),
            body_text: "Body".to_string(),
            labels: vec![],
            state: IssueState::Open,
            github_created_at: chrono::Utc::now(),
            q_components: QScoreComponents {
                has_code: true,
                has_template_headers: true,
                tech_stack_weight: 0.5,
            },
            q_score: 0.5,
            content_hash: hash.to_string(),
        }
    }

    fn stream_of(issues: Vec<IssueRecord>) -> mpsc::Receiver<IssueRecord> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for issue in issues {
                if tx.send(issue).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    #[tokio::test]
    async fn publish_stream_dedups_identical_hashes() {
        let broker = Arc::new(InMemoryBroker::new());
        let settings = Settings::default().ingestion;
        let producer = IssueProducer::new(broker.clone(), &settings);

        let stats = producer
            .publish_stream(stream_of(vec![
                issue("I_1", "hash-a"),
                issue("I_1", "hash-a"),
                issue("I_2", "hash-b"),
            ]))
            .await
            .unwrap();

        assert_eq!(stats.published, 2);
        assert_eq!(stats.deduped, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(broker.depth(&settings.issue_topic), 2);
    }

    /// Broker whose publish never completes; used to drive the timeout path.
    struct HungBroker {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl MessageBroker for HungBroker {
        async fn publish(&self, _t: &str, _p: &str, _d: Option<&str>) -> Result<bool> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            unreachable!()
        }

        async fn pull(
            &self,
            _t: &str,
            _g: &str,
            _c: &str,
            _m: usize,
        ) -> Result<Vec<crate::ingestion::broker::BrokerMessage>> {
            Ok(vec![])
        }

        async fn ack(
            &self,
            _t: &str,
            _g: &str,
            _m: &crate::ingestion::broker::BrokerMessage,
        ) -> Result<()> {
            Ok(())
        }

        async fn nack(
            &self,
            _t: &str,
            _g: &str,
            _m: &crate::ingestion::broker::BrokerMessage,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn hung_publish_hits_timeout_and_counts_as_failure() {
        let broker = Arc::new(HungBroker {
            attempts: AtomicUsize::new(0),
        });
        let mut settings = Settings::default().ingestion;
        settings.publish_timeout_secs = 0;

        let producer = IssueProducer::new(broker.clone(), &settings);
        let stats = producer
            .publish_stream(stream_of(vec![issue("I_1", "hash-a")]))
            .await
            .unwrap();

        assert_eq!(stats.published, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(broker.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repo_producer_publishes_all_tasks() {
        let broker = Arc::new(InMemoryBroker::new());
        let settings = Settings::default().ingestion;
        let producer = RepoProducer::new(broker.clone(), &settings);

        let repos: Vec<RepositoryTask> = (0..3)
            .map(|i| RepositoryTask {
                node_id: format!("R_{}", i),
                full_name: format!("o/r{}", i),
                primary_language: None,
                stargazer_count: 10,
                topics: vec![],
            })
            .collect();

        let stats = producer.publish_repos(&repos).await.unwrap();
        assert_eq!(stats.published, 3);
        assert_eq!(broker.depth(&settings.repo_topic), 3);
    }
}
