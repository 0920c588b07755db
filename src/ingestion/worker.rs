//! Embedder worker: consumes issue messages, embeds, and persists.
//!
//! The worker pulls message batches from the issue topic. The shutdown flag
//! is checked before each message; once set, every remaining message in the
//! batch is nacked and the worker exits without processing further. A
//! processing error nacks the message for redelivery; repeated failures fall
//! through to the broker's dead-letter list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::PgPool;

use crate::embedding;
use crate::ingestion::broker::{BrokerMessage, MessageBroker};
use crate::ingestion::{persistence, IssueRecord};
use crate::types::{AppError, Result};
use crate::utils::config::IngestionSettings;

/// Idle delay between empty pulls.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of processing one issue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Content changed (or new): embedded and upserted.
    Embedded,
    /// Hash unchanged and embedding present: nothing to do.
    SkippedUnchanged,
}

/// Seam between the consume loop and the embed-and-persist step, so the
/// loop's shutdown and ack/nack behavior is testable in isolation.
#[async_trait]
pub trait IssueProcessor: Send + Sync {
    async fn process(&self, record: &IssueRecord) -> Result<ProcessOutcome>;
}

/// Production processor: idempotency check, embed, transactional upsert.
pub struct DbIssueProcessor {
    pool: PgPool,
}

impl DbIssueProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IssueProcessor for DbIssueProcessor {
    async fn process(&self, record: &IssueRecord) -> Result<ProcessOutcome> {
        // Idempotency: unchanged content with an embedding needs no work.
        if let Some(stored) = persistence::fetch_content_state(&self.pool, &record.node_id).await? {
            if stored.content_hash == record.content_hash && stored.has_embedding {
                return Ok(ProcessOutcome::SkippedUnchanged);
            }
        }

        let text = format!("{}\n\n{}", record.title, record.body_text);
        let vector = embedding::embed_query(&text)
            .await
            .ok_or_else(|| AppError::Internal("embedding unavailable".to_string()))?;
        embedding::assert_vector_dim(&vector)?;

        persistence::upsert_issue(&self.pool, record, Vector::from(vector)).await?;

        if let Err(e) = persistence::mark_pending_completed(&self.pool, &record.node_id).await {
            tracing::warn!(node_id = %record.node_id, error = %e, "staging completion mark failed");
        }

        Ok(ProcessOutcome::Embedded)
    }
}

/// Counters for one worker run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub embedded: usize,
    pub skipped: usize,
    pub nacked: usize,
}

pub struct EmbedderWorker<P: IssueProcessor> {
    broker: Arc<dyn MessageBroker>,
    processor: P,
    topic: String,
    group: String,
    consumer: String,
    batch_size: usize,
    shutdown: Arc<AtomicBool>,
}

impl<P: IssueProcessor> EmbedderWorker<P> {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        processor: P,
        settings: &IngestionSettings,
        consumer: String,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            broker,
            processor,
            topic: settings.issue_topic.clone(),
            group: settings.consumer_group.clone(),
            consumer,
            batch_size: settings.embedder_batch_size.max(1),
            shutdown,
        }
    }

    fn should_stop(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Pull and process one batch. Returns the number of messages pulled.
    pub async fn run_once(&self, stats: &mut WorkerStats) -> Result<usize> {
        let messages = self
            .broker
            .pull(&self.topic, &self.group, &self.consumer, self.batch_size)
            .await?;
        let pulled = messages.len();

        for message in &messages {
            // Shutdown is checked before each message; remaining messages go
            // back for redelivery by another worker.
            if self.should_stop() {
                self.nack_quietly(message, stats).await;
                continue;
            }

            match self.process_message(message).await {
                Ok(ProcessOutcome::Embedded) => {
                    stats.embedded += 1;
                    self.ack_quietly(message).await;
                }
                Ok(ProcessOutcome::SkippedUnchanged) => {
                    stats.skipped += 1;
                    self.ack_quietly(message).await;
                }
                Err(e) => {
                    tracing::warn!(id = %message.id, error = %e, "issue processing failed");
                    self.nack_quietly(message, stats).await;
                }
            }
        }

        Ok(pulled)
    }

    /// Consume until the shutdown flag is set.
    pub async fn run(&self) -> Result<WorkerStats> {
        let mut stats = WorkerStats::default();

        while !self.should_stop() {
            let pulled = self.run_once(&mut stats).await?;
            if pulled == 0 && !self.should_stop() {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        tracing::info!(
            embedded = stats.embedded,
            skipped = stats.skipped,
            nacked = stats.nacked,
            "embedder worker stopped"
        );
        Ok(stats)
    }

    async fn process_message(&self, message: &BrokerMessage) -> Result<ProcessOutcome> {
        let record: IssueRecord = serde_json::from_str(&message.payload)
            .map_err(|e| AppError::InvalidInput(format!("issue message decode: {}", e)))?;
        self.processor.process(&record).await
    }

    async fn ack_quietly(&self, message: &BrokerMessage) {
        if let Err(e) = self.broker.ack(&self.topic, &self.group, message).await {
            tracing::error!(id = %message.id, error = %e, "ack failed");
        }
    }

    async fn nack_quietly(&self, message: &BrokerMessage, stats: &mut WorkerStats) {
        stats.nacked += 1;
        if let Err(e) = self.broker.nack(&self.topic, &self.group, message).await {
            tracing::error!(id = %message.id, error = %e, "nack failed");
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
    use parking_lot::Mutex;

    fn record(node_id: &str) -> IssueRecord {
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
            content_hash: format!("hash-{}", node_id),
        }
    }

    /// Scripted processor: records what it saw and replays fixed outcomes.
    struct StubProcessor {
        seen: Mutex<Vec<String>>,
        outcome: fn(&IssueRecord) -> Result<ProcessOutcome>,
    }

    #[async_trait]
    impl IssueProcessor for StubProcessor {
        async fn process(&self, record: &IssueRecord) -> Result<ProcessOutcome> {
            self.seen.lock().push(record.node_id.clone());
            (self.outcome)(record)
        }
    }

    async fn seed(broker: &InMemoryBroker, topic: &str, ids: &[&str]) {
        for id in ids {
            let payload = serde_json::to_string(&record(id)).unwrap();
            broker.publish(topic, &payload, None).await.unwrap();
        }
    }

    #[tokio::test]
    async fn processes_and_acks_a_batch() {
        let settings = Settings::default().ingestion;
        let broker = Arc::new(InMemoryBroker::new());
        seed(&broker, &settings.issue_topic, &["I_1", "I_2"]).await;

        let worker = EmbedderWorker::new(
            broker.clone(),
            StubProcessor {
                seen: Mutex::new(vec![]),
                outcome: |_| Ok(ProcessOutcome::Embedded),
            },
            &settings,
            "test-consumer".to_string(),
            Arc::new(AtomicBool::new(false)),
        );

        let mut stats = WorkerStats::default();
        let pulled = worker.run_once(&mut stats).await.unwrap();

        assert_eq!(pulled, 2);
        assert_eq!(stats.embedded, 2);
        assert_eq!(stats.nacked, 0);
        assert_eq!(broker.depth(&settings.issue_topic), 0);
    }

    #[tokio::test]
    async fn shutdown_mid_batch_nacks_remaining() {
        let settings = Settings::default().ingestion;
        let broker = Arc::new(InMemoryBroker::new());
        seed(&broker, &settings.issue_topic, &["I_1", "I_2", "I_3"]).await;

        let shutdown = Arc::new(AtomicBool::new(false));

        // The first processed message trips the shutdown flag, so messages
        // two and three must be nacked without processing.
        let flag = Arc::clone(&shutdown);
        struct TrippingProcessor {
            flag: Arc<AtomicBool>,
            seen: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl IssueProcessor for TrippingProcessor {
            async fn process(&self, record: &IssueRecord) -> Result<ProcessOutcome> {
                self.seen.lock().push(record.node_id.clone());
                self.flag.store(true, Ordering::SeqCst);
                Ok(ProcessOutcome::Embedded)
            }
        }

        let processor = TrippingProcessor {
            flag,
            seen: Mutex::new(vec![]),
        };

        let worker = EmbedderWorker::new(
            broker.clone(),
            processor,
            &settings,
            "test-consumer".to_string(),
            shutdown,
        );

        let mut stats = WorkerStats::default();
        worker.run_once(&mut stats).await.unwrap();

        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.nacked, 2);
        assert_eq!(worker.processor.seen.lock().as_slice(), &["I_1".to_string()]);
        // Nacked messages remain queued for redelivery.
        assert_eq!(broker.depth(&settings.issue_topic), 2);
    }

    #[tokio::test]
    async fn processing_error_nacks_for_redelivery() {
        let settings = Settings::default().ingestion;
        let broker = Arc::new(InMemoryBroker::new());
        seed(&broker, &settings.issue_topic, &["I_1"]).await;

        let worker = EmbedderWorker::new(
            broker.clone(),
            StubProcessor {
                seen: Mutex::new(vec![]),
                outcome: |_| Err(AppError::Internal("embedding unavailable".to_string())),
            },
            &settings,
            "test-consumer".to_string(),
            Arc::new(AtomicBool::new(false)),
        );

        let mut stats = WorkerStats::default();
        worker.run_once(&mut stats).await.unwrap();

        assert_eq!(stats.embedded, 0);
        assert_eq!(stats.nacked, 1);
        assert_eq!(broker.depth(&settings.issue_topic), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_nacked_not_fatal() {
        let settings = Settings::default().ingestion;
        let broker = Arc::new(InMemoryBroker::new());
        broker
            .publish(&settings.issue_topic, "not json", None)
            .await
            .unwrap();

        let worker = EmbedderWorker::new(
            broker.clone(),
            StubProcessor {
                seen: Mutex::new(vec![]),
                outcome: |_| Ok(ProcessOutcome::Embedded),
            },
            &settings,
            "test-consumer".to_string(),
            Arc::new(AtomicBool::new(false)),
        );

        let mut stats = WorkerStats::default();
        let pulled = worker.run_once(&mut stats).await.unwrap();

        assert_eq!(pulled, 1);
        assert_eq!(stats.nacked, 1);
    }
}
