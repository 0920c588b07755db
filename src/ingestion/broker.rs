//! Message broker seam for pipeline fan-out.
//!
//! The pipeline publishes repository tasks and harvested issues to named
//! topics and consumes them with at-least-once delivery. Two backends:
//!
//! - [`RedisStreamBroker`]: Redis Streams with consumer groups. Unacked
//!   messages are reclaimed on later pulls; repeated failures route to a
//!   per-topic dead-letter list.
//! - [`InMemoryBroker`]: process-local backend for development and tests.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::Value;

use crate::db::Cache;
use crate::types::{AppError, Result};

/// Deliveries before a message is routed to the dead-letter list.
pub const MAX_DELIVERIES: u64 = 5;

/// Idle time before an unacked message is reclaimed by another consumer.
const RECLAIM_IDLE_MS: u64 = 30_000;

/// TTL for at-broker publish dedup keys.
const PUBLISH_DEDUP_TTL_SECS: u64 = 21_600;

/// A message pulled from a topic, awaiting ack or nack.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub id: String,
    pub payload: String,
}

/// Persistent topic-based message bus.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a payload. When `dedup_key` is given and a message with the
    /// same key was recently published, the publish is skipped and `false`
    /// is returned.
    async fn publish(&self, topic: &str, payload: &str, dedup_key: Option<&str>) -> Result<bool>;

    /// Pull up to `max` messages for a consumer group, including reclaimed
    /// messages from dead consumers.
    async fn pull(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        max: usize,
    ) -> Result<Vec<BrokerMessage>>;

    /// Acknowledge successful processing.
    async fn ack(&self, topic: &str, group: &str, message: &BrokerMessage) -> Result<()>;

    /// Negative-acknowledge for redelivery. After [`MAX_DELIVERIES`] the
    /// message falls through to the topic's dead-letter list.
    async fn nack(&self, topic: &str, group: &str, message: &BrokerMessage) -> Result<()>;
}

// ============= Redis Streams Backend =============

pub struct RedisStreamBroker {
    cache: Cache,
}

impl RedisStreamBroker {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    async fn ensure_group(&self, topic: &str, group: &str) -> Result<()> {
        let mut conn = self.cache.connection().await?;
        let created: std::result::Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => Ok(()),
            // BUSYGROUP: the group already exists, which is the steady state.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn attempts_key(topic: &str, group: &str) -> String {
        format!("{}:{}:attempts", topic, group)
    }

    fn dead_letter_key(topic: &str) -> String {
        format!("{}:dead", topic)
    }
}

/// Walk a stream reply (`[[id, [field, value, ...]], ...]`) into messages.
fn parse_stream_entries(value: &Value) -> Vec<BrokerMessage> {
    let mut messages = Vec::new();

    let Value::Array(entries) = value else {
        return messages;
    };

    for entry in entries {
        let Value::Array(pair) = entry else { continue };
        let (Some(id_value), Some(fields_value)) = (pair.first(), pair.get(1)) else {
            continue;
        };
        let Some(id) = value_as_string(id_value) else {
            continue;
        };
        let Value::Array(fields) = fields_value else {
            continue;
        };

        let mut payload = None;
        let mut index = 0;
        while index + 1 < fields.len() {
            if value_as_string(&fields[index]).as_deref() == Some("payload") {
                payload = value_as_string(&fields[index + 1]);
                break;
            }
            index += 2;
        }

        if let Some(payload) = payload {
            messages.push(BrokerMessage { id, payload });
        }
    }

    messages
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

#[async_trait]
impl MessageBroker for RedisStreamBroker {
    async fn publish(&self, topic: &str, payload: &str, dedup_key: Option<&str>) -> Result<bool> {
        if let Some(key) = dedup_key {
            let dedup = format!("{}:dedup:{}", topic, key);
            if !self.cache.set_nx_ex(&dedup, "1", PUBLISH_DEDUP_TTL_SECS).await? {
                return Ok(false);
            }
        }

        let mut conn = self.cache.connection().await?;
        let _: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(true)
    }

    async fn pull(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        max: usize,
    ) -> Result<Vec<BrokerMessage>> {
        self.ensure_group(topic, group).await?;
        let mut conn = self.cache.connection().await?;

        // First reclaim messages another consumer pulled but never acked.
        let reclaimed: Value = redis::cmd("XAUTOCLAIM")
            .arg(topic)
            .arg(group)
            .arg(consumer)
            .arg(RECLAIM_IDLE_MS)
            .arg("0-0")
            .arg("COUNT")
            .arg(max)
            .query_async(&mut conn)
            .await?;

        let mut messages = match &reclaimed {
            Value::Array(parts) if parts.len() >= 2 => parse_stream_entries(&parts[1]),
            _ => Vec::new(),
        };

        if messages.len() < max {
            let fresh: Value = redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(group)
                .arg(consumer)
                .arg("COUNT")
                .arg(max - messages.len())
                .arg("STREAMS")
                .arg(topic)
                .arg(">")
                .query_async(&mut conn)
                .await?;

            // Reply shape: [[stream, [[id, fields], ...]]]
            if let Value::Array(streams) = &fresh {
                for stream in streams {
                    if let Value::Array(pair) = stream {
                        if let Some(entries) = pair.get(1) {
                            messages.extend(parse_stream_entries(entries));
                        }
                    }
                }
            }
        }

        Ok(messages)
    }

    async fn ack(&self, topic: &str, group: &str, message: &BrokerMessage) -> Result<()> {
        let mut conn = self.cache.connection().await?;
        let _: i64 = redis::cmd("XACK")
            .arg(topic)
            .arg(group)
            .arg(&message.id)
            .query_async(&mut conn)
            .await?;
        let _: i64 = redis::cmd("XDEL")
            .arg(topic)
            .arg(&message.id)
            .query_async(&mut conn)
            .await?;
        let _: i64 = redis::cmd("HDEL")
            .arg(Self::attempts_key(topic, group))
            .arg(&message.id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn nack(&self, topic: &str, group: &str, message: &BrokerMessage) -> Result<()> {
        let mut conn = self.cache.connection().await?;
        let attempts: u64 = redis::cmd("HINCRBY")
            .arg(Self::attempts_key(topic, group))
            .arg(&message.id)
            .arg(1)
            .query_async(&mut conn)
            .await?;

        if attempts >= MAX_DELIVERIES {
            tracing::warn!(topic, id = %message.id, attempts, "message dead-lettered");
            self.cache
                .rpush(&Self::dead_letter_key(topic), &message.payload)
                .await?;
            self.ack(topic, group, message).await?;
        }
        // Otherwise leave the message pending; a later pull reclaims it.
        Ok(())
    }
}

// ============= In-Memory Backend =============

#[derive(Default)]
struct MemoryTopic {
    queue: VecDeque<(String, String)>,
    pending: HashMap<String, String>,
    attempts: HashMap<String, u64>,
    dedup: HashSet<String>,
    dead: Vec<String>,
    next_id: u64,
}

/// Process-local broker for development and tests. Mirrors the delivery
/// semantics of the Redis backend (ack, redelivery on nack, dead-letter).
#[derive(Default)]
pub struct InMemoryBroker {
    topics: Mutex<HashMap<String, MemoryTopic>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dead-lettered payloads for a topic.
    pub fn dead_letters(&self, topic: &str) -> Vec<String> {
        self.topics
            .lock()
            .get(topic)
            .map(|t| t.dead.clone())
            .unwrap_or_default()
    }

    /// Undelivered + unacked message count for a topic.
    pub fn depth(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(|t| t.queue.len() + t.pending.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, payload: &str, dedup_key: Option<&str>) -> Result<bool> {
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic.to_string()).or_default();

        if let Some(key) = dedup_key {
            if !entry.dedup.insert(key.to_string()) {
                return Ok(false);
            }
        }

        entry.next_id += 1;
        let id = format!("{}-0", entry.next_id);
        entry.queue.push_back((id, payload.to_string()));
        Ok(true)
    }

    async fn pull(
        &self,
        topic: &str,
        _group: &str,
        _consumer: &str,
        max: usize,
    ) -> Result<Vec<BrokerMessage>> {
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic.to_string()).or_default();

        let mut messages = Vec::new();
        while messages.len() < max {
            let Some((id, payload)) = entry.queue.pop_front() else {
                break;
            };
            entry.pending.insert(id.clone(), payload.clone());
            messages.push(BrokerMessage { id, payload });
        }
        Ok(messages)
    }

    async fn ack(&self, topic: &str, _group: &str, message: &BrokerMessage) -> Result<()> {
        let mut topics = self.topics.lock();
        let entry = topics
            .get_mut(topic)
            .ok_or_else(|| AppError::Internal(format!("unknown topic: {}", topic)))?;
        entry.pending.remove(&message.id);
        entry.attempts.remove(&message.id);
        Ok(())
    }

    async fn nack(&self, topic: &str, _group: &str, message: &BrokerMessage) -> Result<()> {
        let mut topics = self.topics.lock();
        let entry = topics
            .get_mut(topic)
            .ok_or_else(|| AppError::Internal(format!("unknown topic: {}", topic)))?;

        let attempts = entry.attempts.entry(message.id.clone()).or_insert(0);
        *attempts += 1;

        if *attempts >= MAX_DELIVERIES {
            entry.pending.remove(&message.id);
            entry.attempts.remove(&message.id);
            entry.dead.push(message.payload.clone());
            return Ok(());
        }

        if let Some(payload) = entry.pending.remove(&message.id) {
            entry.queue.push_back((message.id.clone(), payload));
        }
        Ok(())
    }
}
