//! Multi-stage ingestion pipeline.
//!
//! Scout discovers repositories, Gather harvests and quality-gates issues,
//! the producer fans work out over the broker, the embedder worker embeds
//! and persists, and the janitor prunes the long tail:
//!
//! Scout -> Gather -> Quality-Gate -> Publish -> Embed -> Persist -> Janitor

pub mod broker;
pub mod gatherer;
pub mod github;
pub mod janitor;
pub mod persistence;
pub mod producer;
pub mod quality_gate;
pub mod scout;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quality_gate::QScoreComponents;

/// GitHub issue state. Transitions are monotonic per ingestion pass
/// (open -> closed); reopens arrive as fresh upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        }
    }
}

impl std::str::FromStr for IssueState {
    type Err = crate::types::AppError;

    fn from_str(s: &str) -> crate::types::Result<Self> {
        match s {
            "open" => Ok(IssueState::Open),
            "closed" => Ok(IssueState::Closed),
            other => Err(crate::types::AppError::InvalidInput(format!(
                "unknown issue state: {}",
                other
            ))),
        }
    }
}

/// A repository task flowing from Scout to the gatherer via the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryTask {
    pub node_id: String,
    pub full_name: String,
    pub primary_language: Option<String>,
    pub stargazer_count: i32,
    pub topics: Vec<String>,
}

/// A harvested, quality-gated issue flowing to the embedder via the broker.
///
/// `content_hash` travels as both a message attribute (at-broker dedup) and a
/// payload field (at-consumer idempotency).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub node_id: String,
    pub repo_id: String,
    pub title: String,
    pub body_text: String,
    pub labels: Vec<String>,
    pub state: IssueState,
    pub github_created_at: DateTime<Utc>,
    pub q_components: QScoreComponents,
    pub q_score: f32,
    pub content_hash: String,
}
