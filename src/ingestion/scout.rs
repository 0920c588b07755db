//! Scout: repository discovery above a popularity floor.
//!
//! Also owns the hourly sharding scheme: each collector run restricts itself
//! to repositories whose `CRC32(node_id) mod 24` equals the UTC hour of the
//! job's start, so the full population is visited exactly once per day.

use std::collections::HashSet;

use crate::ingestion::github::GitHubClient;
use crate::ingestion::RepositoryTask;
use crate::types::Result;
use crate::utils::config::IngestionSettings;

/// Number of hourly shards.
pub const SHARD_COUNT: u32 = 24;

pub struct Scout<'a> {
    client: &'a GitHubClient,
    min_stars: u32,
    max_repos: usize,
}

impl<'a> Scout<'a> {
    pub fn new(client: &'a GitHubClient, settings: &IngestionSettings) -> Self {
        Self {
            client,
            min_stars: settings.scout_min_stars,
            max_repos: settings.scout_max_repos,
        }
    }

    /// Query the source API, deduplicate by `node_id`, and emit a bounded
    /// list for this run.
    pub async fn discover_repositories(&self) -> Result<Vec<RepositoryTask>> {
        let items = self
            .client
            .search_repositories(self.min_stars, self.max_repos)
            .await?;

        let mut seen = HashSet::new();
        let mut repos = Vec::with_capacity(items.len());
        for item in items {
            if !seen.insert(item.node_id.clone()) {
                continue;
            }
            repos.push(RepositoryTask {
                node_id: item.node_id,
                full_name: item.full_name,
                primary_language: item.language,
                stargazer_count: item.stargazers_count,
                topics: item.topics,
            });
        }

        repos.truncate(self.max_repos);
        tracing::info!(repos_discovered = repos.len(), "scout discovery complete");
        Ok(repos)
    }
}

/// The hourly shard a repository belongs to: `CRC32(node_id) mod 24`.
pub fn shard_hour(node_id: &str) -> u32 {
    crc32fast::hash(node_id.as_bytes()) % SHARD_COUNT
}

/// Restrict a discovery pass to the given UTC hour's shard.
pub fn filter_shard(repos: Vec<RepositoryTask>, utc_hour: u32) -> Vec<RepositoryTask> {
    repos
        .into_iter()
        .filter(|r| shard_hour(&r.node_id) == utc_hour % SHARD_COUNT)
        .collect()
}
