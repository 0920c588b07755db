//! Cache-backed token bucket rate limiting.
//!
//! Buckets are keyed by compound `(ip|flow)` and live in the shared cache so
//! limits hold across instances. When the cache is unavailable the limiter
//! falls back to in-process counters rather than failing open entirely.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::db::Cache;
use crate::types::{AppError, Result};
use crate::utils::audit::{log_audit_event, AuditEvent};
use crate::utils::config::RateLimitSettings;

pub struct RateLimiter {
    cache: Cache,
    limit: u32,
    window: Duration,
    local: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(cache: Cache, settings: &RateLimitSettings) -> Self {
        Self {
            cache,
            limit: settings.requests_per_window,
            window: Duration::from_secs(settings.window_secs),
            local: Mutex::new(HashMap::new()),
        }
    }

    /// Spend one token for `(ip, flow)`. Over-budget calls get
    /// `RateLimited` carrying the retry delay.
    pub async fn check(&self, ip: &str, flow: &str) -> Result<()> {
        let key = format!("ratelimit:{}:{}", flow, ip);

        let count = match self.cache.incr_with_ttl(&key, self.window.as_secs()).await {
            Ok(count) => count as u32,
            Err(_) => self.check_local(&key),
        };

        if count > self.limit {
            log_audit_event(
                AuditEvent::RateLimited,
                None,
                Some(serde_json::json!({ "flow": flow })),
            );
            return Err(AppError::RateLimited(self.window.as_secs()));
        }

        Ok(())
    }

    /// In-process fallback: fixed windows per key.
    fn check_local(&self, key: &str) -> u32 {
        let mut local = self.local.lock();
        let now = Instant::now();
        let entry = local.entry(key.to_string()).or_insert((now, 0));

        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;

        // Bound fallback memory: drop windows that have long expired.
        if local.len() > 10_000 {
            let window = self.window;
            local.retain(|_, (start, _)| now.duration_since(*start) < window);
        }

        local.get(key).map(|(_, count)| *count).unwrap_or(0)
    }
}
