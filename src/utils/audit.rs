//! Security and interaction audit events, logged as JSON lines under the
//! `audit` target for log-pipeline ingestion.

use serde::Serialize;
use uuid::Uuid;

/// Events observable at a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Search,
    SearchInteraction,
    RateLimited,
    SessionEvicted,
}

impl AuditEvent {
    fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::Search => "search",
            AuditEvent::SearchInteraction => "search_interaction",
            AuditEvent::RateLimited => "rate_limited",
            AuditEvent::SessionEvicted => "session_evicted",
        }
    }
}

/// Emit an audit entry. Null fields are omitted; metadata keys are inlined.
pub fn log_audit_event(
    event: AuditEvent,
    user_id: Option<Uuid>,
    metadata: Option<serde_json::Value>,
) {
    let mut entry = serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "event": event.as_str(),
    });

    if let Some(user_id) = user_id {
        entry["user_id"] = serde_json::json!(user_id.to_string());
    }

    if let Some(serde_json::Value::Object(map)) = metadata {
        for (key, value) in map {
            entry[key] = value;
        }
    }

    tracing::info!(target: "audit", "{}", entry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_stable() {
        assert_eq!(AuditEvent::Search.as_str(), "search");
        assert_eq!(AuditEvent::SearchInteraction.as_str(), "search_interaction");
        assert_eq!(AuditEvent::RateLimited.as_str(), "rate_limited");
        assert_eq!(AuditEvent::SessionEvicted.as_str(), "session_evicted");
    }
}
