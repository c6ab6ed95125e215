/// Core data model shared by the registry and the gateway
pub mod directory;
pub mod history;
pub mod quota;

pub use directory::ServiceDirectory;
pub use history::ConversationHistory;
pub use quota::{AdmissionController, QuotaConfig};

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

/// A backend instance as published to the registry and cached by the gateway.
///
/// `url` is the identity key: two descriptors with the same url describe the
/// same instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Logical service name, shared by interchangeable instances
    pub name: String,
    /// Endpoint the gateway POSTs queries to
    pub url: String,
    /// Per-call deadline, seconds on the wire
    #[serde(with = "crate::utils::duration_secs", default = "default_timeout")]
    pub timeout: Duration,
    /// How many history entries the backend wants attached
    #[serde(default)]
    pub history_len: usize,
    /// Higher wins when several backends answer
    #[serde(default)]
    pub priority: i64,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            timeout: default_timeout(),
            history_len: 0,
            priority: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_history_len(mut self, history_len: usize) -> Self {
        self.history_len = history_len;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// Front-end query accepted by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub uid: String,
    pub query: String,
}

/// Body the gateway sends to every selected backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub uid: String,
    pub query: String,
    #[serde(default)]
    pub history: Vec<String>,
}

/// Reply produced by a backend, and the shape the gateway answers with.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl Reply {
    /// A successful reply carrying `text`
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            ok: true,
            reply: Some(text.into()),
            ..Default::default()
        }
    }

    /// A failed reply carrying an error message
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Stamp the reply with the priority and name of the backend that produced it
    pub fn attributed_to(mut self, backend: &BackendDescriptor) -> Self {
        self.priority = Some(backend.priority);
        if self.from.is_none() {
            self.from = Some(backend.name.clone());
        }
        self
    }
}

/// Outcome of a gateway round-trip for one front-end query
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Quota exceeded, nothing was dispatched
    Rejected,
    /// A backend answer or the canned fallback
    Replied(Reply),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults_from_json() {
        let descriptor: BackendDescriptor =
            serde_json::from_str(r#"{"name": "gen", "url": "http://10.0.0.5:5000/api"}"#).unwrap();

        assert_eq!(descriptor.timeout, Duration::from_secs(5));
        assert_eq!(descriptor.history_len, 0);
        assert_eq!(descriptor.priority, 0);
    }

    #[test]
    fn test_descriptor_from_registry_payload() {
        let descriptor: BackendDescriptor = serde_json::from_str(
            r#"{"name": "wiki", "url": "http://10.0.0.6:5001/api", "timeout": 1.5, "history_len": 4, "priority": 5}"#,
        )
        .unwrap();

        assert_eq!(descriptor.timeout, Duration::from_millis(1500));
        assert_eq!(descriptor.history_len, 4);
        assert_eq!(descriptor.priority, 5);
    }

    #[test]
    fn test_reply_skips_absent_fields() {
        let reply = Reply::success("hi").attributed_to(&BackendDescriptor::new("gen", "u").with_priority(2));
        let value = serde_json::to_value(&reply).unwrap();

        assert_eq!(
            value,
            serde_json::json!({"ok": true, "reply": "hi", "priority": 2, "from": "gen"})
        );
    }

    #[test]
    fn test_attribution_keeps_backend_supplied_name() {
        let reply = Reply {
            from: Some("gpt-small".to_string()),
            ..Reply::success("hello")
        };
        let reply = reply.attributed_to(&BackendDescriptor::new("gen", "u").with_priority(1));

        assert_eq!(reply.from.as_deref(), Some("gpt-small"));
        assert_eq!(reply.priority, Some(1));
    }
}
