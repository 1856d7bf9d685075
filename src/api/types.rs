//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::store::{ConnectionEntry, ContainerState, EntryCondition, StoreDef};

/// Brief entry summary for listing.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    /// Display name.
    pub name: String,
    /// Store kind tag.
    pub kind: String,
    /// Fixed id, hex-encoded.
    pub id: String,
    /// Classification.
    pub condition: String,
    /// Live running flag, for container-style entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    /// Backend display state, for container-style entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_state: Option<String>,
}

impl EntrySummary {
    pub fn from_entry(entry: &ConnectionEntry) -> Self {
        let (running, display_state) = match &entry.store {
            StoreDef::Container { .. } => {
                let state: ContainerState = entry.decode_state();
                (Some(state.running), state.container_state)
            }
            _ => (None, None),
        };

        Self {
            name: entry.name.clone(),
            kind: entry.store.kind().to_string(),
            id: entry.id().to_string(),
            condition: condition_str(entry.condition).to_string(),
            running,
            display_state,
        }
    }
}

fn condition_str(condition: EntryCondition) -> &'static str {
    match condition {
        EntryCondition::Usable => "usable",
        EntryCondition::Incomplete => "incomplete",
        EntryCondition::Failed => "failed",
    }
}

/// List entries response.
#[derive(Debug, Clone, Serialize)]
pub struct ListEntriesResponse {
    /// Total number of entries.
    pub count: usize,
    /// Entry summaries.
    pub entries: Vec<EntrySummary>,
}

/// Request body for refresh.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RefreshRequest {
    /// Re-query live state even when the entry looks usable.
    #[serde(default)]
    pub force: bool,
}

/// Generic API error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code (e.g. "ENTRY_NOT_FOUND").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn entry_not_found(name: &str) -> Self {
        Self::new("ENTRY_NOT_FOUND", format!("Entry '{}' not found", name))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_request_default() {
        let req: RefreshRequest = serde_json::from_str("{}").unwrap();
        assert!(!req.force);

        let req: RefreshRequest = serde_json::from_str(r#"{"force":true}"#).unwrap();
        assert!(req.force);
    }

    #[test]
    fn test_entry_summary_container_blob() {
        let mut entry = ConnectionEntry::new(
            "web",
            StoreDef::Container {
                container_name: "web-1".into(),
                identity: None,
            },
        );
        entry.set_state(&ContainerState::with_display("RUNNING"));

        let summary = EntrySummary::from_entry(&entry);
        assert_eq!(summary.kind, "container");
        assert_eq!(summary.running, Some(true));
        assert_eq!(summary.display_state.as_deref(), Some("RUNNING"));
    }

    #[test]
    fn test_entry_summary_local_has_no_running_flag() {
        let entry = ConnectionEntry::new("host", StoreDef::Local);
        let summary = EntrySummary::from_entry(&entry);
        assert_eq!(summary.running, None);

        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("running"));
    }

    #[test]
    fn test_error_response_serialization() {
        let err = ErrorResponse::entry_not_found("web");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("ENTRY_NOT_FOUND"));
        assert!(json.contains("web"));
    }
}
