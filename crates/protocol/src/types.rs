//! Core types shared across the protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session lifecycle state.
///
/// `Created`, `Active` and `Idle` are working states; `Completed`,
/// `Aborted`, `Error` and `Deleted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Active,
    Idle,
    Completed,
    Aborted,
    Error,
    Deleted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Aborted
                | SessionState::Error
                | SessionState::Deleted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Idle => "idle",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
            SessionState::Error => "error",
            SessionState::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage for a session.
///
/// `used` always equals the sum of the breakdown fields; the breakdown is
/// monotonically non-decreasing over the session's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub used: u64,
    /// Context window size reported by the provider, 0 if unknown.
    pub total: u64,
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
}

impl TokenUsage {
    /// Merge a delta reported by the adapter. Counts only grow.
    pub fn apply(&mut self, delta: &UsageDelta) {
        self.input += delta.input;
        self.output += delta.output;
        self.cache_read += delta.cache_read;
        self.cache_creation += delta.cache_creation;
        if let Some(total) = delta.total {
            self.total = total;
        }
        self.used = self.input + self.output + self.cache_read + self.cache_creation;
    }
}

/// Incremental token counts attached to one adapter turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDelta {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Generic options the adapter maps to a provider call shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Working directory for the provider.
    pub project_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Provider-side session identifier for resuming a conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_id: Option<String>,
    /// Extra directories the provider may access.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_dirs: Vec<String>,
}

impl SessionOptions {
    pub fn merge(&mut self, update: &OptionsUpdate) {
        if let Some(resume_id) = &update.resume_id {
            self.resume_id = Some(resume_id.clone());
        }
        if let Some(model) = &update.model {
            self.model = Some(model.clone());
        }
    }
}

/// Options update captured by the adapter mid-stream (e.g. the provider's
/// resumable session id) and merged back into the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Session metadata, immutable after creation except through
/// adapter-driven options updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub project_path: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Persisted projection of a session. One row per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub id: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}
