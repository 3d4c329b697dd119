//! Domain messages — the provider-agnostic representation of a
//! conversational turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::new_id;

/// Content of a user message: plain text or an ordered list of blocks
/// (multi-modal input).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl UserContent {
    /// Concatenated text of the content, ignoring non-text blocks.
    pub fn as_text(&self) -> String {
        match self {
            UserContent::Text(text) => text.clone(),
            UserContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for UserContent {
    fn from(text: &str) -> Self {
        UserContent::Text(text.to_string())
    }
}

impl From<String> for UserContent {
    fn from(text: String) -> Self {
        UserContent::Text(text)
    }
}

/// One block of multi-modal user content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Base64-encoded image payload.
    Image {
        media_type: String,
        data: String,
    },
}

/// Tool invocation attached to an agent message. `tool_result` stays `None`
/// until the provider reports completion for the matching `tool_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub tool_name: String,
    pub tool_id: String,
    /// Serialized JSON of the tool input.
    pub tool_input: String,
    pub tool_result: Option<String>,
}

/// A message in a session's log. Immutable once created, except that a
/// pending `tool_result` may be attached to an agent message by `tool_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    User {
        id: String,
        timestamp: DateTime<Utc>,
        content: UserContent,
    },
    Agent {
        id: String,
        timestamp: DateTime<Utc>,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thinking: Option<String>,
        #[serde(default)]
        streaming: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use: Option<ToolUse>,
    },
    Tool {
        id: String,
        timestamp: DateTime<Utc>,
        tool_name: String,
        tool_id: String,
        tool_input: String,
        tool_output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    System {
        id: String,
        timestamp: DateTime<Utc>,
        text: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        payload: Value,
    },
    Error {
        id: String,
        timestamp: DateTime<Utc>,
        text: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        payload: Value,
    },
}

impl Message {
    pub fn user(content: impl Into<UserContent>) -> Self {
        Message::User {
            id: new_id(),
            timestamp: Utc::now(),
            content: content.into(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Message::Agent {
            id: new_id(),
            timestamp: Utc::now(),
            text: text.into(),
            thinking: None,
            streaming: false,
            tool_use: None,
        }
    }

    pub fn agent_thinking(thinking: impl Into<String>) -> Self {
        Message::Agent {
            id: new_id(),
            timestamp: Utc::now(),
            text: String::new(),
            thinking: Some(thinking.into()),
            streaming: false,
            tool_use: None,
        }
    }

    pub fn agent_tool_use(tool_name: impl Into<String>, tool_id: impl Into<String>, tool_input: impl Into<String>) -> Self {
        Message::Agent {
            id: new_id(),
            timestamp: Utc::now(),
            text: String::new(),
            thinking: None,
            streaming: false,
            tool_use: Some(ToolUse {
                tool_name: tool_name.into(),
                tool_id: tool_id.into(),
                tool_input: tool_input.into(),
                tool_result: None,
            }),
        }
    }

    pub fn system(text: impl Into<String>, payload: Value) -> Self {
        Message::System {
            id: new_id(),
            timestamp: Utc::now(),
            text: text.into(),
            payload,
        }
    }

    pub fn error(text: impl Into<String>, payload: Value) -> Self {
        Message::Error {
            id: new_id(),
            timestamp: Utc::now(),
            text: text.into(),
            payload,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Message::User { id, .. }
            | Message::Agent { id, .. }
            | Message::Tool { id, .. }
            | Message::System { id, .. }
            | Message::Error { id, .. } => id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Message::User { timestamp, .. }
            | Message::Agent { timestamp, .. }
            | Message::Tool { timestamp, .. }
            | Message::System { timestamp, .. }
            | Message::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Wire discriminant, also the `type` column in the message store.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::User { .. } => "user",
            Message::Agent { .. } => "agent",
            Message::Tool { .. } => "tool",
            Message::System { .. } => "system",
            Message::Error { .. } => "error",
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, Message::Agent { tool_use: Some(_), .. })
    }

    /// The `tool_id` this message carries, if any.
    pub fn tool_id(&self) -> Option<&str> {
        match self {
            Message::Agent {
                tool_use: Some(tool_use),
                ..
            } => Some(&tool_use.tool_id),
            Message::Tool { tool_id, .. } => Some(tool_id),
            _ => None,
        }
    }

    /// Attach a tool result to a pending tool-use message. Returns false if
    /// this message has no matching unresolved tool invocation.
    pub fn attach_tool_result(&mut self, tool_id: &str, output: &str) -> bool {
        match self {
            Message::Agent {
                tool_use: Some(tool_use),
                ..
            } if tool_use.tool_id == tool_id && tool_use.tool_result.is_none() => {
                tool_use.tool_result = Some(output.to_string());
                true
            }
            _ => false,
        }
    }
}
