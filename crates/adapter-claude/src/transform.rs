//! Raw stream-json → domain event translation.
//!
//! One `Transformer` lives for the duration of a single turn. It carries
//! the cross-message state the protocol requires: the one-shot capture of
//! the provider session id, and the id of the in-flight streaming message.

use serde_json::Value;
use tracing::debug;

use tether_adapter_core::{AdapterError, AgentEvent};
use tether_protocol::{new_id, Message, OptionsUpdate, UsageDelta};

#[derive(Default)]
pub(crate) struct Transformer {
    /// Options update waiting to ride on the next domain message.
    pending_options: Option<OptionsUpdate>,
    /// The provider session id is captured exactly once per turn.
    session_captured: bool,
    streaming_id: Option<String>,
}

impl Transformer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Translate one raw NDJSON message into zero or more events.
    pub(crate) fn transform(&mut self, raw: &Value) -> Result<Vec<AgentEvent>, AdapterError> {
        let msg_type = raw.get("type").and_then(|v| v.as_str()).unwrap_or("");

        match msg_type {
            "system" => {
                self.capture_session_id(raw);
                Ok(Vec::new())
            }
            "assistant" => Ok(self.transform_assistant(raw)),
            "user" => Ok(transform_user(raw)),
            "stream_event" => Ok(self.transform_stream_event(raw)),
            "result" => self.transform_result(raw),
            _ => {
                debug!(
                    component = "claude_adapter",
                    event = "claude.stdout.unknown_type",
                    msg_type = %msg_type,
                    "Unknown stdout message type"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Capture the provider-side session id from the first raw message that
    /// exposes one; it is emitted as an options update on the next domain
    /// message so the session can merge it without a second round trip.
    fn capture_session_id(&mut self, raw: &Value) {
        if self.session_captured {
            return;
        }
        if let Some(session_id) = raw.get("session_id").and_then(|v| v.as_str()) {
            self.session_captured = true;
            self.pending_options = Some(OptionsUpdate {
                resume_id: Some(session_id.to_string()),
                model: raw
                    .get("model")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            });
        }
    }

    /// Split an assistant message per content block: text blocks become
    /// agent text messages, tool-use blocks become agent messages with a
    /// pending tool result, thinking blocks carry reasoning text.
    fn transform_assistant(&mut self, raw: &Value) -> Vec<AgentEvent> {
        self.capture_session_id(raw);

        let Some(blocks) = raw
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_array())
        else {
            return Vec::new();
        };

        let mut usage = raw
            .get("message")
            .and_then(|m| m.get("usage"))
            .and_then(parse_usage);

        let mut events = Vec::new();
        for block in blocks {
            let message = match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                "text" => {
                    let text = block.get("text").and_then(|v| v.as_str()).unwrap_or("");
                    Message::agent(text)
                }
                "thinking" => {
                    let thinking = block.get("thinking").and_then(|v| v.as_str()).unwrap_or("");
                    Message::agent_thinking(thinking)
                }
                "tool_use" => {
                    let tool_name = block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    let tool_id = block.get("id").and_then(|v| v.as_str()).unwrap_or("");
                    let input = block
                        .get("input")
                        .map(|v| v.to_string())
                        .unwrap_or_default();
                    Message::agent_tool_use(tool_name, tool_id, input)
                }
                _ => continue,
            };

            events.push(AgentEvent::MessageCreated {
                message,
                updated_options: self.pending_options.take(),
                usage: usage.take(),
            });
        }
        events
    }

    fn transform_stream_event(&mut self, raw: &Value) -> Vec<AgentEvent> {
        let Some(event) = raw.get("event") else {
            return Vec::new();
        };
        match event.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "content_block_delta" => {
                let Some(text) = event
                    .get("delta")
                    .filter(|d| d.get("type").and_then(|v| v.as_str()) == Some("text_delta"))
                    .and_then(|d| d.get("text"))
                    .and_then(|v| v.as_str())
                else {
                    return Vec::new();
                };
                match &self.streaming_id {
                    Some(id) => vec![AgentEvent::StreamDelta {
                        message_id: id.clone(),
                        text: text.to_string(),
                    }],
                    None => {
                        let id = new_id();
                        self.streaming_id = Some(id.clone());
                        vec![
                            AgentEvent::StreamStarted {
                                message_id: id.clone(),
                            },
                            AgentEvent::StreamDelta {
                                message_id: id,
                                text: text.to_string(),
                            },
                        ]
                    }
                }
            }
            "message_stop" => self.finish_streaming(),
            _ => Vec::new(),
        }
    }

    /// Usage/result raw messages attach token counts without producing a
    /// new domain message. An error result is fatal for the turn.
    fn transform_result(&mut self, raw: &Value) -> Result<Vec<AgentEvent>, AdapterError> {
        let mut events = self.finish_streaming();

        if raw.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false) {
            let detail = raw
                .get("result")
                .and_then(|v| v.as_str())
                .unwrap_or("provider reported an error");
            return Err(AdapterError::ProviderError(detail.to_string()));
        }

        if let Some(delta) = raw.get("usage").and_then(parse_usage) {
            events.push(AgentEvent::UsageReported(delta));
        }
        Ok(events)
    }

    fn finish_streaming(&mut self) -> Vec<AgentEvent> {
        match self.streaming_id.take() {
            Some(message_id) => vec![AgentEvent::StreamCompleted { message_id }],
            None => Vec::new(),
        }
    }
}

/// Echoed user messages carry tool results back to the caller. Tool-result
/// blocks surface as updates to the matching tool-use message; everything
/// else is the CLI echoing our own input and is suppressed.
fn transform_user(raw: &Value) -> Vec<AgentEvent> {
    let Some(blocks) = raw
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
    else {
        return Vec::new();
    };

    blocks
        .iter()
        .filter(|b| b.get("type").and_then(|v| v.as_str()) == Some("tool_result"))
        .map(|block| {
            let tool_id = block
                .get("tool_use_id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let output = block
                .get("content")
                .map(|v| match v.as_str() {
                    Some(s) => s.to_string(),
                    None => v.to_string(),
                })
                .unwrap_or_default();
            AgentEvent::ToolCompleted {
                tool_id,
                output,
                duration_ms: block.get("duration_ms").and_then(|v| v.as_u64()),
            }
        })
        .collect()
}

fn parse_usage(usage: &Value) -> Option<UsageDelta> {
    let field = |key: &str| usage.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
    let delta = UsageDelta {
        input: field("input_tokens"),
        output: field("output_tokens"),
        cache_read: field("cache_read_input_tokens"),
        cache_creation: field("cache_creation_input_tokens"),
        total: usage.get("context_window").and_then(|v| v.as_u64()),
    };
    if delta.input == 0 && delta.output == 0 && delta.cache_read == 0 && delta.cache_creation == 0 {
        return None;
    }
    Some(delta)
}
