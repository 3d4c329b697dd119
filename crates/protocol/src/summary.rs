//! Session summaries derived from the message log.

use crate::message::Message;

pub const SUMMARY_PLACEHOLDER: &str = "New Session";

/// How many leading messages to scan for a usable user prompt.
const SCAN_WINDOW: usize = 10;
/// Maximum summary length in characters.
const MAX_CHARS: usize = 100;

/// Derive a short human-readable summary from the first real user message.
///
/// Scans the first ten messages for a user message that is not a command
/// marker or warmup sentinel, and truncates it to 100 characters. Falls
/// back to a fixed placeholder when no such message exists.
pub fn summarize(messages: &[Message]) -> String {
    for message in messages.iter().take(SCAN_WINDOW) {
        if let Message::User { content, .. } = message {
            let text = content.as_text();
            let trimmed = text.trim();
            if trimmed.is_empty() || is_system_prompt(trimmed) {
                continue;
            }
            return truncate(trimmed);
        }
    }
    SUMMARY_PLACEHOLDER.to_string()
}

/// User messages injected by tooling rather than typed by a person.
fn is_system_prompt(text: &str) -> bool {
    text.starts_with("<command-")
        || text.starts_with("<local-command-")
        || text == "Warmup"
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_CHARS).collect();
    format!("{head}...")
}
