//! Model name normalization.
//!
//! Clients and configs pass full model identifiers; the CLI accepts short
//! aliases. Long identifiers collapse through a fixed table so resumed
//! sessions keep a stable model name.

/// Prefix → alias table, longest prefixes first.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("claude-3-5-haiku", "haiku"),
    ("claude-3-5-sonnet", "sonnet"),
    ("claude-3-7-sonnet", "sonnet"),
    ("claude-opus-4", "opus"),
    ("claude-sonnet-4", "sonnet"),
    ("claude-haiku-4", "haiku"),
];

/// Collapse a long model identifier to its short provider alias. Unknown
/// names pass through unchanged; empty input maps to `None`.
pub fn normalize_model(model: &str) -> Option<String> {
    let trimmed = model.trim();
    if trimmed.is_empty() {
        return None;
    }
    for (prefix, alias) in MODEL_ALIASES {
        if trimmed.starts_with(prefix) {
            return Some((*alias).to_string());
        }
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_long_identifiers() {
        assert_eq!(
            normalize_model("claude-sonnet-4-5-20250929").as_deref(),
            Some("sonnet")
        );
        assert_eq!(
            normalize_model("claude-opus-4-1-20250805").as_deref(),
            Some("opus")
        );
        assert_eq!(
            normalize_model("claude-3-5-haiku-20241022").as_deref(),
            Some("haiku")
        );
    }

    #[test]
    fn passes_through_aliases_and_unknowns() {
        assert_eq!(normalize_model("sonnet").as_deref(), Some("sonnet"));
        assert_eq!(normalize_model("my-custom-model").as_deref(), Some("my-custom-model"));
        assert_eq!(normalize_model("  "), None);
    }
}
