//! Reasoning spans emitted by thinking models.
//!
//! Models such as DeepSeek-R1 wrap their chain of thought in `<think>` tags
//! ahead of the visible answer. The agent keeps the span for inspection and
//! strips it before anything else reads the answer.

use std::sync::OnceLock;

use regex::Regex;

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

/// Model output split into its reasoning span and visible answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonedAnswer {
    pub reasoning: Option<String>,
    pub answer: String,
}

impl ReasonedAnswer {
    pub fn parse(raw: &str) -> Self {
        Self {
            reasoning: extract_reasoning(raw).map(str::to_string),
            answer: strip_reasoning(raw),
        }
    }
}

/// Span from the first `<think>` to the last `</think>`, tags included.
pub fn extract_reasoning(text: &str) -> Option<&str> {
    let start = text.find(THINK_OPEN)?;
    let end = text.rfind(THINK_CLOSE)?;
    if end < start {
        return None;
    }
    Some(&text[start..end + THINK_CLOSE.len()])
}

fn think_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid think regex"))
}

/// Remove every `<think>...</think>` span and trim the remainder.
pub fn strip_reasoning(text: &str) -> String {
    think_pattern().replace_all(text, "").trim().to_string()
}
