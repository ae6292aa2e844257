//! Structured step extraction from free-form model output.
//!
//! Models asked for `{title, content, next_action}` JSON answer with fenced
//! blocks, prose around the object, several objects in a row, or no JSON at
//! all. [`ResponseParser`] runs a fixed cascade of strategies and always
//! returns a record: when nothing can be recovered the raw text is kept
//! verbatim in a [`StepRecord::parse_failed`] record.

use regex_lite::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thinkchain_config::ParseMode;
use thinkchain_core::step::{NextAction, StepRecord};
use tracing::{debug, warn};

/// How well a JSON value matches the step shape.
#[derive(Debug)]
enum Candidate {
    /// Non-empty `title` and `content`, recognized `next_action`
    Valid(StepRecord),
    /// Non-empty `title` and `content`, `next_action` absent or unrecognized
    Relaxed(StepRecord),
    Invalid,
}

impl Candidate {
    fn classify(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::Invalid;
        };

        let text = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
        };

        let (Some(title), Some(content)) = (text("title"), text("content")) else {
            return Self::Invalid;
        };

        match text("next_action").and_then(NextAction::from_token) {
            Some(action) => Self::Valid(StepRecord::new(title, content, action)),
            None => Self::Relaxed(StepRecord::new(title, content, NextAction::Continue)),
        }
    }

    fn from_json(text: &str) -> Self {
        serde_json::from_str::<Value>(text)
            .map(|v| Self::classify(&v))
            .unwrap_or(Self::Invalid)
    }
}

/// Extracts [`StepRecord`]s from raw model responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseParser {
    mode: ParseMode,
}

impl ResponseParser {
    pub fn new(mode: ParseMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    /// Records for one turn, according to the configured [`ParseMode`].
    pub fn parse_turn(&self, raw: &str) -> Vec<StepRecord> {
        match self.mode {
            ParseMode::FirstMatch => vec![self.parse(raw)],
            ParseMode::AllMatches => self.parse_all(raw),
        }
    }

    /// The first step found in `raw`. Never fails.
    pub fn parse(&self, raw: &str) -> StepRecord {
        let cleaned = strip_code_fences(raw);
        let mut relaxed: Option<StepRecord> = None;

        for text in sources(raw, cleaned) {
            if let Some(record) = scan(text, &mut relaxed) {
                return record;
            }
        }

        if let Some(record) = relaxed {
            debug!(title = %record.title, "Accepting step without a recognized next_action");
            return record;
        }

        for text in sources(raw, cleaned) {
            if let Candidate::Valid(record) | Candidate::Relaxed(record) = extract_fields(text) {
                debug!(title = %record.title, "Recovered step from field patterns");
                return record;
            }
        }

        warn!(len = raw.len(), "No step could be extracted from response");
        StepRecord::parse_failed(raw)
    }

    /// Every valid step in `raw`, in arrival order. Never empty: falls back
    /// to [`parse`](Self::parse) when no object qualifies.
    pub fn parse_all(&self, raw: &str) -> Vec<StepRecord> {
        let cleaned = strip_code_fences(raw);
        let records: Vec<StepRecord> = balanced_objects(cleaned)
            .filter_map(|(_, candidate)| match candidate {
                Candidate::Valid(record) => Some(record),
                _ => None,
            })
            .collect();

        if records.is_empty() {
            vec![self.parse(raw)]
        } else {
            records
        }
    }
}

/// The fence-stripped text first, then the untouched text if it differs.
fn sources<'a>(raw: &'a str, cleaned: &'a str) -> impl Iterator<Item = &'a str> {
    let original = raw.trim();
    std::iter::once(cleaned).chain((original != cleaned).then_some(original))
}

/// Whole string, then first `{` through last `}`, then every well-nested
/// object in order. Relaxed candidates are remembered, not returned.
fn scan(text: &str, relaxed: &mut Option<StepRecord>) -> Option<StepRecord> {
    if let Some(record) = consider(Candidate::from_json(text), relaxed) {
        return Some(record);
    }

    if let Some(span) = outer_braces(text) {
        if let Some(record) = consider(Candidate::from_json(span), relaxed) {
            return Some(record);
        }
    }

    balanced_objects(text).find_map(|(_, candidate)| consider(candidate, relaxed))
}

/// Return a valid record, or remember the first relaxed one.
fn consider(candidate: Candidate, relaxed: &mut Option<StepRecord>) -> Option<StepRecord> {
    match candidate {
        Candidate::Valid(record) => Some(record),
        Candidate::Relaxed(record) => {
            relaxed.get_or_insert(record);
            None
        }
        Candidate::Invalid => None,
    }
}

/// Remove an opening ```` ``` ```` with its optional language tag and a
/// closing ```` ``` ````. Content on the opening line is kept.
fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.trim_start_matches('`');
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        text = &rest[tag_len..];
    }
    if let Some(stripped) = text.trim_end().strip_suffix("```") {
        text = stripped;
    }
    text.trim()
}

fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Byte offset one past the `}` that closes the `{` at `start`.
///
/// Braces inside string literals are ignored, and so are escaped quotes.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Iterate over well-nested `{...}` spans, each classified once.
///
/// After a span that parses as a step the scan resumes past it; otherwise it
/// resumes just inside it, so objects nested in a wrapper are still found.
fn balanced_objects(text: &str) -> impl Iterator<Item = (&str, Candidate)> {
    let mut cursor = 0usize;
    std::iter::from_fn(move || {
        while cursor < text.len() {
            let start = cursor + text[cursor..].find('{')?;
            match balanced_end(text, start) {
                Some(end) => {
                    let span = &text[start..end];
                    let candidate = Candidate::from_json(span);
                    cursor = if matches!(candidate, Candidate::Invalid) {
                        start + 1
                    } else {
                        end
                    };
                    return Some((span, candidate));
                }
                None => cursor = start + 1,
            }
        }
        None
    })
}

/// `"key": "value"` patterns for the three step fields.
struct FieldPatterns {
    title: Regex,
    content: Regex,
    next_action: Regex,
}

impl FieldPatterns {
    fn compile() -> Result<Self, regex_lite::Error> {
        let pattern = |key: &str| Regex::new(&format!(r#""{key}"\s*:\s*"((?:[^"\\]|\\.)*)""#));
        Ok(Self {
            title: pattern("title")?,
            content: pattern("content")?,
            next_action: pattern("next_action")?,
        })
    }
}

static FIELD_PATTERNS: LazyLock<Result<FieldPatterns, regex_lite::Error>> =
    LazyLock::new(FieldPatterns::compile);

/// Last resort: pull `"key": "value"` pairs out of text that is not JSON.
fn extract_fields(text: &str) -> Candidate {
    let Ok(patterns) = FIELD_PATTERNS.as_ref() else {
        return Candidate::Invalid;
    };
    let field = |re: &Regex| -> Option<String> {
        let captured = re.captures(text)?.get(1)?.as_str();
        Some(decode_json_string(captured))
    };

    let title = field(&patterns.title).filter(|s| !s.trim().is_empty());
    let content = field(&patterns.content).filter(|s| !s.trim().is_empty());
    let (Some(title), Some(content)) = (title, content) else {
        return Candidate::Invalid;
    };

    match field(&patterns.next_action)
        .as_deref()
        .and_then(NextAction::from_token)
    {
        Some(action) => Candidate::Valid(StepRecord::new(title, content, action)),
        None => Candidate::Relaxed(StepRecord::new(title, content, NextAction::Continue)),
    }
}

/// Decode JSON string escapes; undecodable input is returned as is.
fn decode_json_string(escaped: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{escaped}\"")).unwrap_or_else(|_| escaped.to_string())
}
