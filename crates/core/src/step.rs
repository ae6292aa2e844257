//! Step records — one structured reasoning unit per turn.

use serde::{Deserialize, Serialize};

/// Title of the record synthesized when model output cannot be interpreted.
pub const PARSE_FAILED_TITLE: &str = "Parsing Failed";

/// Older spelling of the parse fallback title, still recognized.
pub const PARSE_ERROR_TITLE: &str = "Parsing Error";

/// Title of the record synthesized when a remote call fails.
pub const ERROR_TITLE: &str = "Error";

/// What the model wants to do after this step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Continue,
    FinalAnswer,
}

impl NextAction {
    /// Recognize a `next_action` token. Case and surrounding whitespace are ignored.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "continue" => Some(Self::Continue),
            "final_answer" => Some(Self::FinalAnswer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::FinalAnswer => "final_answer",
        }
    }
}

impl std::fmt::Display for NextAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured `{title, content, next_action}` reasoning step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub title: String,
    pub content: String,
    pub next_action: NextAction,
}

impl StepRecord {
    pub fn new(title: impl Into<String>, content: impl Into<String>, next_action: NextAction) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            next_action,
        }
    }

    /// The fallback record: raw output preserved verbatim for diagnosis.
    pub fn parse_failed(raw: impl Into<String>) -> Self {
        Self::new(PARSE_FAILED_TITLE, raw, NextAction::Continue)
    }

    /// A synthetic record standing in for a failed remote call.
    pub fn error(content: impl Into<String>, next_action: NextAction) -> Self {
        Self::new(ERROR_TITLE, content, next_action)
    }

    /// True for records produced by the parse fallback.
    pub fn is_parse_fallback(&self) -> bool {
        self.title == PARSE_FAILED_TITLE || self.title == PARSE_ERROR_TITLE
    }

    pub fn is_final(&self) -> bool {
        self.next_action == NextAction::FinalAnswer
    }

    /// The JSON form appended to the conversation as the assistant turn.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "title": self.title,
            "content": self.content,
            "next_action": self.next_action,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_action_tokens() {
        assert_eq!(NextAction::from_token("continue"), Some(NextAction::Continue));
        assert_eq!(NextAction::from_token(" Final_Answer "), Some(NextAction::FinalAnswer));
        assert_eq!(NextAction::from_token("stop"), None);
        assert_eq!(NextAction::from_token(""), None);
    }

    #[test]
    fn fallback_titles_are_recognized() {
        assert!(StepRecord::parse_failed("garbage").is_parse_fallback());
        assert!(StepRecord::new(PARSE_ERROR_TITLE, "x", NextAction::Continue).is_parse_fallback());
        assert!(!StepRecord::error("boom", NextAction::FinalAnswer).is_parse_fallback());
    }

    #[test]
    fn parse_failed_preserves_raw_content() {
        let raw = "  not json at all \n";
        let record = StepRecord::parse_failed(raw);
        assert_eq!(record.content, raw);
        assert_eq!(record.next_action, NextAction::Continue);
    }

    #[test]
    fn json_form_uses_snake_case_action() {
        let record = StepRecord::new("Check", "ok", NextAction::FinalAnswer);
        let json = record.to_json();
        assert!(json.contains(r#""next_action":"final_answer""#));
        let back: StepRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
