use chorus_protocol::Tool;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Joins a provider name and a raw tool name into the registry-wide name.
pub const NAMESPACE_SEPARATOR: char = '.';

pub fn namespaced(provider: &str, tool: &str) -> String {
    format!("{}{}{}", provider, NAMESPACE_SEPARATOR, tool)
}

/// Splits `provider.tool` on the first separator. Provider names never contain
/// the separator, so tool names are free to.
pub fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAMESPACE_SEPARATOR)
        .filter(|(provider, tool)| !provider.is_empty() && !tool.is_empty())
}

static AUTH_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(auth|unauthori[sz]ed|authentication|authori[sz]ation|permission|forbidden|401|403)\b")
        .expect("static regex")
});
static TIMEOUT_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(timeout|timed out)\b").expect("static regex"));
static NOT_FOUND_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(not found|unknown tool|no such|404)\b").expect("static regex")
});

/// One tool as seen by the rest of chorus. Immutable once registered; a provider
/// refresh swaps the whole set rather than editing entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub original_name: String,
    pub description: String,
    pub input_schema: Value,
    pub provider: String,
}

impl ToolDescriptor {
    pub fn from_tool(provider: &str, tool: Tool) -> Self {
        Self {
            name: namespaced(provider, &tool.name),
            original_name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
            provider: provider.to_string(),
        }
    }
}

/// A complete tool call ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Timeout,
    Auth,
    NotFound,
    ProviderError,
    InvalidArguments,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::Auth => "auth",
            ToolErrorKind::NotFound => "not_found",
            ToolErrorKind::ProviderError => "provider_error",
            ToolErrorKind::InvalidArguments => "invalid_arguments",
        }
    }

    /// Guesses a category from free-form provider error text. Keywords only
    /// count as whole words.
    pub fn classify(text: &str) -> Self {
        if AUTH_WORDS.is_match(text) {
            ToolErrorKind::Auth
        } else if TIMEOUT_WORDS.is_match(text) {
            ToolErrorKind::Timeout
        } else if NOT_FOUND_WORDS.is_match(text) {
            ToolErrorKind::NotFound
        } else {
            ToolErrorKind::ProviderError
        }
    }

    /// A sentence the model can pass on to the user as-is.
    pub fn hint(&self) -> &'static str {
        match self {
            ToolErrorKind::Auth => "I'm having trouble accessing that service.",
            ToolErrorKind::Timeout => "That's taking a bit longer than expected.",
            ToolErrorKind::NotFound => "I couldn't find what you're looking for.",
            ToolErrorKind::ProviderError | ToolErrorKind::InvalidArguments => {
                "I ran into a small issue there."
            }
        }
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, message)
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArguments, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, message)
    }

    /// Categorizes from the message text.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ToolErrorKind::classify(&message), message)
    }
}

/// The outcome of one tool call, correlated to the call by id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub outcome: Result<String, ToolError>,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, name: impl Into<String>, output: String) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            outcome: Ok(output),
        }
    }

    pub fn failure(call_id: impl Into<String>, name: impl Into<String>, error: ToolError) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            outcome: Err(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        self.outcome.as_ref().err().map(|e| e.kind)
    }

    /// The text placed in the tool message fed back to the model.
    pub fn to_message_content(&self) -> String {
        match &self.outcome {
            Ok(output) => output.clone(),
            Err(error) => json!({
                "error": error.message,
                "category": error.kind,
                "hint": error.kind.hint(),
            })
            .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespacing_round_trip() {
        let name = namespaced("files", "read.all");
        assert_eq!(name, "files.read.all");
        assert_eq!(split_namespaced(&name), Some(("files", "read.all")));
        assert_eq!(split_namespaced("nodot"), None);
        assert_eq!(split_namespaced(".read"), None);
    }

    #[test]
    fn test_classify_keywords() {
        assert_eq!(ToolErrorKind::classify("Permission denied"), ToolErrorKind::Auth);
        assert_eq!(ToolErrorKind::classify("HTTP 401 Unauthorized"), ToolErrorKind::Auth);
        assert_eq!(ToolErrorKind::classify("upstream timed out"), ToolErrorKind::Timeout);
        assert_eq!(ToolErrorKind::classify("File not found"), ToolErrorKind::NotFound);
        assert_eq!(ToolErrorKind::classify("disk full"), ToolErrorKind::ProviderError);
        assert_eq!(ToolErrorKind::classify("Authentication required"), ToolErrorKind::Auth);
        // Keywords inside longer words do not count
        assert_eq!(ToolErrorKind::classify("Author not found"), ToolErrorKind::NotFound);
        assert_eq!(ToolErrorKind::classify("authority record is stale"), ToolErrorKind::ProviderError);
    }

    #[test]
    fn test_error_payload_is_structured() {
        let result = ToolResult::failure(
            "call_1",
            "search.query",
            ToolError::not_found("Tool 'search.query' is not available"),
        );
        let payload: Value = serde_json::from_str(&result.to_message_content()).unwrap();
        assert_eq!(payload["category"], "not_found");
        assert_eq!(payload["hint"], "I couldn't find what you're looking for.");
        assert_eq!(payload["error"], "Tool 'search.query' is not available");
    }

    #[test]
    fn test_success_payload_is_raw_text() {
        let result = ToolResult::success("call_1", "files.read", "hello".to_string());
        assert_eq!(result.to_message_content(), "hello");
        assert!(!result.is_error());
    }
}
