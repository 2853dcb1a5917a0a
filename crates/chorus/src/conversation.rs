use crate::tools::ToolResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Roles to describe the origin of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A tool call as the model issued it. `arguments` is the raw JSON text so that
/// malformed calls can still be recorded next to their error result.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    ToolRequest(ToolCallRecord),
    ToolResponse(ToolResult),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: vec![MessageContent::Text(text.into())],
        }
    }

    pub fn assistant() -> Self {
        Message {
            role: Role::Assistant,
            content: Vec::new(),
        }
    }

    pub fn tool(result: ToolResult) -> Self {
        Message {
            role: Role::Tool,
            content: vec![MessageContent::ToolResponse(result)],
        }
    }

    /// Appends text, skipping empty fragments.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.content.push(MessageContent::Text(text));
        }
        self
    }

    pub fn with_tool_request(mut self, record: ToolCallRecord) -> Self {
        self.content.push(MessageContent::ToolRequest(record));
        self
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(MessageContent::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_requests(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.content.iter().filter_map(|c| match c {
            MessageContent::ToolRequest(record) => Some(record),
            _ => None,
        })
    }

    pub fn tool_responses(&self) -> impl Iterator<Item = &ToolResult> {
        self.content.iter().filter_map(|c| match c {
            MessageContent::ToolResponse(result) => Some(result),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// History for one conversation plus the bookkeeping that keeps tool-call ids
/// unique across all of its turns.
#[derive(Debug, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
    call_ids: HashSet<String>,
    turns: u64,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        for record in message.tool_requests() {
            self.call_ids.insert(record.id.clone());
        }
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Starts a new model turn and returns its sequence number.
    pub fn next_turn(&mut self) -> u64 {
        self.turns += 1;
        self.turns
    }

    pub fn used_call_ids(&self) -> &HashSet<String> {
        &self.call_ids
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.call_ids.clear();
        self.turns = 0;
    }
}
