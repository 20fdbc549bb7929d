// Message types
//
// Message is one turn of a Dialog. Once appended to a Dialog it is never
// mutated; the Dialog only hands out shared references.

use crate::tool_types::{ToolCall, ToolCallRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Message role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// System message (instructions)
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Tool round results
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

impl From<&str> for MessageRole {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "system" => MessageRole::System,
            "assistant" => MessageRole::Assistant,
            "tool" => MessageRole::Tool,
            _ => MessageRole::User,
        }
    }
}

/// Token accounting reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub cached_prompt_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            cached_prompt_tokens: 0,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_add(rhs.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(rhs.completion_tokens),
            cached_prompt_tokens: self
                .cached_prompt_tokens
                .saturating_add(rhs.cached_prompt_tokens),
        }
    }
}

impl std::iter::Sum for Usage {
    fn sum<I: Iterator<Item = Usage>>(iter: I) -> Usage {
        iter.fold(Usage::default(), |acc, u| acc + u)
    }
}

/// Creator tags for messages injected by the loop
pub mod creators {
    pub const CALLER: &str = "caller";
    pub const EXCEPTION: &str = "exception";
    pub const INTERRUPT: &str = "interrupt";
    pub const FINAL_NUDGE: &str = "final_nudge";
    pub const CLASSIFIER: &str = "classifier";
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: Uuid,

    /// Message role
    pub role: MessageRole,

    /// Raw text (may be empty for tool-call-only responses)
    pub content: String,

    /// Structured value produced by the prompt's parser
    #[serde(default)]
    pub parsed: Option<Value>,

    /// Tool calls requested by the model, in request order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_requests: Vec<ToolCall>,

    /// Executed tool calls, in request order (tool round messages only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_results: Vec<ToolCallRecord>,

    /// Token usage reported by the backend
    #[serde(default)]
    pub usage: Usage,

    /// Cost reported by the backend, if any
    #[serde(default)]
    pub cost: Option<f64>,

    /// Which prompt or handler produced this message
    pub creator: String,

    /// Model that produced the message, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Timestamp when the message was created
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn build(role: MessageRole, content: String, creator: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            role,
            content,
            parsed: None,
            tool_call_requests: Vec::new(),
            tool_call_results: Vec::new(),
            usage: Usage::default(),
            cost: None,
            creator,
            model: None,
            created_at: Utc::now(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>, creator: impl Into<String>) -> Self {
        Self::build(MessageRole::System, content.into(), creator.into())
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>, creator: impl Into<String>) -> Self {
        Self::build(MessageRole::User, content.into(), creator.into())
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>, creator: impl Into<String>) -> Self {
        Self::build(MessageRole::Assistant, content.into(), creator.into())
    }

    /// Create a message with an explicit role
    pub fn with_role(
        role: MessageRole,
        content: impl Into<String>,
        creator: impl Into<String>,
    ) -> Self {
        Self::build(role, content.into(), creator.into())
    }

    /// Create a tool round message
    ///
    /// Carries both the requests that started the round and the recorded
    /// results, so a backend can replay the round in its own wire format.
    pub fn tool_round(
        content: impl Into<String>,
        requests: Vec<ToolCall>,
        results: Vec<ToolCallRecord>,
        creator: impl Into<String>,
    ) -> Self {
        let mut message = Self::build(MessageRole::Tool, content.into(), creator.into());
        message.tool_call_requests = requests;
        message.tool_call_results = results;
        message
    }

    /// Attach tool call requests
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_call_requests = tool_calls;
        self
    }

    /// Attach backend usage
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Attach backend cost
    pub fn with_cost(mut self, cost: Option<f64>) -> Self {
        self.cost = cost;
        self
    }

    /// Attach model name
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Attach the parsed value (before the message is appended)
    pub fn with_parsed(mut self, parsed: Value) -> Self {
        self.parsed = Some(parsed);
        self
    }

    /// Check if this message requests tool calls
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_call_requests.is_empty()
    }

    /// Whether the content is empty or whitespace
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// Single-line preview of the content
    pub fn preview(&self, max_length: usize) -> String {
        let flat = self.content.replace('\n', "\\n ");
        if flat.chars().count() <= max_length {
            flat
        } else {
            let cut: String = flat.chars().take(max_length).collect();
            format!("{cut}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_message() {
        let msg = Message::user("Hello", creators::CALLER);
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content, "Hello");
        assert_eq!(msg.creator, "caller");
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn test_tool_round_message() {
        let request = ToolCall::new("call_1", "get_weather", json!({"location": "Paris"}));
        let record = ToolCallRecord {
            id: "call_1".to_string(),
            name: "get_weather".to_string(),
            arguments: json!({"location": "Paris"}),
            result: Some(json!("Sunny")),
            result_str: "Sunny".to_string(),
            error: None,
        };
        let msg = Message::tool_round("Sunny", vec![request], vec![record], creators::INTERRUPT);

        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_requests.len(), 1);
        assert_eq!(msg.tool_call_results[0].result_str, "Sunny");
    }

    #[test]
    fn test_blank_and_preview() {
        assert!(Message::assistant("  \n ", "assistant").is_blank());

        let msg = Message::assistant("line one\nline two", "assistant");
        assert_eq!(msg.preview(100), "line one\\n line two");
        assert_eq!(msg.preview(4), "line...");
    }

    #[test]
    fn test_usage_sum() {
        let total: Usage = vec![Usage::new(10, 5), Usage::new(3, 2)].into_iter().sum();
        assert_eq!(total.prompt_tokens, 13);
        assert_eq!(total.completion_tokens, 7);
        assert_eq!(total.total_tokens(), 20);
    }

    #[test]
    fn test_usage_sum_saturates() {
        let total: Usage = vec![Usage::new(u32::MAX, u32::MAX), Usage::new(7, 7)]
            .into_iter()
            .sum();
        assert_eq!(total.prompt_tokens, u32::MAX);
        assert_eq!(total.completion_tokens, u32::MAX);
        assert_eq!(total.total_tokens(), u32::MAX);
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!(MessageRole::from("SYSTEM"), MessageRole::System);
        assert_eq!(MessageRole::from("tool"), MessageRole::Tool);
        assert_eq!(MessageRole::from("anything"), MessageRole::User);
    }
}
