// Tool definitions, requests and recorded results
//
// Tools are identified by name. The same registry that advertises a tool to
// the model is the one that executes it, so the two sets cannot drift apart.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition advertised to the model backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (used by the model and for registry lookup)
    pub name: String,
    /// Tool description for the model
    pub description: String,
    /// JSON schema for tool parameters
    pub parameters: Value,
}

/// Tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call (assigned by the backend)
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// Arguments as JSON
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Same tool with identical arguments
    pub fn same_invocation(&self, other: &ToolCall) -> bool {
        self.name == other.name && self.arguments == other.arguments
    }
}

/// Outcome of one executed (or suppressed) tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Tool call ID this record corresponds to
    pub id: String,
    /// Tool name
    pub name: String,
    /// Arguments the tool was called with
    pub arguments: Value,
    /// Raw result (None when the tool failed or the call was suppressed)
    pub result: Option<Value>,
    /// Text presented to the model
    pub result_str: String,
    /// Error message when the tool failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallRecord {
    /// Whether the tool produced a result
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_invocation_ignores_call_id() {
        let a = ToolCall::new("call_1", "get_weather", json!({"location": "Paris"}));
        let b = ToolCall::new("call_2", "get_weather", json!({"location": "Paris"}));
        let c = ToolCall::new("call_3", "get_weather", json!({"location": "Rome"}));

        assert!(a.same_invocation(&b));
        assert!(!a.same_invocation(&c));
    }

    #[test]
    fn test_tool_call_record_serialization_skips_missing_error() {
        let record = ToolCallRecord {
            id: "call_1".to_string(),
            name: "get_weather".to_string(),
            arguments: json!({"location": "Paris"}),
            result: Some(json!("Sunny")),
            result_str: "Sunny".to_string(),
            error: None,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("error").is_none());
        assert!(record.is_success());

        let parsed: ToolCallRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }
}
