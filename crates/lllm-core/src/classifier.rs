// Response classification
//
// Every model response is labelled Success, ToolInterrupt or Malformed before
// the loop acts on it. Tool intent wins over content: a response that requests
// only known tools is a ToolInterrupt even if its text would parse.

use serde_json::Value;

use crate::error::ParseError;
use crate::message::Message;
use crate::parser::Parser;
use crate::traits::ToolExecutor;

/// Why a response was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    /// No content and no tool calls
    Empty,
    /// The output contract was not satisfied
    Parse(ParseError),
    /// The model requested tools that are not bound
    UnknownTool {
        requested: Vec<String>,
        available: Vec<String>,
    },
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedReason::Empty => {
                write!(f, "The response is empty. Please provide a response.")
            }
            MalformedReason::Parse(err) => write!(f, "{}", err.reason),
            MalformedReason::UnknownTool {
                requested,
                available,
            } => {
                write!(f, "The function(s) {} do not exist.", requested.join(", "))?;
                if available.is_empty() {
                    write!(f, " No functions are available, please answer directly.")
                } else {
                    write!(f, " Available functions: {}.", available.join(", "))
                }
            }
        }
    }
}

/// Outcome of classifying one response
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Parsed output, ready to be returned
    Success(Value),
    /// Every requested tool is bound; execute them
    ToolInterrupt,
    /// Needs repair
    Malformed(MalformedReason),
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Success(_) => "success",
            Classification::ToolInterrupt => "tool_interrupt",
            Classification::Malformed(_) => "malformed",
        }
    }
}

/// Labels a model response
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        message: &Message,
        parser: &dyn Parser,
        tools: &dyn ToolExecutor,
    ) -> Classification;
}

/// The standard policy
///
/// 1. Tool calls present: ToolInterrupt if every name is bound, otherwise
///    Malformed(UnknownTool). No call of the round runs in the latter case.
/// 2. Blank content: Malformed(Empty).
/// 3. Otherwise the parser decides.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassifier;

impl Classifier for DefaultClassifier {
    fn classify(
        &self,
        message: &Message,
        parser: &dyn Parser,
        tools: &dyn ToolExecutor,
    ) -> Classification {
        if message.has_tool_calls() {
            let mut unknown: Vec<String> = Vec::new();
            for call in &message.tool_call_requests {
                if !tools.has(&call.name) && !unknown.contains(&call.name) {
                    unknown.push(call.name.clone());
                }
            }
            if unknown.is_empty() {
                return Classification::ToolInterrupt;
            }
            return Classification::Malformed(MalformedReason::UnknownTool {
                requested: unknown,
                available: tools.definitions().into_iter().map(|d| d.name).collect(),
            });
        }

        if message.is_blank() {
            return Classification::Malformed(MalformedReason::Empty);
        }

        match parser.parse(&message.content) {
            Ok(value) => Classification::Success(value),
            Err(err) => Classification::Malformed(MalformedReason::Parse(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TagParser;
    use crate::tool_types::ToolCall;
    use crate::tools::{EchoTool, ToolRegistry};
    use serde_json::json;

    fn setup() -> (TagParser, ToolRegistry) {
        (
            TagParser::single("answer").unwrap(),
            ToolRegistry::builder().tool(EchoTool).build(),
        )
    }

    #[test]
    fn test_success() {
        let (parser, tools) = setup();
        let message = Message::assistant("<answer>4</answer>", "assistant");
        assert_eq!(
            DefaultClassifier.classify(&message, &parser, &tools),
            Classification::Success(json!("4"))
        );
    }

    #[test]
    fn test_tool_calls_take_precedence_over_parseable_content() {
        let (parser, tools) = setup();
        let message = Message::assistant("<answer>4</answer>", "assistant").with_tool_calls(vec![
            ToolCall::new("call_1", "echo", json!({"message": "hi"})),
        ]);
        assert_eq!(
            DefaultClassifier.classify(&message, &parser, &tools),
            Classification::ToolInterrupt
        );
    }

    #[test]
    fn test_unknown_tool_is_malformed() {
        let (parser, tools) = setup();
        let message = Message::assistant("", "assistant").with_tool_calls(vec![
            ToolCall::new("call_1", "echo", json!({"message": "hi"})),
            ToolCall::new("call_2", "launch_rocket", json!({})),
        ]);

        let Classification::Malformed(reason) = DefaultClassifier.classify(&message, &parser, &tools)
        else {
            panic!("expected malformed");
        };
        assert_eq!(
            reason.to_string(),
            "The function(s) launch_rocket do not exist. Available functions: echo."
        );
    }

    #[test]
    fn test_empty_response_is_malformed() {
        let (parser, tools) = setup();
        let message = Message::assistant("   ", "assistant");
        assert_eq!(
            DefaultClassifier.classify(&message, &parser, &tools),
            Classification::Malformed(MalformedReason::Empty)
        );
    }

    #[test]
    fn test_parse_failure_is_malformed() {
        let (parser, tools) = setup();
        let message = Message::assistant("I think the answer is 4", "assistant");
        let classification = DefaultClassifier.classify(&message, &parser, &tools);
        assert_eq!(classification.label(), "malformed");
    }
}
