// Structured Agent Call runtime
//
// This crate turns a single model invocation into a deterministic, retryable,
// tool-capable exchange that ends in a parsed value or a typed failure.
//
// Key design decisions:
// - Uses traits (ModelBackend, ToolExecutor, EventSink) for pluggable collaborators
// - The Dialog keeps a canonical view plus pruned segments; repairs run on a
//   forked branch that is adopted only after a usable response
// - Tool calls take precedence over content when classifying a response
// - Retry and tool-round budgets are owned by the loop; backend errors are terminal
// - Prompts and tools live in explicit registries, never in global state
// - Error handling distinguishes between model-visible and internal tool errors

pub mod classifier;
pub mod config;
pub mod dialog;
pub mod error;
pub mod events;
pub mod logprobs;
pub mod r#loop;
pub mod message;
pub mod parser;
pub mod prompt;
pub mod registry;
pub mod state;
pub mod tool_types;
pub mod tools;
pub mod traits;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use classifier::{Classification, Classifier, DefaultClassifier, MalformedReason};
pub use config::{CallConfig, CallConfigBuilder};
pub use dialog::{Dialog, PrunedSegment};
pub use error::{
    AgentCallError, BackendError, DialogError, FailureKind, ParseError, PromptError,
    RegistryError, Result, ToolError,
};
pub use events::{CallEvent, CallEventKind, ChannelEventSink, NoopEventSink, TracingEventSink};
pub use logprobs::{LogprobRequest, TokenLogprob, TopLogprob};
pub use message::{creators, Message, MessageRole, Usage};
pub use parser::{
    BoundParser, FnParser, Parser, StructuredParser, TagParser, TagParserBuilder, TextParser,
};
pub use prompt::{Prompt, PromptArgs, PromptBuilder, Template};
pub use r#loop::{AgentCall, CallOptions, CallOutcome, ClassifyOutcome};
pub use registry::PromptRegistry;
pub use state::{CallState, CallStats};
pub use traits::{BackendRequest, EventSink, ModelBackend, ModelResponse, ToolExecutor};

// Tool abstraction re-exports
pub use tool_types::{ToolCall, ToolCallRecord, ToolDefinition};
pub use tools::{EchoTool, FailingTool, FunctionTool, Tool, ToolRegistry, ToolRegistryBuilder};
