// Error types for the Agent Call loop
//
// Structural errors (missing arguments, backend failures) surface immediately.
// Content-level errors (ParseError, unknown tools) are handled inside the loop
// and only reach the caller once a retry budget is exhausted.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dialog::Dialog;
use crate::tool_types::ToolCall;

/// Result type alias for Agent Call operations
pub type Result<T> = std::result::Result<T, AgentCallError>;

/// Coarse classification of a terminal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingArgument,
    InvalidPrompt,
    PromptNotFound,
    Backend,
    RetryBudgetExceeded,
    InterruptBudgetExceeded,
    ToolFatal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::MissingArgument => "missing_argument",
            FailureKind::InvalidPrompt => "invalid_prompt",
            FailureKind::PromptNotFound => "prompt_not_found",
            FailureKind::Backend => "backend",
            FailureKind::RetryBudgetExceeded => "retry_budget_exceeded",
            FailureKind::InterruptBudgetExceeded => "interrupt_budget_exceeded",
            FailureKind::ToolFatal => "tool_fatal",
        };
        f.write_str(s)
    }
}

/// Terminal failures of an Agent Call
///
/// Every failure raised after the dialog was seeded carries that dialog, so
/// the caller can log it for triage or resume the conversation manually.
#[derive(Debug, Error)]
pub enum AgentCallError {
    /// A placeholder in the prompt template had no value
    #[error("Missing argument `{argument}` for prompt {prompt}")]
    MissingArgument { prompt: String, argument: String },

    /// Prompt could not be built or rendered
    #[error("Invalid prompt: {0}")]
    InvalidPrompt(PromptError),

    /// Prompt path not present in the registry
    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    /// Model backend failed (never retried by the loop)
    #[error("Backend error: {source}")]
    Backend {
        #[source]
        source: BackendError,
        dialog: Box<Dialog>,
    },

    /// The model kept producing malformed output
    #[error("Retry budget exceeded after {retries} repair attempts: {reason}")]
    RetryBudgetExceeded {
        retries: usize,
        reason: String,
        last_content: String,
        dialog: Box<Dialog>,
    },

    /// The model kept requesting tools
    #[error("Interrupt budget exceeded after {rounds} tool rounds")]
    InterruptBudgetExceeded {
        rounds: usize,
        last_requests: Vec<ToolCall>,
        dialog: Box<Dialog>,
    },

    /// A tool signalled a condition the loop must not continue past
    #[error("Tool {tool} failed fatally: {reason}")]
    ToolFatal {
        tool: String,
        reason: String,
        dialog: Box<Dialog>,
    },
}

impl AgentCallError {
    /// Failure classification
    pub fn kind(&self) -> FailureKind {
        match self {
            AgentCallError::MissingArgument { .. } => FailureKind::MissingArgument,
            AgentCallError::InvalidPrompt(_) => FailureKind::InvalidPrompt,
            AgentCallError::PromptNotFound(_) => FailureKind::PromptNotFound,
            AgentCallError::Backend { .. } => FailureKind::Backend,
            AgentCallError::RetryBudgetExceeded { .. } => FailureKind::RetryBudgetExceeded,
            AgentCallError::InterruptBudgetExceeded { .. } => FailureKind::InterruptBudgetExceeded,
            AgentCallError::ToolFatal { .. } => FailureKind::ToolFatal,
        }
    }

    /// Human-readable reason, suitable for logs
    pub fn reason(&self) -> String {
        match self {
            AgentCallError::RetryBudgetExceeded { reason, .. } => reason.clone(),
            AgentCallError::ToolFatal { reason, .. } => reason.clone(),
            AgentCallError::Backend { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }

    /// Dialog as it stood when the call failed
    pub fn dialog(&self) -> Option<&Dialog> {
        match self {
            AgentCallError::Backend { dialog, .. }
            | AgentCallError::RetryBudgetExceeded { dialog, .. }
            | AgentCallError::InterruptBudgetExceeded { dialog, .. }
            | AgentCallError::ToolFatal { dialog, .. } => Some(dialog),
            _ => None,
        }
    }

    /// Take ownership of the dialog carried by the failure
    pub fn into_dialog(self) -> Option<Dialog> {
        match self {
            AgentCallError::Backend { dialog, .. }
            | AgentCallError::RetryBudgetExceeded { dialog, .. }
            | AgentCallError::InterruptBudgetExceeded { dialog, .. }
            | AgentCallError::ToolFatal { dialog, .. } => Some(*dialog),
            _ => None,
        }
    }

    /// Create a backend failure
    pub fn backend(source: BackendError, dialog: Dialog) -> Self {
        AgentCallError::Backend {
            source,
            dialog: Box::new(dialog),
        }
    }
}

impl From<PromptError> for AgentCallError {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::MissingArgument { prompt, argument } => {
                AgentCallError::MissingArgument { prompt, argument }
            }
            other => AgentCallError::InvalidPrompt(other),
        }
    }
}

impl From<RegistryError> for AgentCallError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::PromptNotFound(path) => AgentCallError::PromptNotFound(path),
            RegistryError::DuplicatePrompt(path) => {
                AgentCallError::InvalidPrompt(PromptError::invalid(format!(
                    "duplicate prompt path {path}"
                )))
            }
        }
    }
}

/// Errors reported by a model backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network / connection failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend did not answer in time
    #[error("Backend timed out after {0:?}")]
    Timeout(Duration),

    /// Provider rejected the call because of rate limits
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Credentials missing or rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Response could not be decoded into a ModelResponse
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackendError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        BackendError::Transport(msg.into())
    }

    /// Create an auth error
    pub fn auth(msg: impl Into<String>) -> Self {
        BackendError::Auth(msg.into())
    }

    /// Create an invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        BackendError::InvalidResponse(msg.into())
    }
}

/// Errors raised by a tool during execution
///
/// - `Failed`: expected failure, the message is shown to the model
/// - `Internal`: unexpected failure, logged with details but replaced by a
///   generic message before it reaches the model
/// - `Fatal`: the loop stops with `AgentCallError::ToolFatal`
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),

    #[error("Internal tool error: {0}")]
    Internal(anyhow::Error),

    #[error("Fatal tool error: {0}")]
    Fatal(String),
}

impl ToolError {
    /// Create a tool-level error (safe to show to the model)
    pub fn failed(msg: impl Into<String>) -> Self {
        ToolError::Failed(msg.into())
    }

    /// Create an internal error (hidden from the model)
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        ToolError::Internal(err.into())
    }

    /// Create an internal error from a message
    pub fn internal_msg(msg: impl std::fmt::Display) -> Self {
        ToolError::Internal(anyhow::anyhow!("{msg}"))
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        ToolError::Fatal(msg.into())
    }

    /// Whether the loop must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, ToolError::Fatal(_))
    }
}

/// Output contract was not satisfied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Combine several problems into a single error
    pub fn from_problems(problems: &[String]) -> Self {
        Self::new(format!("Parsing errors:\n{}", problems.join("\n")))
    }
}

/// Prompt construction and rendering errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    /// A required placeholder had no value at render time
    #[error("Missing argument `{argument}` for prompt {prompt}")]
    MissingArgument { prompt: String, argument: String },

    /// Template braces do not balance
    #[error("Malformed template for {prompt}: {detail}")]
    MalformedTemplate { prompt: String, detail: String },

    /// A handler template lacks its mandatory placeholder
    #[error("Template {template} of {prompt} must contain {{{placeholder}}}")]
    MissingHandlerPlaceholder {
        prompt: String,
        template: &'static str,
        placeholder: &'static str,
    },

    /// Anything else wrong with the prompt definition
    #[error("{0}")]
    Invalid(String),
}

impl PromptError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        PromptError::Invalid(msg.into())
    }
}

/// Dialog manipulation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialogError {
    #[error("Index {index} out of range for dialog of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Prompt registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Prompt already registered: {0}")]
    DuplicatePrompt(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_error_maps_missing_argument() {
        let err: AgentCallError = PromptError::MissingArgument {
            prompt: "tasks/solve".to_string(),
            argument: "task".to_string(),
        }
        .into();

        assert_eq!(err.kind(), FailureKind::MissingArgument);
        assert!(err.dialog().is_none());
        assert_eq!(
            err.to_string(),
            "Missing argument `task` for prompt tasks/solve"
        );
    }

    #[test]
    fn test_backend_failure_carries_dialog() {
        let dialog = Dialog::new("session");
        let id = dialog.id();
        let err = AgentCallError::backend(BackendError::transport("connection reset"), dialog);

        assert_eq!(err.kind(), FailureKind::Backend);
        assert_eq!(err.reason(), "Transport error: connection reset");
        assert_eq!(err.into_dialog().map(|d| d.id()), Some(id));
    }

    #[test]
    fn test_parse_error_from_problems() {
        let err = ParseError::from_problems(&["No answer tags found".to_string()]);
        assert_eq!(err.reason, "Parsing errors:\nNo answer tags found");
    }

    #[test]
    fn test_tool_error_fatality() {
        assert!(ToolError::fatal("disk gone").is_fatal());
        assert!(!ToolError::failed("city not found").is_fatal());
        assert!(!ToolError::internal_msg("db down").is_fatal());
    }
}
