// Core traits for pluggable collaborators
//
// The Agent Call loop only talks to the outside world through these traits:
// - ModelBackend: send a dialog, get one response
// - ToolExecutor: run a requested tool call
// - EventSink: observe every append, fork, prune and state change
//
// Production code plugs in provider clients and log storage; tests use the
// in-memory doubles from `memory`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::dialog::Dialog;
use crate::error::{BackendError, ToolError};
use crate::events::CallEvent;
use crate::logprobs::{LogprobRequest, TokenLogprob};
use crate::message::{Message, Usage};
use crate::tool_types::{ToolCall, ToolDefinition};
use crate::tools::format_call_result;

// ============================================================================
// ModelBackend - For calling the model
// ============================================================================

/// What the loop hands to the backend for one invocation
#[derive(Debug, Clone, Copy)]
pub struct BackendRequest<'a> {
    /// Working dialog (canonical, or the open repair branch)
    pub dialog: &'a Dialog,
    /// Tools the model may call
    pub tools: &'a [ToolDefinition],
    /// Set for classification calls: return one biased token with logprobs
    pub logprobs: Option<&'a LogprobRequest>,
}

impl<'a> BackendRequest<'a> {
    pub fn new(dialog: &'a Dialog, tools: &'a [ToolDefinition]) -> Self {
        Self {
            dialog,
            tools,
            logprobs: None,
        }
    }

    pub fn with_logprobs(mut self, request: &'a LogprobRequest) -> Self {
        self.logprobs = Some(request);
        self
    }
}

/// One response from the model backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Raw text (may be empty when only tool calls are returned)
    #[serde(default)]
    pub content: String,
    /// Tool calls requested by the model, in request order
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: Usage,
    /// Cost as reported by the provider (never computed here)
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
    /// Per-token log-probabilities, when the request asked for them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<TokenLogprob>>,
}

impl ModelResponse {
    /// A plain text response
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// A response requesting tool calls
    pub fn with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_logprobs(mut self, logprobs: Vec<TokenLogprob>) -> Self {
        self.logprobs = Some(logprobs);
        self
    }

    /// Convert into an assistant-side message tagged with `creator`
    pub fn into_message(self, creator: impl Into<String>) -> Message {
        Message::assistant(self.content, creator)
            .with_tool_calls(self.tool_calls)
            .with_usage(self.usage)
            .with_cost(self.cost)
            .with_model(self.model)
    }
}

/// Trait for model backends
///
/// Implementations handle provider-specific wire formats, authentication and
/// rate limiting. A returned error is terminal for the call: the loop never
/// retries backend failures.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn invoke(&self, request: BackendRequest<'_>) -> Result<ModelResponse, BackendError>;
}

#[async_trait]
impl<T: ModelBackend + ?Sized> ModelBackend for Box<T> {
    async fn invoke(&self, request: BackendRequest<'_>) -> Result<ModelResponse, BackendError> {
        (**self).invoke(request).await
    }
}

#[async_trait]
impl<T: ModelBackend + ?Sized> ModelBackend for Arc<T> {
    async fn invoke(&self, request: BackendRequest<'_>) -> Result<ModelResponse, BackendError> {
        (**self).invoke(request).await
    }
}

// ============================================================================
// ToolExecutor - For executing tool calls
// ============================================================================

/// Trait for executing tool calls
///
/// `definitions` and `has` must describe the same set of tools that
/// `execute` can run.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Definitions advertised to the model
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Whether a tool with this name can be executed
    fn has(&self, name: &str) -> bool;

    /// Execute a single tool call
    async fn execute(&self, call: &ToolCall) -> Result<Value, ToolError>;

    /// Text the model sees for a successful call
    fn format_result(&self, call: &ToolCall, result: &Value) -> String {
        format_call_result(&call.name, &call.arguments, result)
    }
}

// ============================================================================
// EventSink - For observing the call
// ============================================================================

/// Receives every event of an Agent Call
///
/// Offering is fire-and-forget: a sink must not block, and nothing it does
/// affects the call. Panics raised by a sink are caught and logged.
pub trait EventSink: Send + Sync {
    fn offer(&self, event: CallEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn offer(&self, event: CallEvent) {
        (**self).offer(event)
    }
}
