// In-memory implementations for examples and testing
//
// Everything here keeps its state in memory:
// - ScriptedBackend: replays queued responses and records every request
// - FailingBackend: always errors
// - MockToolExecutor: canned tool results with a call log
// - InMemoryEventSink: collects every event

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::dialog::Dialog;
use crate::error::{BackendError, ToolError};
use crate::events::{CallEvent, CallEventKind};
use crate::logprobs::LogprobRequest;
use crate::message::Message;
use crate::tool_types::{ToolCall, ToolDefinition};
use crate::traits::{BackendRequest, EventSink, ModelBackend, ModelResponse, ToolExecutor};

// ============================================================================
// ScriptedBackend - Returns predefined responses
// ============================================================================

#[derive(Debug, Clone)]
enum ScriptedStep {
    Respond(ModelResponse),
    Delayed(Duration, ModelResponse),
    Fail(String),
}

/// One recorded backend invocation
#[derive(Debug, Clone)]
pub struct BackendCall {
    /// Snapshot of the dialog the backend was shown
    pub dialog: Dialog,
    pub tools: Vec<ToolDefinition>,
    /// Classification hints, if the call asked for logprobs
    pub logprobs: Option<LogprobRequest>,
}

/// Model backend that replays a script
///
/// Each invocation pops the next step. When the script runs out the backend
/// returns `BackendError::InvalidResponse`.
#[derive(Debug, Default, Clone)]
pub struct ScriptedBackend {
    script: Arc<RwLock<VecDeque<ScriptedStep>>>,
    call_log: Arc<RwLock<Vec<BackendCall>>>,
}

impl ScriptedBackend {
    pub fn new(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            script: Arc::new(RwLock::new(
                responses.into_iter().map(ScriptedStep::Respond).collect(),
            )),
            call_log: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Backend that repeats the same response `times` times
    pub fn repeating(response: ModelResponse, times: usize) -> Self {
        Self::new(std::iter::repeat(response).take(times))
    }

    /// Queue a response
    pub async fn push(&self, response: ModelResponse) {
        self.script
            .write()
            .await
            .push_back(ScriptedStep::Respond(response));
    }

    /// Queue a response delivered after `delay`
    pub async fn push_delayed(&self, delay: Duration, response: ModelResponse) {
        self.script
            .write()
            .await
            .push_back(ScriptedStep::Delayed(delay, response));
    }

    /// Queue a transport failure
    pub async fn push_error(&self, message: impl Into<String>) {
        self.script
            .write()
            .await
            .push_back(ScriptedStep::Fail(message.into()));
    }

    /// Recorded invocations, oldest first
    pub async fn calls(&self) -> Vec<BackendCall> {
        self.call_log.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.call_log.read().await.len()
    }

    /// Steps not yet consumed
    pub async fn remaining(&self) -> usize {
        self.script.read().await.len()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn invoke(&self, request: BackendRequest<'_>) -> Result<ModelResponse, BackendError> {
        self.call_log.write().await.push(BackendCall {
            dialog: request.dialog.clone(),
            tools: request.tools.to_vec(),
            logprobs: request.logprobs.cloned(),
        });

        let step = self.script.write().await.pop_front();
        match step {
            Some(ScriptedStep::Respond(response)) => Ok(response),
            Some(ScriptedStep::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Some(ScriptedStep::Fail(message)) => Err(BackendError::transport(message)),
            None => Err(BackendError::invalid_response(
                "scripted backend has no more responses",
            )),
        }
    }
}

// ============================================================================
// FailingBackend - Always returns an error
// ============================================================================

/// Backend that always fails
#[derive(Debug, Clone)]
pub struct FailingBackend {
    message: String,
    auth: bool,
}

impl FailingBackend {
    /// Fail with a transport error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            auth: false,
        }
    }

    /// Fail with an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            auth: true,
        }
    }
}

impl Default for FailingBackend {
    fn default() -> Self {
        Self::new("Backend unavailable")
    }
}

#[async_trait]
impl ModelBackend for FailingBackend {
    async fn invoke(&self, _request: BackendRequest<'_>) -> Result<ModelResponse, BackendError> {
        if self.auth {
            Err(BackendError::auth(&self.message))
        } else {
            Err(BackendError::transport(&self.message))
        }
    }
}

// ============================================================================
// MockToolExecutor - Returns predefined results
// ============================================================================

/// Mock tool executor for testing
///
/// Knows exactly the tools given results with `with_result`.
#[derive(Debug, Default, Clone)]
pub struct MockToolExecutor {
    results: HashMap<String, Value>,
    order: Vec<String>,
    call_log: Arc<RwLock<Vec<ToolCall>>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool that always returns `result`
    pub fn with_result(mut self, tool_name: impl Into<String>, result: Value) -> Self {
        let name = tool_name.into();
        if !self.results.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.results.insert(name, result);
        self
    }

    /// Executed calls, oldest first
    pub async fn calls(&self) -> Vec<ToolCall> {
        self.call_log.read().await.clone()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: format!("Mock tool {name}"),
                parameters: serde_json::json!({"type": "object"}),
            })
            .collect()
    }

    fn has(&self, name: &str) -> bool {
        self.results.contains_key(name)
    }

    async fn execute(&self, call: &ToolCall) -> Result<Value, ToolError> {
        self.call_log.write().await.push(call.clone());
        self.results
            .get(&call.name)
            .cloned()
            .ok_or_else(|| ToolError::failed(format!("Tool not found: {}", call.name)))
    }
}

// ============================================================================
// InMemoryEventSink - Collects events
// ============================================================================

/// Event sink that keeps every event in memory
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<CallEvent>>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CallEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All events, in the order they were offered
    pub fn events(&self) -> Vec<CallEvent> {
        self.lock().clone()
    }

    /// Every appended message, canonical or not
    pub fn messages(&self) -> Vec<Message> {
        self.lock()
            .iter()
            .filter_map(|e| e.message().cloned())
            .collect()
    }

    /// Messages appended with `canonical: false`
    pub fn non_canonical_messages(&self) -> Vec<Message> {
        self.lock()
            .iter()
            .filter_map(|e| match &e.kind {
                CallEventKind::MessageAppended {
                    message,
                    canonical: false,
                } => Some(message.as_ref().clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of events with the given name
    pub fn count(&self, name: &str) -> usize {
        self.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl EventSink for InMemoryEventSink {
    fn offer(&self, event: CallEvent) {
        self.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CallState;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_scripted_backend_replays_in_order() {
        let backend = ScriptedBackend::new(vec![
            ModelResponse::text("first"),
            ModelResponse::text("second"),
        ]);
        let dialog = Dialog::new("test");
        let request = BackendRequest::new(&dialog, &[]);

        assert_eq!(backend.invoke(request).await.unwrap().content, "first");
        assert_eq!(backend.invoke(request).await.unwrap().content, "second");
        assert!(matches!(
            backend.invoke(request).await,
            Err(BackendError::InvalidResponse(_))
        ));
        assert_eq!(backend.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_scripted_backend_error_step() {
        let backend = ScriptedBackend::default();
        backend.push_error("connection reset").await;
        let dialog = Dialog::new("test");

        let err = backend
            .invoke(BackendRequest::new(&dialog, &[]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Transport error: connection reset");
    }

    #[tokio::test]
    async fn test_mock_tool_executor() {
        let executor = MockToolExecutor::new().with_result("get_weather", json!("Sunny"));
        assert!(executor.has("get_weather"));
        assert_eq!(executor.definitions().len(), 1);

        let call = ToolCall::new("call_1", "get_weather", json!({"location": "Paris"}));
        assert_eq!(executor.execute(&call).await.unwrap(), json!("Sunny"));
        assert_eq!(executor.calls().await, vec![call]);
    }

    #[test]
    fn test_in_memory_sink() {
        let sink = InMemoryEventSink::new();
        let id = Uuid::now_v7();
        sink.offer(CallEvent::state_changed(id, CallState::Init, CallState::AwaitingModel));
        sink.offer(CallEvent::message_appended(id, Message::user("hi", "caller"), false));

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.count("state_changed"), 1);
        assert_eq!(sink.non_canonical_messages().len(), 1);

        sink.clear();
        assert!(sink.events().is_empty());
    }
}
