// Tool abstraction for the Agent Call loop
//
// Tools are defined with the `Tool` trait (or `FunctionTool` for closures)
// and registered with a `ToolRegistry`. The registry is both what the model is
// told about and what executes calls, so advertised and executable names are
// the same set.
//
// Error handling contract:
// - Ok(value): formatted with `format_result` and shown to the model
// - ToolError::Failed: message shown to the model
// - ToolError::Internal: logged with details, the model sees a generic message
// - ToolError::Fatal: the loop stops

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::ToolError;
use crate::tool_types::{ToolCall, ToolCallRecord, ToolDefinition};
use crate::traits::ToolExecutor;

/// Message the model sees in place of internal error details
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred while executing the tool";

// ============================================================================
// Result formatting
// ============================================================================

/// Render a JSON value for the model: strings raw, everything else compact JSON
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Default rendering of a successful call
pub fn format_call_result(name: &str, arguments: &Value, result: &Value) -> String {
    format!(
        "Return of calling function {name} with arguments {arguments}:\n---\n{}\n---\n",
        display_value(result)
    )
}

/// Default rendering of a failed call
pub fn format_call_error(name: &str, arguments: &Value, message: &str) -> String {
    format!("Error calling function {name} with arguments {arguments}:\n---\n{message}\n---\n")
}

/// Rendering of a call suppressed because it was already made
pub fn format_repeated_call(name: &str, arguments: &Value) -> String {
    format!(
        "The function {name} with identical arguments {arguments} has been called earlier, \
         please check the previous results and do not call it again. If you do not need to \
         call more functions, just stop calling and provide the final response."
    )
}

/// Turn an execution outcome into the record shown to the model
///
/// Only `ToolError::Fatal` comes back as `Err`; every other failure becomes a
/// record the model can react to.
pub fn into_record(
    call: &ToolCall,
    outcome: std::result::Result<Value, ToolError>,
    executor: &dyn ToolExecutor,
) -> std::result::Result<ToolCallRecord, ToolError> {
    match outcome {
        Ok(value) => Ok(ToolCallRecord {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            result_str: executor.format_result(call, &value),
            result: Some(value),
            error: None,
        }),
        Err(ToolError::Failed(message)) => {
            warn!(tool_name = %call.name, tool_call_id = %call.id, error = %message, "Tool failed");
            Ok(failed_record(call, message))
        }
        Err(ToolError::Internal(err)) => {
            error!(
                tool_name = %call.name,
                tool_call_id = %call.id,
                error = %err,
                "Tool internal error (details hidden from model)"
            );
            Ok(failed_record(call, INTERNAL_ERROR_MESSAGE.to_string()))
        }
        Err(fatal @ ToolError::Fatal(_)) => Err(fatal),
    }
}

fn failed_record(call: &ToolCall, message: String) -> ToolCallRecord {
    ToolCallRecord {
        id: call.id.clone(),
        name: call.name.clone(),
        arguments: call.arguments.clone(),
        result: None,
        result_str: format_call_error(&call.name, &call.arguments, &message),
        error: Some(message),
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// Trait for implementing tools the model can call.
///
/// # Example
///
/// ```ignore
/// struct GetWeather;
///
/// #[async_trait]
/// impl Tool for GetWeather {
///     fn name(&self) -> &str {
///         "get_weather"
///     }
///
///     fn description(&self) -> &str {
///         "Get the current weather for a location"
///     }
///
///     fn parameters_schema(&self) -> Value {
///         json!({
///             "type": "object",
///             "properties": { "location": { "type": "string" } },
///             "required": ["location"]
///         })
///     }
///
///     async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
///         Ok(json!("Sunny"))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a registry, used by the model to invoke the tool
    fn name(&self) -> &str;

    /// Description shown to the model
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with arguments taken from the model's request
    async fn execute(&self, arguments: Value) -> std::result::Result<Value, ToolError>;

    /// Text the model sees for a successful result
    fn format_result(&self, arguments: &Value, result: &Value) -> String {
        format_call_result(self.name(), arguments, result)
    }

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

// ============================================================================
// FunctionTool - closure-backed tool
// ============================================================================

type ToolHandler =
    dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Value, ToolError>> + Send + Sync;

/// A tool backed by an async closure
///
/// ```ignore
/// let weather = FunctionTool::new(
///     "get_weather",
///     "Get the current weather for a location",
///     json!({"type": "object", "properties": {"location": {"type": "string"}}}),
///     |_args| async { Ok(json!("Sunny")) },
/// );
/// ```
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    handler: Arc<ToolHandler>,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args| handler(args).boxed()),
        }
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: Value) -> std::result::Result<Value, ToolError> {
        (self.handler)(arguments).await
    }
}

// ============================================================================
// ToolRegistry - Collection of Tools
// ============================================================================

/// An ordered set of tools that implements `ToolExecutor`.
///
/// Definitions are advertised in registration order. Registering a name twice
/// replaces the earlier tool in place.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with the registry
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an Arc-wrapped tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&pos) => self.tools[pos] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&pos| &self.tools[pos])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names in registration order
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Create a builder for fluent tool registration
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    async fn execute(&self, call: &ToolCall) -> std::result::Result<Value, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::failed(format!("Tool not found: {}", call.name)))?;
        tool.execute(call.arguments.clone()).await
    }

    fn format_result(&self, call: &ToolCall, result: &Value) -> String {
        match self.get(&call.name) {
            Some(tool) => tool.format_result(&call.arguments, result),
            None => format_call_result(&call.name, &call.arguments, result),
        }
    }
}

// ============================================================================
// ToolRegistryBuilder - Fluent API for Building Registry
// ============================================================================

/// Builder for creating a ToolRegistry with a fluent API.
///
/// ```ignore
/// let registry = ToolRegistry::builder()
///     .tool(GetWeather)
///     .tool(EchoTool)
///     .build();
/// ```
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self {
            registry: ToolRegistry::new(),
        }
    }

    /// Add a tool to the registry
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    /// Add an Arc-wrapped tool to the registry
    pub fn tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.registry.register_arc(tool);
        self
    }

    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// A tool that echoes back its arguments (useful for testing)
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo back the provided message. Useful for testing tool execution."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo back"
                }
            },
            "required": ["message"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value) -> std::result::Result<Value, ToolError> {
        let message = arguments
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::failed("Missing required argument: message"))?;

        Ok(serde_json::json!({
            "echoed": message,
            "length": message.len()
        }))
    }
}

/// How a `FailingTool` fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Failed,
    Internal,
    Fatal,
}

/// A tool that always fails (useful for testing error handling)
pub struct FailingTool {
    name: String,
    error_message: String,
    mode: FailureMode,
}

impl FailingTool {
    /// Fail with a message the model is allowed to see
    pub fn with_tool_error(message: impl Into<String>) -> Self {
        Self::new(message, FailureMode::Failed)
    }

    /// Fail with an internal error
    pub fn with_internal_error(message: impl Into<String>) -> Self {
        Self::new(message, FailureMode::Internal)
    }

    /// Fail in a way that stops the loop
    pub fn with_fatal_error(message: impl Into<String>) -> Self {
        Self::new(message, FailureMode::Fatal)
    }

    fn new(message: impl Into<String>, mode: FailureMode) -> Self {
        Self {
            name: "failing_tool".to_string(),
            error_message: message.into(),
            mode,
        }
    }

    /// Register under a different name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for FailingTool {
    fn default() -> Self {
        Self::with_tool_error("Tool execution failed")
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "A tool that always fails (for testing error handling)"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, _arguments: Value) -> std::result::Result<Value, ToolError> {
        Err(match self.mode {
            FailureMode::Failed => ToolError::failed(&self.error_message),
            FailureMode::Internal => ToolError::internal_msg(&self.error_message),
            FailureMode::Fatal => ToolError::fatal(&self.error_message),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_tool() -> FunctionTool {
        FunctionTool::new(
            "get_weather",
            "Get the current weather for a location",
            json!({"type": "object", "properties": {"location": {"type": "string"}}}),
            |args| async move {
                match args.get("location").and_then(|v| v.as_str()) {
                    Some("Paris") => Ok(json!("Sunny")),
                    Some(other) => Err(ToolError::failed(format!("Unknown city: {other}"))),
                    None => Err(ToolError::failed("location is required")),
                }
            },
        )
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let result = EchoTool
            .execute(json!({"message": "Hello, world!"}))
            .await
            .unwrap();

        assert_eq!(result["echoed"], "Hello, world!");
        assert_eq!(result["length"], 13);
    }

    #[tokio::test]
    async fn test_function_tool() {
        let tool = weather_tool();
        assert_eq!(tool.execute(json!({"location": "Paris"})).await.unwrap(), json!("Sunny"));

        let err = tool.execute(json!({"location": "Atlantis"})).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown city: Atlantis");
    }

    #[tokio::test]
    async fn test_failing_tool_modes() {
        let err = FailingTool::with_tool_error("Something went wrong")
            .execute(json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(ref m) if m == "Something went wrong"));

        let err = FailingTool::with_internal_error("Database connection failed")
            .execute(json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Internal(_)));

        let err = FailingTool::with_fatal_error("disk gone")
            .execute(json!({}))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_default_result_format() {
        let text = format_call_result("get_weather", &json!({"location": "Paris"}), &json!("Sunny"));
        assert_eq!(
            text,
            "Return of calling function get_weather with arguments {\"location\":\"Paris\"}:\n---\nSunny\n---\n"
        );
    }

    #[tokio::test]
    async fn test_into_record_hides_internal_details() {
        let registry = ToolRegistry::builder()
            .tool(FailingTool::with_internal_error("password=hunter2"))
            .build();
        let call = ToolCall::new("call_1", "failing_tool", json!({}));

        let outcome = registry.execute(&call).await;
        let record = into_record(&call, outcome, &registry).unwrap();

        assert!(!record.is_success());
        assert_eq!(record.error.as_deref(), Some(INTERNAL_ERROR_MESSAGE));
        assert!(!record.result_str.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_into_record_surfaces_tool_error() {
        let registry = ToolRegistry::builder().tool(weather_tool()).build();
        let call = ToolCall::new("call_1", "get_weather", json!({"location": "Atlantis"}));

        let outcome = registry.execute(&call).await;
        let record = into_record(&call, outcome, &registry).unwrap();

        assert_eq!(record.error.as_deref(), Some("Unknown city: Atlantis"));
        assert!(record.result_str.contains("Unknown city: Atlantis"));
    }

    #[tokio::test]
    async fn test_into_record_passes_fatal_through() {
        let registry = ToolRegistry::builder()
            .tool(FailingTool::with_fatal_error("disk gone"))
            .build();
        let call = ToolCall::new("call_1", "failing_tool", json!({}));

        let outcome = registry.execute(&call).await;
        assert!(into_record(&call, outcome, &registry).unwrap_err().is_fatal());
    }

    #[test]
    fn test_tool_registry_keeps_registration_order() {
        let registry = ToolRegistry::builder()
            .tool(weather_tool())
            .tool(EchoTool)
            .tool(FailingTool::default())
            .build();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.tool_names(), vec!["get_weather", "echo", "failing_tool"]);

        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["get_weather", "echo", "failing_tool"]);
    }

    #[test]
    fn test_register_same_name_replaces_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(FailingTool::default().named("a"));
        registry.register(EchoTool);
        registry.register(FailingTool::with_fatal_error("x").named("a"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.tool_names(), vec!["a", "echo"]);
    }

    #[tokio::test]
    async fn test_tool_registry_as_executor() {
        let registry = ToolRegistry::builder().tool(EchoTool).build();
        assert!(registry.has("echo"));
        assert!(!registry.has("nonexistent"));

        let call = ToolCall::new("call_1", "echo", json!({"message": "test"}));
        let result = registry.execute(&call).await.unwrap();
        assert_eq!(result["echoed"], "test");

        let missing = ToolCall::new("call_2", "nonexistent", json!({}));
        assert!(registry.execute(&missing).await.is_err());
    }
}
