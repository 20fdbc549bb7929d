//! Scripted Agent Call Example
//!
//! Runs one Agent Call against a scripted backend: the model first answers
//! without tags, gets repaired, asks for the weather, and finally answers.
//!
//! Run with:
//!   cargo run --example scripted_call -p lllm-core
//!
//! Budgets can be tuned through the environment, e.g.:
//!   LLLM_MAX_EXCEPTION_RETRIES=0 cargo run --example scripted_call -p lllm-core

use lllm_core::memory::ScriptedBackend;
use lllm_core::{
    AgentCall, CallConfig, FunctionTool, ModelResponse, Prompt, PromptArgs, TagParser, ToolCall,
    ToolError, TracingEventSink, Usage,
};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info,lllm_core=debug")
        .init();

    let weather = FunctionTool::new(
        "get_weather",
        "Get the current weather for a location",
        json!({
            "type": "object",
            "properties": {"location": {"type": "string"}},
            "required": ["location"]
        }),
        |args| async move {
            match args.get("location").and_then(|v| v.as_str()) {
                Some(location) => Ok(json!(format!("Sunny, 22C in {location}"))),
                None => Err(ToolError::failed("location is required")),
            }
        },
    );

    let prompt = Prompt::builder(
        "weather/report",
        "Report the weather in {city}. Put the report in <report> tags.",
    )
    .parser(TagParser::single("report")?)
    .tool(weather)
    .build()?;

    let backend = ScriptedBackend::new(vec![
        ModelResponse::text("It is probably nice out.").with_usage(Usage::new(40, 8)),
        ModelResponse::with_tools(
            "",
            vec![ToolCall::new(
                "call_1",
                "get_weather",
                json!({"location": "Paris"}),
            )],
        )
        .with_usage(Usage::new(70, 12)),
        ModelResponse::text("<report>Sunny, 22C in Paris</report>")
            .with_usage(Usage::new(110, 10))
            .with_model("scripted-1"),
    ]);

    let call = AgentCall::new(backend)
        .with_config(CallConfig::from_env())
        .with_sink(TracingEventSink);

    println!("=== Scripted Agent Call ===");
    println!();

    match call
        .run(&prompt, &PromptArgs::new().with("city", "Paris"), None)
        .await
    {
        Ok(outcome) => {
            println!("Parsed: {}", outcome.parsed);
            println!(
                "Backend calls: {}, repairs: {}, tool rounds: {}",
                outcome.stats.backend_calls,
                outcome.stats.exception_retries,
                outcome.stats.interrupt_rounds
            );
            println!("Usage: {} tokens", outcome.dialog.usage().total_tokens());
            println!();
            println!("{}", outcome.dialog.overview(80));
        }
        Err(err) => {
            println!("Call failed ({:?}): {}", err.kind(), err.reason());
            if let Some(dialog) = err.dialog() {
                println!("{}", dialog.overview(80));
            }
        }
    }

    Ok(())
}
