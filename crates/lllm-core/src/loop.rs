// Agent Call - the state machine behind one structured model call
//
// AgentCall drives a Dialog from a rendered Prompt to a parsed result:
//
// ```text
// Init -> AwaitingModel -> Classifying -+-> Succeeded
//              ^                         +-> ExecutingTools --+
//              |                         +-> Repairing -------+
//              +----------------------------------------------+
// ```
//
// Repairs happen on a forked branch. The branch is adopted only once the
// model produces a usable response, and the adoption prunes the malformed
// responses and exception prompts, so the canonical dialog never carries
// retry noise. Tool rounds are appended only after every call of the round
// finished. Dropping the future at any await point therefore never leaves a
// half-applied dialog behind.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::classifier::{Classification, Classifier, DefaultClassifier};
use crate::config::CallConfig;
use crate::dialog::Dialog;
use crate::error::{AgentCallError, BackendError, PromptError, Result, ToolError};
use crate::events::{CallEvent, NoopEventSink};
use crate::logprobs::{class_probabilities, LogprobRequest};
use crate::message::{creators, Message};
use crate::parser::BoundParser;
use crate::prompt::{Prompt, PromptArgs};
use crate::registry::PromptRegistry;
use crate::state::{CallState, CallStats};
use crate::tool_types::{ToolCall, ToolCallRecord, ToolDefinition};
use crate::tools::{format_repeated_call, into_record};
use crate::traits::{BackendRequest, EventSink, ModelBackend, ModelResponse, ToolExecutor};

/// Successful result of an Agent Call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallOutcome {
    /// Parser output (also stored in `message.parsed`)
    pub parsed: Value,
    /// Final canonical dialog
    pub dialog: Dialog,
    /// The response that satisfied the output contract
    pub message: Message,
    /// Every tool call of the call, in execution order
    pub tool_calls: Vec<ToolCallRecord>,
    pub stats: CallStats,
}

impl CallOutcome {
    /// Decode the parsed value into a concrete type
    pub fn parsed_as<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        T::deserialize(&self.parsed)
    }
}

/// Successful result of a classification call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyOutcome {
    /// Probability of every top alternative, classes included
    pub probabilities: BTreeMap<String, f64>,
    /// Classes that were asked for, in request order
    pub classes: Vec<String>,
    /// Dialog with the question and the single-token answer appended
    pub dialog: Dialog,
    pub message: Message,
    pub stats: CallStats,
}

impl ClassifyOutcome {
    /// Probability of one class
    pub fn probability(&self, class: &str) -> Option<f64> {
        self.probabilities.get(class).copied()
    }

    /// The most likely of the requested classes
    pub fn choice(&self) -> Option<&str> {
        self.classes
            .iter()
            .filter_map(|c| self.probabilities.get(c).map(|p| (c.as_str(), *p)))
            .fold(None, |best: Option<(&str, f64)>, (c, p)| match best {
                Some((_, best_p)) if best_p >= p => best,
                _ => Some((c, p)),
            })
            .map(|(c, _)| c)
    }
}

/// Per-call options for `AgentCall::run_with`
#[derive(Clone, Copy, Default)]
pub struct CallOptions<'a> {
    /// Replaces the prompt's own tools for this call
    pub tools: Option<&'a dyn ToolExecutor>,
    /// Extra arguments handed to `Parser::parse_with`
    pub parser_args: Option<&'a PromptArgs>,
}

impl<'a> CallOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tools(mut self, tools: &'a dyn ToolExecutor) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn parser_args(mut self, args: &'a PromptArgs) -> Self {
        self.parser_args = Some(args);
        self
    }
}

/// Runs Agent Calls against one model backend
///
/// Cheap to share: each `run` owns its dialog, so independent calls can run
/// concurrently on the same `AgentCall`.
pub struct AgentCall<B> {
    backend: B,
    config: CallConfig,
    sink: Arc<dyn EventSink>,
    classifier: Arc<dyn Classifier>,
}

impl<B: ModelBackend> AgentCall<B> {
    /// Create an Agent Call runner with default config, no event sink and the
    /// default classifier
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: CallConfig::default(),
            sink: Arc::new(NoopEventSink),
            classifier: Arc::new(DefaultClassifier),
        }
    }

    pub fn with_config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn with_sink_arc(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_classifier(mut self, classifier: impl Classifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run `prompt` in a fresh dialog
    ///
    /// `tools_override` replaces the prompt's own tools for this call; names
    /// it does not know are treated as unknown tools.
    pub async fn run(
        &self,
        prompt: &Prompt,
        args: &PromptArgs,
        tools_override: Option<&dyn ToolExecutor>,
    ) -> Result<CallOutcome> {
        self.run_in(Dialog::new(prompt.path()), prompt, args, tools_override)
            .await
    }

    /// Resolve `path` in `registry` and run it in a fresh dialog
    pub async fn run_path(
        &self,
        registry: &PromptRegistry,
        path: &str,
        args: &PromptArgs,
    ) -> Result<CallOutcome> {
        let prompt = registry.get(path)?;
        self.run(&prompt, args, None).await
    }

    /// Continue an existing conversation with `prompt`
    ///
    /// The rendered prompt is appended to `dialog`; earlier messages are kept
    /// as they are.
    pub async fn run_in(
        &self,
        dialog: Dialog,
        prompt: &Prompt,
        args: &PromptArgs,
        tools_override: Option<&dyn ToolExecutor>,
    ) -> Result<CallOutcome> {
        let options = CallOptions {
            tools: tools_override,
            parser_args: None,
        };
        self.run_with(dialog, prompt, args, options).await
    }

    /// Continue `dialog` with `prompt`, with per-call options
    pub async fn run_with(
        &self,
        dialog: Dialog,
        prompt: &Prompt,
        args: &PromptArgs,
        options: CallOptions<'_>,
    ) -> Result<CallOutcome> {
        let tools: &dyn ToolExecutor = match options.tools {
            Some(tools) => tools,
            None => prompt.tools(),
        };
        let no_parser_args = PromptArgs::new();
        let parser = BoundParser::new(
            prompt.parser(),
            options.parser_args.unwrap_or(&no_parser_args),
        );
        let max_retries = prompt
            .max_exception_retries()
            .unwrap_or(self.config.max_exception_retries);
        let max_rounds = prompt
            .max_interrupt_rounds()
            .unwrap_or(self.config.max_interrupt_rounds);

        let mut run = CallRun::new(dialog, self.sink.as_ref());
        info!(
            dialog_id = %run.canonical.id(),
            prompt = %prompt.path(),
            max_retries,
            max_rounds,
            "Starting agent call"
        );

        // Init
        let content = match prompt.render(args) {
            Ok(content) => content,
            Err(err) => {
                warn!(prompt = %prompt.path(), error = %err, "Prompt rendering failed");
                run.transition(CallState::Failed);
                return Err(err.into());
            }
        };
        run.commit(vec![Message::with_role(prompt.role(), content, prompt.path())]);
        let definitions = tools.definitions();

        loop {
            run.transition(CallState::AwaitingModel);
            run.stats.backend_calls += 1;
            debug!(
                dialog_id = %run.working().id(),
                prompt = %prompt.path(),
                attempt = run.stats.backend_calls,
                "Invoking model backend"
            );

            let response = match self.invoke(run.working(), &definitions, None).await {
                Ok(response) => response,
                Err(source) => {
                    error!(
                        dialog_id = %run.working().id(),
                        prompt = %prompt.path(),
                        error = %source,
                        "Model backend failed"
                    );
                    run.transition(CallState::Failed);
                    return Err(AgentCallError::backend(source, run.abandon()));
                }
            };

            run.transition(CallState::Classifying);
            let message = response.into_message(self.config.responder.as_str());
            let classification = self.classifier.classify(&message, &parser, tools);
            debug!(
                dialog_id = %run.working().id(),
                classification = classification.label(),
                "Response classified"
            );

            match classification {
                Classification::Success(parsed) => {
                    let message = message.with_parsed(parsed.clone());
                    run.commit(vec![message.clone()]);
                    run.transition(CallState::Succeeded);
                    info!(
                        dialog_id = %run.canonical.id(),
                        prompt = %prompt.path(),
                        backend_calls = run.stats.backend_calls,
                        exception_retries = run.stats.exception_retries,
                        interrupt_rounds = run.stats.interrupt_rounds,
                        "Agent call succeeded"
                    );
                    return Ok(CallOutcome {
                        parsed,
                        dialog: run.canonical,
                        message,
                        tool_calls: run.records,
                        stats: run.stats,
                    });
                }

                Classification::ToolInterrupt => {
                    run.offer_appended(run.working().id(), &message, false);
                    run.stats.interrupt_rounds += 1;
                    if run.stats.interrupt_rounds > max_rounds {
                        warn!(
                            dialog_id = %run.working().id(),
                            prompt = %prompt.path(),
                            max_rounds,
                            "Interrupt budget exceeded"
                        );
                        run.transition(CallState::Failed);
                        return Err(AgentCallError::InterruptBudgetExceeded {
                            rounds: max_rounds,
                            last_requests: message.tool_call_requests,
                            dialog: Box::new(run.abandon()),
                        });
                    }

                    run.transition(CallState::ExecutingTools);
                    let round = self
                        .execute_round(&mut run, &message.tool_call_requests, tools)
                        .await;
                    let records = match round {
                        Ok(records) => records,
                        Err((tool, reason)) => {
                            error!(
                                dialog_id = %run.working().id(),
                                tool_name = %tool,
                                error = %reason,
                                "Tool failed fatally"
                            );
                            run.transition(CallState::Failed);
                            return Err(AgentCallError::ToolFatal {
                                tool,
                                reason,
                                dialog: Box::new(run.abandon()),
                            });
                        }
                    };

                    let call_results = records
                        .iter()
                        .map(|r| r.result_str.as_str())
                        .collect::<Vec<_>>()
                        .join("\n");
                    let round = Message::tool_round(
                        prompt.render_interrupt(&call_results),
                        message.tool_call_requests.clone(),
                        records.clone(),
                        creators::INTERRUPT,
                    )
                    .with_usage(message.usage)
                    .with_cost(message.cost)
                    .with_model(message.model.clone());

                    let mut appended = vec![round];
                    if run.stats.interrupt_rounds == max_rounds {
                        debug!(
                            dialog_id = %run.working().id(),
                            "Last tool round used, asking for the final response"
                        );
                        appended.push(Message::user(
                            prompt.final_response(),
                            creators::FINAL_NUDGE,
                        ));
                    }
                    run.records.extend(records);
                    run.commit(appended);
                }

                Classification::Malformed(reason) => {
                    run.transition(CallState::Repairing);
                    run.stats.exception_retries += 1;
                    let reason = reason.to_string();
                    warn!(
                        dialog_id = %run.working().id(),
                        prompt = %prompt.path(),
                        attempt = run.stats.exception_retries,
                        reason = %reason,
                        "Malformed response"
                    );

                    let last_content = message.content.clone();
                    run.append_to_branch(message);

                    if run.stats.exception_retries > max_retries {
                        run.transition(CallState::Failed);
                        return Err(AgentCallError::RetryBudgetExceeded {
                            retries: max_retries,
                            reason,
                            last_content,
                            dialog: Box::new(run.abandon()),
                        });
                    }

                    run.append_to_branch(Message::user(
                        prompt.render_exception(&reason),
                        creators::EXCEPTION,
                    ));
                }
            }
        }
    }

    /// Ask a single-token classification question at the end of `dialog`
    ///
    /// The question (by default "respond with one of ...") is appended to
    /// the dialog and the backend is asked for one biased token with its top
    /// logprobs. An answer that is not exactly one token, or whose
    /// alternatives miss a class, is repaired on a forked branch within the
    /// exception retry budget; only the final answer joins the dialog.
    pub async fn classify(
        &self,
        dialog: Dialog,
        classes: &[&str],
        question: Option<&str>,
    ) -> Result<ClassifyOutcome> {
        if classes.is_empty() {
            return Err(AgentCallError::InvalidPrompt(PromptError::invalid(
                "classification needs at least one class",
            )));
        }
        let classes: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
        let request = LogprobRequest::new(classes.clone());
        let max_retries = self.config.max_exception_retries;
        let question = match question {
            Some(question) => question.to_string(),
            None => {
                let quoted: Vec<String> = classes.iter().map(|c| format!("\"{c}\"")).collect();
                format!(
                    "Please respond with one and only one word from {}.",
                    quoted.join(" or ")
                )
            }
        };

        let mut run = CallRun::new(dialog, self.sink.as_ref());
        info!(
            dialog_id = %run.canonical.id(),
            classes = ?classes,
            max_retries,
            "Starting classification call"
        );
        run.commit(vec![Message::user(question, creators::CLASSIFIER)]);

        loop {
            run.transition(CallState::AwaitingModel);
            run.stats.backend_calls += 1;

            let response = match self.invoke(run.working(), &[], Some(&request)).await {
                Ok(response) => response,
                Err(source) => {
                    error!(
                        dialog_id = %run.working().id(),
                        error = %source,
                        "Model backend failed"
                    );
                    run.transition(CallState::Failed);
                    return Err(AgentCallError::backend(source, run.abandon()));
                }
            };

            run.transition(CallState::Classifying);
            let checked = class_probabilities(response.logprobs.as_deref(), &classes);
            let message = response.into_message(self.config.responder.as_str());

            match checked {
                Ok(probabilities) => {
                    let parsed = Value::Object(
                        probabilities
                            .iter()
                            .map(|(token, p)| (token.clone(), Value::from(*p)))
                            .collect(),
                    );
                    let message = message.with_parsed(parsed);
                    run.commit(vec![message.clone()]);
                    run.transition(CallState::Succeeded);
                    info!(
                        dialog_id = %run.canonical.id(),
                        backend_calls = run.stats.backend_calls,
                        "Classification succeeded"
                    );
                    return Ok(ClassifyOutcome {
                        probabilities,
                        classes,
                        dialog: run.canonical,
                        message,
                        stats: run.stats,
                    });
                }
                Err(reason) => {
                    run.transition(CallState::Repairing);
                    run.stats.exception_retries += 1;
                    warn!(
                        dialog_id = %run.working().id(),
                        attempt = run.stats.exception_retries,
                        reason = %reason,
                        "Classification response rejected"
                    );

                    let last_content = message.content.clone();
                    run.append_to_branch(message);
                    if run.stats.exception_retries > max_retries {
                        run.transition(CallState::Failed);
                        return Err(AgentCallError::RetryBudgetExceeded {
                            retries: max_retries,
                            reason,
                            last_content,
                            dialog: Box::new(run.abandon()),
                        });
                    }
                    run.append_to_branch(Message::user(
                        format!(
                            "Please respond with one and only one word from [{}]",
                            classes.join(", ")
                        ),
                        creators::EXCEPTION,
                    ));
                }
            }
        }
    }

    async fn invoke(
        &self,
        dialog: &Dialog,
        tools: &[ToolDefinition],
        logprobs: Option<&LogprobRequest>,
    ) -> std::result::Result<ModelResponse, BackendError> {
        let mut request = BackendRequest::new(dialog, tools);
        if let Some(logprobs) = logprobs {
            request = request.with_logprobs(logprobs);
        }
        match self.config.backend_timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.invoke(request))
                .await
                .unwrap_or(Err(BackendError::Timeout(limit))),
            None => self.backend.invoke(request).await,
        }
    }

    /// Execute one round in request order
    ///
    /// Returns `(tool, reason)` for a fatal tool error.
    async fn execute_round(
        &self,
        run: &mut CallRun<'_>,
        requests: &[ToolCall],
        tools: &dyn ToolExecutor,
    ) -> std::result::Result<Vec<ToolCallRecord>, (String, String)> {
        let mut records = Vec::with_capacity(requests.len());

        for call in requests {
            if self.config.dedupe_tool_calls
                && run.executed.iter().any(|done| done.same_invocation(call))
            {
                info!(
                    tool_name = %call.name,
                    tool_call_id = %call.id,
                    "Suppressing repeated tool call"
                );
                records.push(ToolCallRecord {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: None,
                    result_str: format_repeated_call(&call.name, &call.arguments),
                    error: None,
                });
                continue;
            }

            debug!(tool_name = %call.name, tool_call_id = %call.id, "Executing tool");
            let outcome = tools.execute(call).await;
            run.executed.push(call.clone());
            run.stats.tools_executed += 1;

            match into_record(call, outcome, tools) {
                Ok(record) => records.push(record),
                Err(ToolError::Fatal(reason)) => return Err((call.name.clone(), reason)),
                Err(other) => return Err((call.name.clone(), other.to_string())),
            }
        }

        Ok(records)
    }
}

// ============================================================================
// CallRun - per-call mutable state
// ============================================================================

/// Open repair incident: the branch and where it diverged from canonical
struct Incident {
    branch: Dialog,
    start: usize,
}

struct CallRun<'a> {
    canonical: Dialog,
    incident: Option<Incident>,
    state: CallState,
    stats: CallStats,
    /// Calls actually executed (for repeated-call suppression)
    executed: Vec<ToolCall>,
    records: Vec<ToolCallRecord>,
    sink: &'a dyn EventSink,
}

impl<'a> CallRun<'a> {
    fn new(canonical: Dialog, sink: &'a dyn EventSink) -> Self {
        Self {
            canonical,
            incident: None,
            state: CallState::Init,
            stats: CallStats::default(),
            executed: Vec::new(),
            records: Vec::new(),
            sink,
        }
    }

    /// Dialog shown to the backend
    fn working(&self) -> &Dialog {
        match &self.incident {
            Some(incident) => &incident.branch,
            None => &self.canonical,
        }
    }

    fn offer(&self, event: CallEvent) {
        let name = event.name();
        if catch_unwind(AssertUnwindSafe(|| self.sink.offer(event))).is_err() {
            warn!(event = name, "Event sink panicked, event dropped");
        }
    }

    fn offer_appended(&self, dialog_id: uuid::Uuid, message: &Message, canonical: bool) {
        self.offer(CallEvent::message_appended(dialog_id, message.clone(), canonical));
    }

    fn offer_pruned(&self, dialog_id: uuid::Uuid, from_index: usize, count: usize) {
        if count > 0 {
            self.offer(CallEvent::messages_pruned(dialog_id, from_index, count));
        }
    }

    fn transition(&mut self, to: CallState) {
        if self.state == to {
            return;
        }
        self.offer(CallEvent::state_changed(self.working().id(), self.state, to));
        self.state = to;
    }

    /// Append to the repair branch, forking one off if no incident is open
    fn append_to_branch(&mut self, message: Message) {
        if self.incident.is_none() {
            let branch = self.canonical.fork();
            self.offer(CallEvent::dialog_forked(branch.id(), self.canonical.id()));
            self.incident = Some(Incident {
                branch,
                start: self.canonical.len(),
            });
        }
        if let Some(incident) = self.incident.as_mut() {
            let id = incident.branch.id();
            incident.branch.append(message.clone());
            self.offer_appended(id, &message, false);
        }
    }

    /// Append messages to the canonical dialog
    ///
    /// With an open incident the branch is adopted: its tail since the
    /// divergence point is replaced by `messages` and the branch becomes
    /// canonical. Earlier pruned segments travel with the branch.
    fn commit(&mut self, messages: Vec<Message>) {
        match self.incident.take() {
            Some(Incident { mut branch, start }) => {
                match branch.replace_tail(start, messages.iter().cloned()) {
                    Ok(count) => self.offer_pruned(branch.id(), start, count),
                    Err(err) => {
                        error!(
                            dialog_id = %branch.id(),
                            error = %err,
                            "Failed to prune repair branch"
                        );
                        for message in &messages {
                            branch.append(message.clone());
                        }
                    }
                }
                self.canonical = branch;
            }
            None => {
                for message in &messages {
                    self.canonical.append(message.clone());
                }
            }
        }
        for message in &messages {
            self.offer_appended(self.canonical.id(), message, true);
        }
    }

    /// Dialog to hand back with a failure: canonical, with an open incident's
    /// messages moved into a pruned segment
    fn abandon(&mut self) -> Dialog {
        self.commit(Vec::new());
        std::mem::replace(&mut self.canonical, Dialog::new(String::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryEventSink, ScriptedBackend};
    use crate::parser::TagParser;

    fn answer_prompt() -> Prompt {
        Prompt::builder("tasks/solve", "Solve {task}. Put the result in <answer> tags.")
            .parser(TagParser::single("answer").unwrap())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_on_first_response() {
        let backend = ScriptedBackend::new(vec![ModelResponse::text("<answer>4</answer>")]);
        let call = AgentCall::new(backend);

        let outcome = call
            .run(&answer_prompt(), &PromptArgs::new().with("task", "2+2"), None)
            .await
            .unwrap();

        assert_eq!(outcome.parsed, Value::from("4"));
        assert_eq!(outcome.dialog.len(), 2);
        assert_eq!(outcome.dialog.parent_id(), None);
        assert_eq!(outcome.message.parsed, Some(Value::from("4")));
        assert_eq!(outcome.stats.backend_calls, 1);
    }

    #[tokio::test]
    async fn test_seed_message_uses_prompt_role_and_path() {
        let backend = ScriptedBackend::new(vec![ModelResponse::text("<answer>4</answer>")]);
        let outcome = AgentCall::new(backend)
            .run(&answer_prompt(), &PromptArgs::new().with("task", "2+2"), None)
            .await
            .unwrap();

        let seed = outcome.dialog.head().unwrap();
        assert_eq!(seed.creator, "tasks/solve");
        assert_eq!(seed.content, "Solve 2+2. Put the result in <answer> tags.");
    }

    #[tokio::test]
    async fn test_state_transitions_are_reported() {
        let sink = InMemoryEventSink::new();
        let backend = ScriptedBackend::new(vec![ModelResponse::text("<answer>4</answer>")]);
        AgentCall::new(backend)
            .with_sink(sink.clone())
            .run(&answer_prompt(), &PromptArgs::new().with("task", "2+2"), None)
            .await
            .unwrap();

        let states: Vec<_> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e.kind {
                crate::events::CallEventKind::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                CallState::AwaitingModel,
                CallState::Classifying,
                CallState::Succeeded
            ]
        );
    }

    struct PanickingSink;

    impl EventSink for PanickingSink {
        fn offer(&self, _event: CallEvent) {
            panic!("sink exploded");
        }
    }

    #[tokio::test]
    async fn test_panicking_sink_does_not_break_the_call() {
        let backend = ScriptedBackend::new(vec![ModelResponse::text("<answer>4</answer>")]);
        let outcome = AgentCall::new(backend)
            .with_sink(PanickingSink)
            .run(&answer_prompt(), &PromptArgs::new().with("task", "2+2"), None)
            .await
            .unwrap();
        assert_eq!(outcome.parsed, Value::from("4"));
    }
}
