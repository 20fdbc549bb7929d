// Prompt - template bound to an output contract and tools
//
// A Prompt is built once and shared. Rendering is pure: it only reads the
// template and the supplied arguments. Template syntax is `{name}` for
// placeholders and `{{` / `}}` for literal braces.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::PromptError;
use crate::message::MessageRole;
use crate::parser::{Parser, TextParser};
use crate::tools::{display_value, Tool, ToolRegistry};

/// Default repair prompt; `{error_message}` receives the parse failure
pub const DEFAULT_EXCEPTION_TEMPLATE: &str = "There is an unexpected error from your response. \n\
Here is the error message:\n\n---\n{error_message}\n---\n\n\
Please fix the error. Remember to follow the instructions from the user message.\n";

/// Default tool round rendering; `{call_results}` receives the joined results
pub const DEFAULT_INTERRUPT_TEMPLATE: &str = "The return of the function call is as follows:\n\n\
---\n{call_results}\n---\n\n\
You can choose to make more function calls, or you can provide your final response.\n";

/// Default nudge after the last allowed tool round
pub const DEFAULT_FINAL_RESPONSE_TEMPLATE: &str = "Please provide your final response.";

const ERROR_MESSAGE: &str = "error_message";
const CALL_RESULTS: &str = "call_results";

// ============================================================================
// Template
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed `{placeholder}` template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
    placeholders: BTreeSet<String>,
}

impl Template {
    /// Parse a template; `owner` names the prompt in error messages
    pub fn parse(owner: &str, source: impl Into<String>) -> Result<Self, PromptError> {
        let source = source.into();
        let malformed = |detail: String| PromptError::MalformedTemplate {
            prompt: owner.to_string(),
            detail,
        };

        let mut segments = Vec::new();
        let mut placeholders = BTreeSet::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(malformed(format!("unclosed `{{` at byte {pos}")));
                    }
                    if !is_valid_placeholder(&name) {
                        return Err(malformed(format!("invalid placeholder `{{{name}}}` at byte {pos}")));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    placeholders.insert(name.clone());
                    segments.push(Segment::Placeholder(name));
                }
                '}' => return Err(malformed(format!("unmatched `}}` at byte {pos}"))),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source,
            segments,
            placeholders,
        })
    }

    /// Template text as written
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names used by the template
    pub fn placeholders(&self) -> &BTreeSet<String> {
        &self.placeholders
    }

    /// Render with a lookup; returns the first missing placeholder on failure
    fn render_with<'a>(
        &self,
        lookup: impl Fn(&str) -> Option<std::borrow::Cow<'a, str>>,
    ) -> Result<String, String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = lookup(name).ok_or_else(|| name.clone())?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

fn is_valid_placeholder(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// PromptArgs
// ============================================================================

/// Template arguments
///
/// String values render as-is, anything else as compact JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptArgs(BTreeMap<String, Value>);

impl PromptArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument (builder style)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for PromptArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for PromptArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ============================================================================
// Prompt
// ============================================================================

/// A reusable prompt definition
#[derive(Clone)]
pub struct Prompt {
    path: String,
    template: Template,
    role: MessageRole,
    parser: Arc<dyn Parser>,
    tools: ToolRegistry,
    exception_template: Template,
    interrupt_template: Template,
    final_response_template: String,
    max_exception_retries: Option<usize>,
    max_interrupt_rounds: Option<usize>,
}

impl Prompt {
    /// Start building a prompt
    pub fn builder(path: impl Into<String>, template: impl Into<String>) -> PromptBuilder {
        PromptBuilder::new(path, template)
    }

    /// Unique identifier (also the creator tag of the seeded message)
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn template(&self) -> &str {
        self.template.source()
    }

    /// Placeholder names that must be supplied at render time
    pub fn required_args(&self) -> &BTreeSet<String> {
        self.template.placeholders()
    }

    /// Role of the seeded message
    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn parser(&self) -> &dyn Parser {
        self.parser.as_ref()
    }

    /// Tools bound to this prompt
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn max_exception_retries(&self) -> Option<usize> {
        self.max_exception_retries
    }

    pub fn max_interrupt_rounds(&self) -> Option<usize> {
        self.max_interrupt_rounds
    }

    /// Render the template with `args`
    pub fn render(&self, args: &PromptArgs) -> Result<String, PromptError> {
        self.template
            .render_with(|name| args.get(name).map(|v| display_value(v).into()))
            .map_err(|argument| PromptError::MissingArgument {
                prompt: self.path.clone(),
                argument,
            })
    }

    /// Repair request shown to the model after a malformed response
    pub fn render_exception(&self, error_message: &str) -> String {
        render_handler(&self.exception_template, ERROR_MESSAGE, error_message)
    }

    /// Tool round content shown to the model
    pub fn render_interrupt(&self, call_results: &str) -> String {
        render_handler(&self.interrupt_template, CALL_RESULTS, call_results)
    }

    /// Nudge appended after the last allowed tool round
    pub fn final_response(&self) -> &str {
        &self.final_response_template
    }
}

// Handler templates are validated at build time to use only their own
// placeholder, so the lookup never misses.
fn render_handler(template: &Template, placeholder: &str, value: &str) -> String {
    template
        .render_with(|name| (name == placeholder).then(|| value.into()))
        .unwrap_or_else(|_| template.source().to_string())
}

impl std::fmt::Debug for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompt")
            .field("path", &self.path)
            .field("required_args", self.required_args())
            .field("role", &self.role)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// PromptBuilder
// ============================================================================

/// Builder for Prompt
pub struct PromptBuilder {
    path: String,
    template: String,
    role: MessageRole,
    parser: Option<Arc<dyn Parser>>,
    tools: ToolRegistry,
    exception_template: String,
    interrupt_template: String,
    final_response_template: String,
    max_exception_retries: Option<usize>,
    max_interrupt_rounds: Option<usize>,
}

impl PromptBuilder {
    pub fn new(path: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            template: template.into(),
            role: MessageRole::User,
            parser: None,
            tools: ToolRegistry::new(),
            exception_template: DEFAULT_EXCEPTION_TEMPLATE.to_string(),
            interrupt_template: DEFAULT_INTERRUPT_TEMPLATE.to_string(),
            final_response_template: DEFAULT_FINAL_RESPONSE_TEMPLATE.to_string(),
            max_exception_retries: None,
            max_interrupt_rounds: None,
        }
    }

    /// Role of the seeded message (default user)
    pub fn role(mut self, role: MessageRole) -> Self {
        self.role = role;
        self
    }

    /// Output contract (default TextParser)
    pub fn parser(mut self, parser: impl Parser + 'static) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    pub fn parser_arc(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Bind a tool
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    /// Bind a whole registry, replacing earlier bindings
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn exception_template(mut self, template: impl Into<String>) -> Self {
        self.exception_template = template.into();
        self
    }

    pub fn interrupt_template(mut self, template: impl Into<String>) -> Self {
        self.interrupt_template = template.into();
        self
    }

    pub fn final_response_template(mut self, template: impl Into<String>) -> Self {
        self.final_response_template = template.into();
        self
    }

    pub fn max_exception_retries(mut self, max: usize) -> Self {
        self.max_exception_retries = Some(max);
        self
    }

    pub fn max_interrupt_rounds(mut self, max: usize) -> Self {
        self.max_interrupt_rounds = Some(max);
        self
    }

    pub fn build(self) -> Result<Prompt, PromptError> {
        if self.path.trim().is_empty() {
            return Err(PromptError::invalid("prompt path must not be empty"));
        }

        let template = Template::parse(&self.path, self.template)?;
        let exception_template = handler_template(
            &self.path,
            "exception_template",
            self.exception_template,
            ERROR_MESSAGE,
        )?;
        let interrupt_template = handler_template(
            &self.path,
            "interrupt_template",
            self.interrupt_template,
            CALL_RESULTS,
        )?;

        Ok(Prompt {
            path: self.path,
            template,
            role: self.role,
            parser: self.parser.unwrap_or_else(|| Arc::new(TextParser)),
            tools: self.tools,
            exception_template,
            interrupt_template,
            final_response_template: self.final_response_template,
            max_exception_retries: self.max_exception_retries,
            max_interrupt_rounds: self.max_interrupt_rounds,
        })
    }
}

fn handler_template(
    prompt: &str,
    name: &'static str,
    source: String,
    placeholder: &'static str,
) -> Result<Template, PromptError> {
    let template = Template::parse(prompt, source)?;
    if !template.placeholders().contains(placeholder) {
        return Err(PromptError::MissingHandlerPlaceholder {
            prompt: prompt.to_string(),
            template: name,
            placeholder,
        });
    }
    if let Some(other) = template.placeholders().iter().find(|p| *p != placeholder) {
        return Err(PromptError::MalformedTemplate {
            prompt: prompt.to_string(),
            detail: format!("{name} may only use {{{placeholder}}}, found {{{other}}}"),
        });
    }
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TagParser;
    use crate::tools::EchoTool;
    use serde_json::json;

    fn solve_prompt() -> Prompt {
        Prompt::builder("tasks/solve", "Solve {task} for {who}. Reply as {{\"answer\": ...}}")
            .parser(TagParser::single("answer").unwrap())
            .tool(EchoTool)
            .build()
            .unwrap()
    }

    #[test]
    fn test_required_args_derived_from_template() {
        let prompt = solve_prompt();
        let args: Vec<_> = prompt.required_args().iter().cloned().collect();
        assert_eq!(args, vec!["task", "who"]);
        assert_eq!(prompt.role(), MessageRole::User);
        assert_eq!(prompt.tools().tool_names(), vec!["echo"]);
    }

    #[test]
    fn test_render() {
        let prompt = solve_prompt();
        let rendered = prompt
            .render(&PromptArgs::new().with("task", "2+2").with("who", json!(["ann", 3])))
            .unwrap();
        assert_eq!(rendered, "Solve 2+2 for [\"ann\",3]. Reply as {\"answer\": ...}");
    }

    #[test]
    fn test_render_missing_argument() {
        let prompt = solve_prompt();
        let err = prompt.render(&PromptArgs::new().with("task", "2+2")).unwrap_err();
        assert_eq!(
            err,
            PromptError::MissingArgument {
                prompt: "tasks/solve".to_string(),
                argument: "who".to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_templates_rejected_at_build() {
        for template in ["Solve {task", "Solve task}", "Solve {}", "Solve {a b}"] {
            let err = Prompt::builder("p", template).build().unwrap_err();
            assert!(
                matches!(err, PromptError::MalformedTemplate { .. }),
                "{template}: {err:?}"
            );
        }
    }

    #[test]
    fn test_handler_templates_validated() {
        let err = Prompt::builder("p", "hi")
            .exception_template("Fix it")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            PromptError::MissingHandlerPlaceholder {
                placeholder: "error_message",
                ..
            }
        ));

        let err = Prompt::builder("p", "hi")
            .interrupt_template("{call_results} and {extra}")
            .build()
            .unwrap_err();
        assert!(matches!(err, PromptError::MalformedTemplate { .. }));
    }

    #[test]
    fn test_handler_rendering() {
        let prompt = Prompt::builder("p", "hi").build().unwrap();
        let exception = prompt.render_exception("No answer tags found");
        assert!(exception.contains("---\nNo answer tags found\n---"));

        let interrupt = prompt.render_interrupt("Sunny");
        assert!(interrupt.starts_with("The return of the function call is as follows:"));
        assert!(interrupt.contains("---\nSunny\n---"));
        assert_eq!(prompt.final_response(), "Please provide your final response.");
    }

    #[test]
    fn test_render_inserts_braces_from_values_verbatim() {
        let prompt = Prompt::builder("p", "{x}").build().unwrap();
        let out = prompt.render(&PromptArgs::new().with("x", "{not_a_placeholder}")).unwrap();
        assert_eq!(out, "{not_a_placeholder}");
    }

    #[test]
    fn test_prompt_args_from_map() {
        let map = json!({"task": "2+2"}).as_object().cloned().unwrap();
        let args = PromptArgs::from(map);
        assert_eq!(args.get("task"), Some(&json!("2+2")));

        let args: PromptArgs = [("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(args.len(), 2);
    }
}
