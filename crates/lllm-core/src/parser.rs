// Output parsers
//
// A Parser turns raw model text into a structured value or a ParseError whose
// reason is shown to the model on the repair branch. Prompts hold parsers as
// `Arc<dyn Parser>`.
//
// Implementations:
// - TagParser: <tag>...</tag>, ```tag ... ``` and <SIGNAL> extraction
// - StructuredParser<T>: strict serde decode into T
// - TextParser: any non-empty text
// - FnParser: user closure

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{ParseError, PromptError};
use crate::prompt::PromptArgs;

const EMPTY_RESPONSE: &str = "The response is empty";

/// Parses raw model output
pub trait Parser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<Value, ParseError>;

    /// Parse with per-call arguments
    ///
    /// Parsers that take no arguments ignore them.
    fn parse_with(&self, raw: &str, args: &PromptArgs) -> Result<Value, ParseError> {
        let _ = args;
        self.parse(raw)
    }
}

/// A parser bound to the arguments of one call
///
/// `parse` forwards to the inner parser's `parse_with`, so code that only
/// knows `Parser::parse` (classifiers, for one) still sees the arguments.
pub struct BoundParser<'a> {
    inner: &'a dyn Parser,
    args: &'a PromptArgs,
}

impl<'a> BoundParser<'a> {
    pub fn new(inner: &'a dyn Parser, args: &'a PromptArgs) -> Self {
        Self { inner, args }
    }
}

impl Parser for BoundParser<'_> {
    fn parse(&self, raw: &str) -> Result<Value, ParseError> {
        self.inner.parse_with(raw, self.args)
    }

    fn parse_with(&self, raw: &str, args: &PromptArgs) -> Result<Value, ParseError> {
        self.inner.parse_with(raw, args)
    }
}

fn reject_empty(raw: &str) -> Result<(), ParseError> {
    if raw.trim().is_empty() {
        Err(ParseError::new(EMPTY_RESPONSE))
    } else {
        Ok(())
    }
}

// ============================================================================
// TagParser
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Xml,
    Markdown,
    Signal,
}

#[derive(Debug, Clone)]
struct TagSpec {
    name: String,
    kind: TagKind,
    required: bool,
    block: Option<Regex>,
    opening: String,
}

impl TagSpec {
    fn hint(&self) -> String {
        match self.kind {
            TagKind::Xml => format!("<{0}>...</{0}>", self.name),
            TagKind::Markdown => format!("```{} ... ```", self.name),
            TagKind::Signal => format!("<{}>", self.name),
        }
    }
}

/// Extracts tagged blocks from the response
///
/// Tags are scanned in declaration order and each search starts where the
/// previous match ended, so `<plan>` declared before `<answer>` must also
/// appear before it. Signal tags are checked anywhere in the text.
///
/// The parsed value is an object keyed by tag name: block contents (trimmed)
/// for found tags, `null` for missing optional tags, booleans for signals.
#[derive(Debug, Clone)]
pub struct TagParser {
    tags: Vec<TagSpec>,
    bare: bool,
}

impl TagParser {
    pub fn builder() -> TagParserBuilder {
        TagParserBuilder::default()
    }

    /// One required XML tag; the parsed value is its content as a bare string
    pub fn single(tag: impl Into<String>) -> Result<Self, PromptError> {
        let mut parser = Self::builder().xml(tag).build()?;
        parser.bare = true;
        Ok(parser)
    }

    fn find_block(
        &self,
        spec: &TagSpec,
        raw: &str,
        cursor: usize,
    ) -> Result<Option<(String, usize)>, String> {
        let Some(block) = &spec.block else {
            return Ok(None);
        };
        let haystack = &raw[cursor..];
        if let Some(caps) = block.captures(haystack) {
            let inner = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let end = caps.get(0).map(|m| m.end()).unwrap_or_default();
            return Ok(Some((inner.to_string(), cursor + end)));
        }
        if haystack.contains(&spec.opening) {
            return Err(format!(
                "Unterminated {} tag, it should be provided as {}",
                spec.name,
                spec.hint()
            ));
        }
        Ok(None)
    }
}

impl Parser for TagParser {
    fn parse(&self, raw: &str) -> Result<Value, ParseError> {
        reject_empty(raw)?;

        let mut problems = Vec::new();
        let mut out = Map::new();
        let mut cursor = 0;

        for spec in &self.tags {
            if spec.kind == TagKind::Signal {
                out.insert(spec.name.clone(), Value::Bool(raw.contains(&spec.opening)));
                continue;
            }
            match self.find_block(spec, raw, cursor) {
                Ok(Some((content, end))) => {
                    cursor = end;
                    out.insert(spec.name.clone(), Value::String(content));
                }
                Ok(None) if spec.required => {
                    problems.push(format!(
                        "No {} tags found, it should be provided as {}",
                        spec.name,
                        spec.hint()
                    ));
                }
                Ok(None) => {
                    out.insert(spec.name.clone(), Value::Null);
                }
                Err(problem) => problems.push(problem),
            }
        }

        if !problems.is_empty() {
            return Err(ParseError::from_problems(&problems));
        }

        if self.bare {
            if let Some((_, value)) = out.into_iter().next() {
                return Ok(value);
            }
            return Ok(Value::Null);
        }
        Ok(Value::Object(out))
    }
}

/// Builder for TagParser
#[derive(Debug, Default)]
pub struct TagParserBuilder {
    tags: Vec<(String, TagKind, bool)>,
}

impl TagParserBuilder {
    /// Required `<tag>...</tag>` block
    pub fn xml(mut self, tag: impl Into<String>) -> Self {
        self.tags.push((tag.into(), TagKind::Xml, true));
        self
    }

    /// Optional `<tag>...</tag>` block
    pub fn optional_xml(mut self, tag: impl Into<String>) -> Self {
        self.tags.push((tag.into(), TagKind::Xml, false));
        self
    }

    /// Required fenced block
    pub fn markdown(mut self, tag: impl Into<String>) -> Self {
        self.tags.push((tag.into(), TagKind::Markdown, true));
        self
    }

    /// Optional fenced block
    pub fn optional_markdown(mut self, tag: impl Into<String>) -> Self {
        self.tags.push((tag.into(), TagKind::Markdown, false));
        self
    }

    /// `<SIGNAL>` presence flag
    pub fn signal(mut self, tag: impl Into<String>) -> Self {
        self.tags.push((tag.into(), TagKind::Signal, false));
        self
    }

    pub fn build(self) -> Result<TagParser, PromptError> {
        let mut tags = Vec::with_capacity(self.tags.len());
        for (name, kind, required) in self.tags {
            if !is_valid_tag(&name) {
                return Err(PromptError::invalid(format!("invalid tag name `{name}`")));
            }
            if tags.iter().any(|t: &TagSpec| t.name == name) {
                return Err(PromptError::invalid(format!("tag `{name}` declared twice")));
            }
            let escaped = regex::escape(&name);
            let (pattern, opening) = match kind {
                TagKind::Xml => (Some(format!(r"(?s)<{escaped}>(.*?)</{escaped}>")), format!("<{name}>")),
                TagKind::Markdown => (
                    Some(format!(r"(?s)```{escaped}(?:\s(.*?))?```")),
                    format!("```{name}"),
                ),
                TagKind::Signal => (None, format!("<{name}>")),
            };
            let block = pattern
                .map(|p| Regex::new(&p))
                .transpose()
                .map_err(|e| PromptError::invalid(format!("tag `{name}`: {e}")))?;
            tags.push(TagSpec {
                name,
                kind,
                required,
                block,
                opening,
            });
        }
        if tags.is_empty() {
            return Err(PromptError::invalid("tag parser needs at least one tag"));
        }
        Ok(TagParser { tags, bare: false })
    }
}

fn is_valid_tag(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

// ============================================================================
// StructuredParser
// ============================================================================

/// Strict decode of the response into `T`
///
/// A response wrapped in a single ```json fence is unwrapped first. The parsed
/// value is `T` serialized back to JSON, so unknown fields dropped by `T` do
/// not survive.
pub struct StructuredParser<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> StructuredParser<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for StructuredParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for StructuredParser<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredParser")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

fn strip_json_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.trim()
}

impl<T> Parser for StructuredParser<T>
where
    T: DeserializeOwned + Serialize,
{
    fn parse(&self, raw: &str) -> Result<Value, ParseError> {
        reject_empty(raw)?;
        let body = strip_json_fence(raw);
        let decoded: T = serde_json::from_str(body)
            .map_err(|e| ParseError::new(format!("Response is not valid JSON for the expected schema: {e}")))?;
        serde_json::to_value(decoded).map_err(|e| ParseError::new(e.to_string()))
    }
}

// ============================================================================
// TextParser / FnParser
// ============================================================================

/// Accepts any non-empty text; the parsed value is the trimmed content
#[derive(Debug, Default, Clone, Copy)]
pub struct TextParser;

impl Parser for TextParser {
    fn parse(&self, raw: &str) -> Result<Value, ParseError> {
        reject_empty(raw)?;
        Ok(Value::String(raw.trim().to_string()))
    }
}

type ParseFn = dyn Fn(&str, &PromptArgs) -> Result<Value, ParseError> + Send + Sync;

/// Parser backed by a closure
#[derive(Clone)]
pub struct FnParser {
    f: Arc<ParseFn>,
}

impl FnParser {
    pub fn new(f: impl Fn(&str) -> Result<Value, ParseError> + Send + Sync + 'static) -> Self {
        Self {
            f: Arc::new(move |raw, _| f(raw)),
        }
    }

    /// Closure that also receives the per-call parser arguments
    pub fn with_args(
        f: impl Fn(&str, &PromptArgs) -> Result<Value, ParseError> + Send + Sync + 'static,
    ) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl std::fmt::Debug for FnParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnParser")
    }
}

impl Parser for FnParser {
    fn parse(&self, raw: &str) -> Result<Value, ParseError> {
        self.parse_with(raw, &PromptArgs::new())
    }

    fn parse_with(&self, raw: &str, args: &PromptArgs) -> Result<Value, ParseError> {
        reject_empty(raw)?;
        (self.f)(raw, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_single_tag_returns_bare_string() {
        let parser = TagParser::single("answer").unwrap();
        assert_eq!(parser.parse("<answer>4</answer>").unwrap(), json!("4"));
        assert_eq!(parser.parse("so <answer>\n 4 \n</answer> done").unwrap(), json!("4"));
    }

    #[test]
    fn test_missing_required_tag() {
        let parser = TagParser::single("answer").unwrap();
        let err = parser.parse("I think the answer is 4").unwrap_err();
        assert_eq!(
            err.reason,
            "Parsing errors:\nNo answer tags found, it should be provided as <answer>...</answer>"
        );
    }

    #[test]
    fn test_unterminated_tag() {
        let parser = TagParser::single("answer").unwrap();
        let err = parser.parse("<answer>4").unwrap_err();
        assert!(err.reason.contains("Unterminated answer tag"));
    }

    #[test]
    fn test_tags_are_order_sensitive() {
        let parser = TagParser::builder().xml("plan").xml("answer").build().unwrap();

        let ok = parser
            .parse("<plan>add</plan><answer>4</answer>")
            .unwrap();
        assert_eq!(ok, json!({"plan": "add", "answer": "4"}));

        let err = parser
            .parse("<answer>4</answer><plan>add</plan>")
            .unwrap_err();
        assert!(err.reason.contains("No answer tags found"));
    }

    #[test]
    fn test_optional_markdown_and_signal() {
        let parser = TagParser::builder()
            .optional_xml("notes")
            .markdown("python")
            .signal("DONE")
            .build()
            .unwrap();

        let value = parser
            .parse("Here:\n```python\nprint(1)\n```\n<DONE>")
            .unwrap();
        assert_eq!(value["notes"], Value::Null);
        assert_eq!(value["python"], json!("print(1)"));
        assert_eq!(value["DONE"], json!(true));
    }

    #[test]
    fn test_markdown_tag_ending_in_punctuation() {
        let parser = TagParser::builder().markdown("c-").build().unwrap();
        let value = parser.parse("```c-\nint x;\n```").unwrap();
        assert_eq!(value["c-"], json!("int x;"));

        let parser = TagParser::builder().markdown("py").build().unwrap();
        assert!(parser.parse("```python\nprint(1)\n```").is_err());
    }

    #[test]
    fn test_invalid_tag_names_rejected() {
        assert!(TagParser::builder().xml("bad tag").build().is_err());
        assert!(TagParser::builder().xml("a").xml("a").build().is_err());
        assert!(TagParser::builder().build().is_err());
    }

    #[test]
    fn test_empty_content_rejected_everywhere() {
        let parsers: Vec<Box<dyn Parser>> = vec![
            Box::new(TagParser::builder().signal("DONE").build().unwrap()),
            Box::new(TextParser),
            Box::new(StructuredParser::<Value>::new()),
            Box::new(FnParser::new(|_| Ok(Value::Null))),
        ];
        for parser in parsers {
            assert_eq!(parser.parse("  \n").unwrap_err().reason, EMPTY_RESPONSE);
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Verdict {
        label: String,
        score: f64,
    }

    #[test]
    fn test_structured_parser() {
        let parser = StructuredParser::<Verdict>::new();
        let value = parser
            .parse("```json\n{\"label\": \"spam\", \"score\": 0.5}\n```")
            .unwrap();
        assert_eq!(value, json!({"label": "spam", "score": 0.5}));

        assert!(parser.parse("{\"label\": \"spam\"}").is_err());
        assert!(parser.parse("not json").is_err());
    }

    #[test]
    fn test_parse_is_idempotent() {
        let parser = TagParser::builder().xml("answer").signal("DONE").build().unwrap();
        let raw = "<answer>Sunny</answer> <DONE>";
        assert_eq!(parser.parse(raw).unwrap(), parser.parse(raw).unwrap());
    }

    #[test]
    fn test_fn_parser() {
        let parser = FnParser::new(|raw| {
            raw.trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| ParseError::new(e.to_string()))
        });
        assert_eq!(parser.parse(" 42 ").unwrap(), json!(42));
        assert!(parser.parse("forty-two").is_err());
    }

    #[test]
    fn test_parser_args_reach_fn_parser() {
        let parser = FnParser::with_args(|raw, args| {
            let allowed = args
                .get("allowed")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let node = Value::String(raw.trim().to_string());
            if allowed.contains(&node) {
                Ok(node)
            } else {
                Err(ParseError::new(format!("{node} is not one of {allowed:?}")))
            }
        });
        let args = PromptArgs::new().with("allowed", json!(["P0", "P1"]));

        assert_eq!(parser.parse_with("P1", &args).unwrap(), json!("P1"));
        assert!(parser.parse_with("P7", &args).is_err());
        assert!(parser.parse("P1").is_err());

        let bound = BoundParser::new(&parser, &args);
        assert_eq!(bound.parse("P0").unwrap(), json!("P0"));
    }
}
