// Agent Call configuration
//
// CallConfig holds the loop budgets and policies. It can be:
// - Created directly or through CallConfigBuilder
// - Deserialized from a config file (missing fields take defaults)
// - Read from LLLM_* environment variables with `from_env`

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

/// Configuration for the Agent Call loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    /// Repair attempts allowed per call before RetryBudgetExceeded
    #[serde(default = "default_max_exception_retries")]
    pub max_exception_retries: usize,

    /// Tool rounds allowed per call before InterruptBudgetExceeded
    #[serde(default = "default_max_interrupt_rounds")]
    pub max_interrupt_rounds: usize,

    /// Suppress calls identical to one already executed in this call
    #[serde(default = "default_dedupe_tool_calls")]
    pub dedupe_tool_calls: bool,

    /// Creator tag for messages produced by the model
    #[serde(default = "default_responder")]
    pub responder: String,

    /// Upper bound on a single backend invocation
    #[serde(default, with = "duration_ms")]
    pub backend_timeout: Option<Duration>,
}

fn default_max_exception_retries() -> usize {
    3
}

fn default_max_interrupt_rounds() -> usize {
    5
}

fn default_dedupe_tool_calls() -> bool {
    true
}

fn default_responder() -> String {
    "assistant".to_string()
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            max_exception_retries: default_max_exception_retries(),
            max_interrupt_rounds: default_max_interrupt_rounds(),
            dedupe_tool_calls: default_dedupe_tool_calls(),
            responder: default_responder(),
            backend_timeout: None,
        }
    }
}

impl CallConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// - `LLLM_MAX_EXCEPTION_RETRIES`
    /// - `LLLM_MAX_INTERRUPT_ROUNDS`
    /// - `LLLM_DEDUPE_TOOL_CALLS` (`true`/`1` or `false`/`0`)
    /// - `LLLM_BACKEND_TIMEOUT_MS`
    ///
    /// Unset variables take defaults; unparseable ones are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "LLLM_MAX_EXCEPTION_RETRIES", |v| v.parse().ok()) {
            config.max_exception_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "LLLM_MAX_INTERRUPT_ROUNDS", |v| v.parse().ok()) {
            config.max_interrupt_rounds = v;
        }
        if let Some(v) = parse_var(&lookup, "LLLM_DEDUPE_TOOL_CALLS", parse_bool) {
            config.dedupe_tool_calls = v;
        }
        if let Some(ms) = parse_var(&lookup, "LLLM_BACKEND_TIMEOUT_MS", |v| v.parse::<u64>().ok())
        {
            config.backend_timeout = Some(Duration::from_millis(ms));
        }

        config
    }

    /// Create a builder
    pub fn builder() -> CallConfigBuilder {
        CallConfigBuilder::new()
    }

    pub fn with_max_exception_retries(mut self, max: usize) -> Self {
        self.max_exception_retries = max;
        self
    }

    pub fn with_max_interrupt_rounds(mut self, max: usize) -> Self {
        self.max_interrupt_rounds = max;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(key, value = %raw, "Ignoring invalid configuration value");
    }
    parsed
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Builder for CallConfig with fluent API
pub struct CallConfigBuilder {
    config: CallConfig,
}

impl CallConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CallConfig::default(),
        }
    }

    pub fn max_exception_retries(mut self, max: usize) -> Self {
        self.config.max_exception_retries = max;
        self
    }

    pub fn max_interrupt_rounds(mut self, max: usize) -> Self {
        self.config.max_interrupt_rounds = max;
        self
    }

    pub fn dedupe_tool_calls(mut self, enabled: bool) -> Self {
        self.config.dedupe_tool_calls = enabled;
        self
    }

    pub fn responder(mut self, responder: impl Into<String>) -> Self {
        self.config.responder = responder.into();
        self
    }

    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.config.backend_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> CallConfig {
        self.config
    }
}

impl Default for CallConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
