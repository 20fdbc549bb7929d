// Agent Call state machine states
//
// Init -> AwaitingModel -> Classifying -> {ExecutingTools | Repairing}
//      -> AwaitingModel ... -> Succeeded | Failed
//
// Terminal states never resume.

use serde::{Deserialize, Serialize};

/// State of an Agent Call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Rendering the prompt and seeding the dialog
    Init,
    /// Waiting for the model backend
    AwaitingModel,
    /// Labelling the latest response
    Classifying,
    /// Running the requested tools
    ExecutingTools,
    /// Injecting an exception prompt on the repair branch
    Repairing,
    Succeeded,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Succeeded | CallState::Failed)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Init => write!(f, "init"),
            CallState::AwaitingModel => write!(f, "awaiting_model"),
            CallState::Classifying => write!(f, "classifying"),
            CallState::ExecutingTools => write!(f, "executing_tools"),
            CallState::Repairing => write!(f, "repairing"),
            CallState::Succeeded => write!(f, "succeeded"),
            CallState::Failed => write!(f, "failed"),
        }
    }
}

/// Counters collected over one Agent Call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallStats {
    /// Number of backend invocations
    pub backend_calls: usize,
    /// Malformed responses that were repaired (or attempted)
    pub exception_retries: usize,
    /// Tool rounds executed
    pub interrupt_rounds: usize,
    /// Tool calls executed (suppressed repeats excluded)
    pub tools_executed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_terminal() {
        assert_eq!(CallState::AwaitingModel.to_string(), "awaiting_model");
        assert!(CallState::Succeeded.is_terminal());
        assert!(CallState::Failed.is_terminal());
        assert!(!CallState::Repairing.is_terminal());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&CallState::ExecutingTools).unwrap();
        assert_eq!(json, "\"executing_tools\"");
    }
}
