// Token log-probabilities for classification calls
//
// A classification call asks the backend for a single biased token with its
// top alternatives, then reads class probabilities from those alternatives.
// Tokenizing the classes and biasing the logits is the backend's job; the
// core only describes the request and checks the response.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default logit bias applied to every class token
pub const DEFAULT_CLASS_BIAS: i32 = 10;

/// Completion budget for a classification response (one token plus slack)
pub const CLASSIFY_MAX_TOKENS: u32 = 3;

/// One alternative for a generated token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopLogprob {
    pub token: String,
    pub logprob: f64,
}

/// Log-probability data for one generated token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub token: String,
    pub logprob: f64,
    /// Most likely alternatives at this position, chosen token included
    #[serde(default)]
    pub top_logprobs: Vec<TopLogprob>,
}

impl TokenLogprob {
    pub fn new(token: impl Into<String>, logprob: f64) -> Self {
        Self {
            token: token.into(),
            logprob,
            top_logprobs: Vec::new(),
        }
    }

    /// Add an alternative
    pub fn with_top(mut self, token: impl Into<String>, logprob: f64) -> Self {
        self.top_logprobs.push(TopLogprob {
            token: token.into(),
            logprob,
        });
        self
    }
}

/// Sampling hints the backend needs for a classification call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogprobRequest {
    /// Class tokens to bias towards
    pub classes: Vec<String>,
    /// Logit bias applied to each class token
    pub bias: i32,
    /// How many alternatives to return per token
    pub top_logprobs: usize,
    pub max_tokens: u32,
}

impl LogprobRequest {
    pub fn new(classes: Vec<String>) -> Self {
        Self {
            top_logprobs: classes.len(),
            classes,
            bias: DEFAULT_CLASS_BIAS,
            max_tokens: CLASSIFY_MAX_TOKENS,
        }
    }

    pub fn with_bias(mut self, bias: i32) -> Self {
        self.bias = bias;
        self
    }
}

/// Read class probabilities from a single-token response
///
/// Returns every top alternative as `token -> probability`. Fails when the
/// response is not exactly one token or a class is missing from the
/// alternatives; the error text is shown to the model on retry.
pub fn class_probabilities(
    logprobs: Option<&[TokenLogprob]>,
    classes: &[String],
) -> Result<BTreeMap<String, f64>, String> {
    let tokens = logprobs.unwrap_or_default();
    if tokens.len() != 1 {
        return Err(format!(
            "Failed to classify the proposition, not only one token ({})",
            tokens.len()
        ));
    }

    let probabilities: BTreeMap<String, f64> = tokens[0]
        .top_logprobs
        .iter()
        .map(|top| (top.token.clone(), top.logprob.exp()))
        .collect();

    let missing: Vec<String> = classes
        .iter()
        .filter(|class| !probabilities.contains_key(class.as_str()))
        .map(|class| format!("Token {class} not found in the top logprobs"))
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "Failed to classify the proposition:\n{}",
            missing.join("\n")
        ));
    }

    Ok(probabilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> Vec<String> {
        vec!["yes".to_string(), "no".to_string()]
    }

    #[test]
    fn test_probabilities_from_top_logprobs() {
        let token = TokenLogprob::new("yes", 0.8f64.ln())
            .with_top("yes", 0.8f64.ln())
            .with_top("no", 0.2f64.ln());

        let probs = class_probabilities(Some(&[token]), &classes()).unwrap();
        assert!((probs["yes"] - 0.8).abs() < 1e-9);
        assert!((probs["no"] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_more_than_one_token_rejected() {
        let tokens = vec![TokenLogprob::new("yes", 0.0), TokenLogprob::new(",", 0.0)];
        let err = class_probabilities(Some(&tokens), &classes()).unwrap_err();
        assert_eq!(
            err,
            "Failed to classify the proposition, not only one token (2)"
        );
        assert!(class_probabilities(None, &classes()).is_err());
    }

    #[test]
    fn test_missing_class_rejected() {
        let token = TokenLogprob::new("yes", 0.0).with_top("yes", 0.0);
        let err = class_probabilities(Some(&[token]), &classes()).unwrap_err();
        assert!(err.ends_with("Token no not found in the top logprobs"));
    }

    #[test]
    fn test_request_defaults() {
        let request = LogprobRequest::new(classes());
        assert_eq!(request.top_logprobs, 2);
        assert_eq!(request.bias, DEFAULT_CLASS_BIAS);
        assert_eq!(request.max_tokens, CLASSIFY_MAX_TOKENS);
    }
}
