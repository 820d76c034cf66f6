//! Generation request and result types

use serde::{Deserialize, Serialize};

use crate::types::message::ChatMessage;

/// What the caller wants completed
#[derive(Debug, Clone, PartialEq)]
pub enum PromptInput {
    /// A single instruction prompt
    Text(String),
    /// An ordered conversation
    Messages(Vec<ChatMessage>),
}

/// Sampling parameters after per-request overrides have been applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            repeat_penalty: 1.1,
        }
    }
}

/// A request for one completion
///
/// Every override left as `None` falls back to the configured default.
/// Explicit values are honoured as given, including zero temperature.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub input: PromptInput,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f32>,
}

impl GenerationRequest {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self::with_input(PromptInput::Text(prompt.into()))
    }

    pub fn messages(messages: Vec<ChatMessage>) -> Self {
        Self::with_input(PromptInput::Messages(messages))
    }

    fn with_input(input: PromptInput) -> Self {
        Self {
            input,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            repeat_penalty: None,
        }
    }

    /// Resolve the effective sampling parameters against `defaults`
    pub fn sampling(&self, defaults: &SamplingParams) -> SamplingParams {
        SamplingParams {
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            top_k: self.top_k.unwrap_or(defaults.top_k),
            repeat_penalty: self.repeat_penalty.unwrap_or(defaults.repeat_penalty),
        }
    }
}

/// Token accounting for one completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Produced text plus usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_overrides_fall_back() {
        let defaults = SamplingParams::default();
        let request = GenerationRequest::prompt("hi");
        assert_eq!(request.sampling(&defaults), defaults);
    }

    #[test]
    fn test_explicit_overrides_win() {
        let defaults = SamplingParams::default();
        let mut request = GenerationRequest::prompt("hi");
        request.max_tokens = Some(16);
        request.temperature = Some(0.0);
        request.top_k = Some(5);

        let params = request.sampling(&defaults);
        assert_eq!(params.max_tokens, 16);
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.top_k, 5);
        assert_eq!(params.top_p, defaults.top_p);
        assert_eq!(params.repeat_penalty, defaults.repeat_penalty);
    }

    #[test]
    fn test_usage_total() {
        let usage = Usage::new(12, 30);
        assert_eq!(usage.total_tokens, 42);
    }
}
