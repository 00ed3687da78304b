//! Answer generation
//!
//! This module provides:
//! - The `Generator` trait consumed by `ask`
//! - A streaming Ollama client
//! - A background CPU/memory sampler for generation runs

mod ollama;
mod sampler;

pub use ollama::*;
pub use sampler::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Receives answer fragments as they are produced
pub type TokenSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Timing and resource metadata for one generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationTiming {
    /// Time to first token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<f64>,
    /// Wall time of the whole call
    pub generation_ms: f64,
    /// Tokens produced (model-reported when available)
    pub tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_sec: Option<f64>,
    #[serde(flatten)]
    pub resources: ResourceUsage,
}

/// A finished answer. Failures are carried inline, never as `Err`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub timing: GenerationTiming,
    /// Set when `text` is a downgraded error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Generation {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Trait for answer generators
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate up to `max_tokens` tokens for `prompt`, forwarding fragments to `on_token`
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: usize,
        on_token: TokenSink<'_>,
    ) -> Generation;

    /// Get the model name
    fn model_name(&self) -> &str;
}
