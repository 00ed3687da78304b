//! Streaming Ollama client

use super::{Generation, GenerationTiming, Generator, ResourceSampler, TokenSink};
use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: usize,
}

/// One line of the `/api/generate` NDJSON stream
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    eval_count: Option<u64>,
    prompt_eval_count: Option<u64>,
    eval_duration: Option<u64>,
    error: Option<String>,
}

/// Accumulated state of one streaming response
#[derive(Debug, Default)]
struct StreamState {
    text: String,
    ttft_ms: Option<f64>,
    fragments: u64,
    eval_count: Option<u64>,
    prompt_eval_count: Option<u64>,
    eval_duration_ns: Option<u64>,
}

impl StreamState {
    /// Apply one line. Returns true once the final chunk has been seen.
    fn apply_line(&mut self, line: &str, start: Instant, on_token: TokenSink<'_>) -> Result<bool> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(false);
        }

        let chunk: GenerateChunk = serde_json::from_str(line)
            .map_err(|e| Error::Generation(format!("invalid stream chunk: {}", e)))?;

        if let Some(err) = chunk.error {
            return Err(Error::Generation(err));
        }

        if !chunk.response.is_empty() {
            if self.ttft_ms.is_none() {
                self.ttft_ms = Some(start.elapsed().as_secs_f64() * 1000.0);
            }
            self.fragments += 1;
            on_token(&chunk.response);
            self.text.push_str(&chunk.response);
        }

        if chunk.done {
            self.eval_count = chunk.eval_count;
            self.prompt_eval_count = chunk.prompt_eval_count;
            self.eval_duration_ns = chunk.eval_duration;
        }

        Ok(chunk.done)
    }

    fn timing(&self, generation_ms: f64) -> GenerationTiming {
        let tokens = self.eval_count.unwrap_or(self.fragments);
        let tokens_per_sec = match self.eval_duration_ns {
            Some(ns) if ns > 0 => Some(tokens as f64 / (ns as f64 / 1e9)),
            _ if generation_ms > 0.0 && tokens > 0 => {
                Some(tokens as f64 / (generation_ms / 1000.0))
            }
            _ => None,
        };

        GenerationTiming {
            ttft_ms: self.ttft_ms,
            generation_ms,
            tokens,
            prompt_tokens: self.prompt_eval_count,
            tokens_per_sec,
            resources: Default::default(),
        }
    }
}

/// Ollama generator
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
    sample_interval: Duration,
}

impl OllamaGenerator {
    /// Create a new client
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            sample_interval: Duration::from_millis(config.sample_interval_ms),
        })
    }

    async fn stream_generate(
        &self,
        prompt: &str,
        max_tokens: usize,
        on_token: TokenSink<'_>,
        state: &mut StreamState,
        start: Instant,
    ) -> Result<()> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
            options: GenerateOptions {
                num_predict: max_tokens,
            },
        };

        debug!(
            model = %self.model,
            prompt_len = prompt.len(),
            max_tokens,
            "Sending generation request"
        );

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!("HTTP {}: {}", status, body.trim())));
        }

        let mut stream = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);

            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                if state.apply_line(&String::from_utf8_lossy(&line), start, on_token)? {
                    return Ok(());
                }
            }
        }

        // Final line without a trailing newline
        if state.apply_line(&String::from_utf8_lossy(&buf), start, on_token)? {
            return Ok(());
        }

        Err(Error::Generation(
            "stream ended before the final chunk".to_string(),
        ))
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: usize,
        on_token: TokenSink<'_>,
    ) -> Generation {
        let sampler = ResourceSampler::start(self.sample_interval);
        let start = Instant::now();
        let mut state = StreamState::default();

        let result = self
            .stream_generate(prompt, max_tokens, on_token, &mut state, start)
            .await;

        let generation_ms = start.elapsed().as_secs_f64() * 1000.0;
        let mut timing = state.timing(generation_ms);
        timing.resources = sampler.finish().await;

        match result {
            Ok(()) => {
                debug!(
                    model = %self.model,
                    tokens = timing.tokens,
                    generation_ms,
                    "Generation complete"
                );
                Generation {
                    text: state.text.trim().to_string(),
                    timing,
                    error: None,
                }
            }
            Err(e) => {
                let detail = match e {
                    Error::Generation(msg) => msg,
                    other => other.to_string(),
                };
                warn!(model = %self.model, error = %detail, "Generation failed");
                Generation {
                    text: format!("[Error contacting Ollama: {}]", detail),
                    timing,
                    error: Some(detail),
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(url: &str) -> OllamaGenerator {
        OllamaGenerator::new(&GenerationConfig {
            ollama_url: url.to_string(),
            model: "mistral".to_string(),
            max_tokens: 220,
            timeout_secs: 5,
            sample_interval_ms: 10,
        })
        .unwrap()
    }

    fn ndjson(lines: &[serde_json::Value]) -> String {
        lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n")
            + "\n"
    }

    #[tokio::test]
    async fn test_streams_tokens_until_done() {
        let server = MockServer::start().await;
        let body = ndjson(&[
            json!({"response": "The invoice", "done": false}),
            json!({"response": " is due Friday [1].", "done": false}),
            json!({"response": "", "done": true, "eval_count": 7, "prompt_eval_count": 90, "eval_duration": 350_000_000u64}),
        ]);
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": "mistral",
                "stream": true,
                "options": {"num_predict": 64}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"),
            )
            .mount(&server)
            .await;

        let mut tokens: Vec<String> = Vec::new();
        let mut sink = |t: &str| tokens.push(t.to_string());
        let generation = generator(&server.uri()).generate("prompt", 64, &mut sink).await;

        assert_eq!(generation.text, "The invoice is due Friday [1].");
        assert!(!generation.is_error());
        assert_eq!(generation.timing.tokens, 7);
        assert_eq!(generation.timing.prompt_tokens, Some(90));
        assert!(generation.timing.ttft_ms.is_some());
        assert!(generation.timing.tokens_per_sec.unwrap() > 19.0);
        assert_eq!(tokens, vec!["The invoice", " is due Friday [1]."]);
    }

    #[tokio::test]
    async fn test_http_error_is_downgraded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model 'mistral' not found"))
            .mount(&server)
            .await;

        let mut sink = |_: &str| {};
        let generation = generator(&server.uri()).generate("prompt", 8, &mut sink).await;

        assert!(generation.is_error());
        assert!(generation.text.starts_with("[Error contacting Ollama: HTTP 404"));
        assert!(generation.text.contains("not found"));
    }

    #[tokio::test]
    async fn test_stream_without_done_is_downgraded() {
        let server = MockServer::start().await;
        let body = ndjson(&[json!({"response": "partial", "done": false})]);
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let mut sink = |_: &str| {};
        let generation = generator(&server.uri()).generate("prompt", 8, &mut sink).await;

        assert!(generation.is_error());
        assert_eq!(
            generation.text,
            "[Error contacting Ollama: stream ended before the final chunk]"
        );
    }

    #[tokio::test]
    async fn test_error_chunk_is_downgraded() {
        let server = MockServer::start().await;
        let body = ndjson(&[json!({"error": "out of memory"})]);
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let mut sink = |_: &str| {};
        let generation = generator(&server.uri()).generate("prompt", 8, &mut sink).await;
        assert_eq!(generation.text, "[Error contacting Ollama: out of memory]");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_downgraded() {
        let mut sink = |_: &str| {};
        let generation = generator("http://127.0.0.1:9").generate("prompt", 8, &mut sink).await;

        assert!(generation.is_error());
        assert!(generation.text.starts_with("[Error contacting Ollama: "));
    }

    #[test]
    fn test_final_line_without_newline() {
        let mut state = StreamState::default();
        let mut sink = |_: &str| {};
        let done = state
            .apply_line(r#"{"response":"ok","done":true}"#, Instant::now(), &mut sink)
            .unwrap();
        assert!(done);
        assert_eq!(state.text, "ok");
        assert_eq!(state.timing(10.0).tokens, 1);
    }
}
