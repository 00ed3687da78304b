//! Ask command - retrieval plus grounded generation

use crate::commands::query::{print_source, search_timed, RetrievalTimings, ScoredEmail, DEFAULT_SNIPPET_CHARS};
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::generate::{GenerationTiming, Generator, TokenSink};
use crate::meta::MetaDb;
use crate::prompt::build_prompt;
use crate::store::VectorStore;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Answer returned when retrieval finds nothing
pub const NO_MATCHES_ANSWER: &str = "I don't know - no matching emails were found.";

/// A question to answer from the index
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub question: String,
    pub n_results: usize,
    pub max_tokens: usize,
    pub snippet_chars: usize,
}

impl AskRequest {
    pub fn new(question: impl Into<String>, n_results: usize, max_tokens: usize) -> Self {
        Self {
            question: question.into(),
            n_results,
            max_tokens,
            snippet_chars: DEFAULT_SNIPPET_CHARS,
        }
    }
}

/// Answer with its sources and timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskOutcome {
    pub question: String,
    pub answer: String,
    /// Retrieval returned nothing; the generator was not called
    pub no_matches: bool,
    pub sources: Vec<ScoredEmail>,
    pub retrieval: RetrievalTimings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationTiming>,
    /// Set when the answer is a downgraded generation failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub total_ms: f64,
}

/// Retrieve sources for a question and generate a cited answer
pub async fn cmd_ask(
    db: &MetaDb,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    request: AskRequest,
    on_token: TokenSink<'_>,
) -> Result<AskOutcome> {
    if request.max_tokens == 0 {
        return Err(Error::InvalidInput("max_tokens must be positive".to_string()));
    }

    let start = Instant::now();
    let search = search_timed(
        db,
        store,
        embedder,
        &request.question,
        request.n_results,
        request.snippet_chars,
    )
    .await?;

    if search.results.is_empty() {
        info!("No matching emails; skipping generation");
        return Ok(AskOutcome {
            question: request.question,
            answer: NO_MATCHES_ANSWER.to_string(),
            no_matches: true,
            sources: Vec::new(),
            retrieval: search.timings,
            generation: None,
            generation_error: None,
            model: None,
            total_ms: start.elapsed().as_secs_f64() * 1000.0,
        });
    }

    let prompt = build_prompt(&request.question, &search.results);
    debug!(
        sources = search.results.len(),
        prompt_len = prompt.len(),
        "Generating answer"
    );

    let generation = generator
        .generate(&prompt, request.max_tokens, on_token)
        .await;

    Ok(AskOutcome {
        question: request.question,
        answer: generation.text,
        no_matches: false,
        sources: search.results,
        retrieval: search.timings,
        generation: Some(generation.timing),
        generation_error: generation.error,
        model: Some(generator.model_name().to_string()),
        total_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}

/// One line of the latency log
pub fn latency_log_entry(outcome: &AskOutcome) -> serde_json::Value {
    let mut entry = serde_json::json!({
        "event": "cli_query",
        "query": outcome.question,
        "total_ms": outcome.total_ms,
        "no_matches": outcome.no_matches,
        "sources": outcome.sources.len(),
    });

    if let Some(map) = entry.as_object_mut() {
        let timings = [
            serde_json::to_value(&outcome.retrieval).ok(),
            outcome
                .generation
                .as_ref()
                .and_then(|g| serde_json::to_value(g).ok()),
        ];
        for fields in timings.into_iter().flatten() {
            if let serde_json::Value::Object(fields) = fields {
                map.extend(fields);
            }
        }
        if let Some(model) = &outcome.model {
            map.insert("model".to_string(), model.clone().into());
        }
    }
    entry
}

/// Append one JSON line to the latency log
pub fn append_latency_log(path: &Path, outcome: &AskOutcome) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let line = serde_json::to_string(&latency_log_entry(outcome))?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// Print the answer, its sources and the latency breakdown.
/// `streamed` means the answer text was already printed token by token.
pub fn print_ask_outcome(outcome: &AskOutcome, streamed: bool) {
    if outcome.no_matches {
        println!("\nNo matching emails found.\n");
        println!("{}", outcome.answer);
        return;
    }

    if streamed {
        println!();
        if outcome.generation_error.is_some() {
            println!("{}", outcome.answer);
        }
    } else {
        println!("\nAnswer:\n");
        println!("{}", outcome.answer);
    }

    println!("\n--- Retrieved Sources ---");
    for (i, r) in outcome.sources.iter().enumerate() {
        print_source(i + 1, r);
    }

    println!("\n--- Latency Breakdown ---");
    let t = &outcome.retrieval;
    for (name, ms) in [
        ("embed_ms", t.embed_ms),
        ("search_ms", t.search_ms),
        ("hydrate_ms", t.hydrate_ms),
        ("retrieval_ms", t.retrieval_ms),
    ] {
        println!("{:22}: {:.1} ms", name, ms);
    }
    if let Some(g) = &outcome.generation {
        if let Some(ttft) = g.ttft_ms {
            println!("{:22}: {:.1} ms", "ttft_ms", ttft);
        }
        println!("{:22}: {:.1} ms", "generation_ms", g.generation_ms);
        if let Some(tps) = g.tokens_per_sec {
            println!("{:22}: {:.1} ({} tokens)", "tokens_per_sec", tps, g.tokens);
        }
        if let (Some(avg), Some(peak)) = (g.resources.cpu_avg_percent, g.resources.cpu_peak_percent) {
            println!("{:22}: avg {:.1}% / peak {:.1}%", "cpu", avg, peak);
        }
        if let Some(rss) = g.resources.rss_peak_bytes {
            println!("{:22}: {:.1} MiB", "rss_peak", rss as f64 / (1024.0 * 1024.0));
        }
    }
    println!("{:22}: {:.1} ms", "total_ms", outcome.total_ms);
}
