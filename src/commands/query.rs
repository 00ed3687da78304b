//! Search command implementation

use crate::embed::{embed_checked, Embedder};
use crate::error::{Error, Result};
use crate::meta::{Email, MetaDb};
use crate::store::VectorStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};

/// Default snippet length in characters
pub const DEFAULT_SNIPPET_CHARS: usize = 500;

/// A retrieved email with its vector distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEmail {
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    pub subject: String,
    pub sender: String,
    pub received_dt: String,
    pub weblink: String,
    pub content: String,
    pub snippet: String,
    /// Cosine distance; lower is more similar
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingestion_id: Option<String>,
}

impl ScoredEmail {
    fn from_email(email: Email, score: f32, snippet_chars: usize) -> Self {
        Self {
            snippet: snippet(&email.content, snippet_chars),
            message_id: email.message_id,
            folder_id: email.folder_id,
            subject: email.subject,
            sender: email.sender,
            received_dt: email.received_dt,
            weblink: email.weblink,
            content: email.content,
            score,
            ingestion_id: email.ingestion_id,
        }
    }
}

/// Per-stage retrieval timings in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalTimings {
    pub embed_ms: f64,
    pub search_ms: f64,
    pub hydrate_ms: f64,
    pub retrieval_ms: f64,
}

/// Search result for CLI display
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub results: Vec<ScoredEmail>,
    pub timings: RetrievalTimings,
}

/// First `max_chars` characters of `content`
pub fn snippet(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => content[..idx].to_string(),
        None => content.to_string(),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Nearest emails to `query`, hydrated from the relational store
pub async fn cmd_search(
    db: &MetaDb,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    query: &str,
    n_results: usize,
) -> Result<Vec<ScoredEmail>> {
    let outcome = search_timed(db, store, embedder, query, n_results, DEFAULT_SNIPPET_CHARS).await?;
    Ok(outcome.results)
}

/// Search with per-stage timings.
///
/// Vector hits without a relational row are stale and skipped, as are
/// repeated ids. Result order is the vector store's order.
pub async fn search_timed(
    db: &MetaDb,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    query: &str,
    n_results: usize,
    snippet_chars: usize,
) -> Result<SearchOutcome> {
    if query.trim().is_empty() {
        return Err(Error::InvalidInput("query must not be empty".to_string()));
    }

    let mut timings = RetrievalTimings::default();
    if n_results == 0 {
        return Ok(SearchOutcome {
            query: query.to_string(),
            results: Vec::new(),
            timings,
        });
    }

    info!("Searching: {}", query);
    let start = Instant::now();

    let query_vector = embed_checked(embedder, vec![query.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Embedding("No embedding returned".to_string()))?;
    timings.embed_ms = elapsed_ms(start);

    let search_start = Instant::now();
    let hits = store.query(query_vector, n_results).await?;
    timings.search_ms = elapsed_ms(search_start);
    debug!("Got {} raw hits from vector store", hits.len());

    let hydrate_start = Instant::now();
    let mut seen = HashSet::new();
    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        if !seen.insert(hit.message_id.clone()) {
            debug!(message_id = %hit.message_id, "Skipping duplicate hit");
            continue;
        }
        match db.get_email(&hit.message_id).await? {
            Some(email) => results.push(ScoredEmail::from_email(email, hit.distance, snippet_chars)),
            None => debug!(message_id = %hit.message_id, "Skipping hit with no stored email"),
        }
    }
    timings.hydrate_ms = elapsed_ms(hydrate_start);
    timings.retrieval_ms = elapsed_ms(start);

    info!("Returning {} results", results.len());

    Ok(SearchOutcome {
        query: query.to_string(),
        results,
        timings,
    })
}

/// Print one numbered source in the CLI layout
pub fn print_source(index: usize, r: &ScoredEmail) {
    println!("[{}] score={:.4} subject={}", index, r.score, r.subject);
    println!("    from={} received={}", r.sender, r.received_dt);
    if !r.weblink.is_empty() {
        println!("    link={}", r.weblink);
    }
    println!("{}", r.snippet);
    println!();
}

/// Print search results to console
pub fn print_search_results(outcome: &SearchOutcome) {
    println!("\n🔍 Query: {}\n", outcome.query);

    if outcome.results.is_empty() {
        println!("No matching emails found.");
        return;
    }

    println!("Found {} results:\n", outcome.results.len());
    for (i, r) in outcome.results.iter().enumerate() {
        print_source(i + 1, r);
    }
}
