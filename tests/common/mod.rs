//! Shared fixtures for pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use mailrag::commands::{cmd_ingest, IngestOutcome, IngestRequest};
use mailrag::config::Config;
use mailrag::embed::Embedder;
use mailrag::generate::{Generation, GenerationTiming, Generator, TokenSink};
use mailrag::meta::MetaDb;
use mailrag::store::VectorStore;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

const HASH_DIM: usize = 64;

/// Bag-of-words embedder: each lowercase word bumps one FNV-hashed bucket
pub struct HashEmbedder;

fn bucket(word: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % HASH_DIM as u64) as usize
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; HASH_DIM];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        v[bucket(word)] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: Vec<String>) -> mailrag::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        HASH_DIM
    }

    fn model_name(&self) -> &str {
        "hash-bow"
    }
}

/// Embedder whose backend is always down
pub struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _texts: Vec<String>) -> mailrag::Result<Vec<Vec<f32>>> {
        Err(mailrag::Error::Embedding("down".to_string()))
    }

    fn dimension(&self) -> usize {
        HASH_DIM
    }

    fn model_name(&self) -> &str {
        "down"
    }
}

/// Generator that replays fixed fragments and records every prompt
pub struct ScriptedGenerator {
    fragments: Vec<String>,
    pub prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _max_tokens: usize, on_token: TokenSink<'_>) -> Generation {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        for fragment in &self.fragments {
            on_token(fragment.as_str());
        }
        Generation {
            text: self.fragments.concat(),
            timing: GenerationTiming {
                generation_ms: 5.0,
                tokens: self.fragments.len() as u64,
                ..Default::default()
            },
            error: None,
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Config and database rooted in a temporary directory
pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub db: MetaDb,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(dir.path().to_path_buf()));
        let db = MetaDb::new(&config.paths.db_file).await.unwrap();
        Self { dir, config, db }
    }

    pub async fn ingest(
        &self,
        store: &dyn VectorStore,
        ingestion_id: &str,
        messages: Vec<Value>,
    ) -> IngestOutcome {
        cmd_ingest(
            &self.db,
            store,
            &HashEmbedder,
            IngestRequest {
                messages,
                ingestion_id: Some(ingestion_id.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }
}

/// A Graph-shaped message
pub fn message(id: &str, subject: &str, body: &str, sender: &str) -> Value {
    json!({
        "id": id,
        "subject": subject,
        "bodyPreview": body,
        "webLink": format!("https://outlook.office.com/mail/{}", id),
        "receivedDateTime": "2024-05-02T09:30:00Z",
        "parentFolderId": "inbox",
        "from": {"emailAddress": {"name": sender, "address": format!("{}@example.com", sender)}}
    })
}

pub fn invoice() -> Value {
    message(
        "m1",
        "Invoice 1042",
        "Invoice payment is due on Friday. Please transfer the payment to the usual account.",
        "billing",
    )
}

pub fn lunch() -> Value {
    message("m2", "Team lunch", "Lunch on Tuesday at the noodle place?", "alice")
}

pub fn standup() -> Value {
    message("m3", "Standup moved", "Tomorrow's standup starts at ten instead of nine.", "bob")
}
