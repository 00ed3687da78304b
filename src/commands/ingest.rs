//! Ingest command implementation

use crate::commands::reindex::rebuild_vectors_from_db;
use crate::config::default_embedding_batch_size;
use crate::embed::{embed_checked, Embedder};
use crate::error::{Error, Result};
use crate::meta::{now_timestamp, Email, IngestionRun, MetaDb};
use crate::normalize::{normalize_batch, NormalizedEmail};
use crate::store::{EmailVector, VectorStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Run mode tag for a full resync
pub const MODE_FULL: &str = "FULL";
/// Run mode tag for an incremental sync
pub const MODE_INCREMENTAL: &str = "INCREMENTAL";
/// Run mode tag when the caller does not say
pub const MODE_UNKNOWN: &str = "UNKNOWN";

/// A batch of raw provider messages to index
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub messages: Vec<Value>,
    /// Provenance folder; overrides `parentFolderId` on the messages
    pub folder_id: Option<String>,
    pub ingestion_id: Option<String>,
    pub label: Option<String>,
    pub mode: Option<String>,
}

/// Result of one ingestion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub ingested_count: usize,
    /// Records dropped for lack of an id
    pub dropped_count: usize,
    pub ingestion_id: String,
    pub timestamp: String,
    /// Vectors were rebuilt because the store cannot upsert
    pub degraded_vector_rebuild: bool,
}

/// Default run id: `ingest_<unix seconds>`
pub fn default_ingestion_id() -> String {
    format!("ingest_{}", Utc::now().timestamp())
}

/// Keep the last occurrence of each message id, in first-seen order
fn dedupe_last_wins(emails: Vec<NormalizedEmail>) -> Vec<NormalizedEmail> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<NormalizedEmail> = Vec::with_capacity(emails.len());
    for email in emails {
        match index.get(&email.message_id) {
            Some(&i) => out[i] = email,
            None => {
                index.insert(email.message_id.clone(), out.len());
                out.push(email);
            }
        }
    }
    out
}

/// Index a batch of provider messages into both stores.
///
/// Relational rows are committed before any embedding happens; an embedder or
/// vector store failure after that point is returned as an error and leaves
/// the rows in place for `reindex` or `reconcile` to repair.
pub async fn cmd_ingest(
    db: &MetaDb,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    request: IngestRequest,
) -> Result<IngestOutcome> {
    let received = request.messages.len();
    let normalized = normalize_batch(&request.messages);
    let dropped_count = received - normalized.len();
    let normalized = dedupe_last_wins(normalized);

    let timestamp = now_timestamp();
    let ingestion_id = request
        .ingestion_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(default_ingestion_id);

    if normalized.is_empty() {
        info!(received, "Nothing to ingest");
        return Ok(IngestOutcome {
            ingested_count: 0,
            dropped_count,
            ingestion_id,
            timestamp,
            degraded_vector_rebuild: false,
        });
    }

    let mode = request
        .mode
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| MODE_UNKNOWN.to_string());
    let label = request
        .label
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| format!("{} {}", mode, timestamp));

    info!(
        ingestion_id = %ingestion_id,
        mode = %mode,
        count = normalized.len(),
        "Starting ingestion"
    );

    let run = IngestionRun::new(ingestion_id.clone(), label, mode, timestamp.clone());
    if !db.ensure_ingestion(&run).await? {
        debug!(ingestion_id = %ingestion_id, "Appending to existing ingestion run");
    }

    let emails: Vec<Email> = normalized
        .into_iter()
        .map(|e| Email::from_normalized(e, request.folder_id.as_deref(), &ingestion_id, &timestamp))
        .collect();
    db.upsert_emails(&emails).await?;

    let texts: Vec<String> = emails.iter().map(|e| e.content.clone()).collect();
    let vectors = embed_checked(embedder, texts).await?;

    let points: Vec<EmailVector> = emails
        .iter()
        .zip(vectors)
        .map(|(e, v)| EmailVector::new(e.message_id.clone(), v, Some(ingestion_id.clone())))
        .collect();

    let degraded_vector_rebuild = !store.capabilities().upsert;
    if degraded_vector_rebuild {
        warn!(
            store = %store.describe(),
            "Vector store cannot upsert; recreating collection and rebuilding from the database"
        );
        let batch_ids: HashSet<String> = emails.iter().map(|e| e.message_id.clone()).collect();
        store.recreate().await?;
        store.insert(points).await?;
        let rebuilt = rebuild_vectors_from_db(
            db,
            store,
            embedder,
            default_embedding_batch_size(),
            &batch_ids,
        )
        .await?;
        debug!(rebuilt, "Re-inserted vectors for emails outside this batch");
    } else {
        store.upsert(points).await?;
    }

    let email_count = db.refresh_email_count(&ingestion_id).await?;
    db.set_last_updated(&timestamp).await?;

    info!(
        ingestion_id = %ingestion_id,
        ingested = emails.len(),
        run_total = email_count,
        "Ingestion complete"
    );

    Ok(IngestOutcome {
        ingested_count: emails.len(),
        dropped_count,
        ingestion_id,
        timestamp,
        degraded_vector_rebuild,
    })
}

/// Messages from an exported file: a JSON array or a Graph page (`{"value": [...]}`)
pub fn parse_message_export(content: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(content)? {
        Value::Array(messages) => Ok(messages),
        Value::Object(mut page) => match page.remove("value") {
            Some(Value::Array(messages)) => Ok(messages),
            _ => Err(Error::InvalidInput(
                "expected a JSON array of messages or an object with a 'value' array".to_string(),
            )),
        },
        _ => Err(Error::InvalidInput(
            "expected a JSON array of messages".to_string(),
        )),
    }
}

/// Print ingest outcome to console
pub fn print_ingest_outcome(outcome: &IngestOutcome) {
    println!("\n📥 Ingest Complete\n");
    println!("Ingestion: {}", outcome.ingestion_id);
    println!("Emails indexed: {}", outcome.ingested_count);
    if outcome.dropped_count > 0 {
        println!("Skipped (no id): {}", outcome.dropped_count);
    }
    println!("Timestamp: {}", outcome.timestamp);
    if outcome.degraded_vector_rebuild {
        println!("\nWarning: vector store does not support upsert; the collection was rebuilt.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_message;
    use serde_json::json;

    #[test]
    fn test_dedupe_keeps_last_occurrence_in_first_position() {
        let batch = vec![
            normalize_message(&json!({"id": "a", "subject": "old"})).unwrap(),
            normalize_message(&json!({"id": "b"})).unwrap(),
            normalize_message(&json!({"id": "a", "subject": "new"})).unwrap(),
        ];

        let out = dedupe_last_wins(batch);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].message_id, "a");
        assert_eq!(out[0].subject, "new");
        assert_eq!(out[1].message_id, "b");
    }

    #[test]
    fn test_parse_message_export_shapes() {
        let array = parse_message_export(r#"[{"id": "a"}, {"id": "b"}]"#).unwrap();
        assert_eq!(array.len(), 2);

        let page = parse_message_export(
            r#"{"value": [{"id": "a"}], "@odata.nextLink": "https://graph.microsoft.com/next"}"#,
        )
        .unwrap();
        assert_eq!(page[0]["id"], "a");

        assert!(matches!(
            parse_message_export(r#"{"id": "a"}"#),
            Err(Error::InvalidInput(_))
        ));
        assert!(parse_message_export("not json").is_err());
    }

    #[test]
    fn test_default_ingestion_id_format() {
        let id = default_ingestion_id();
        let secs = id.strip_prefix("ingest_").unwrap();
        assert!(secs.parse::<i64>().is_ok());
    }
}
