//! Clear commands - remove the whole index or one ingestion run

use crate::error::{Error, Result};
use crate::meta::{now_timestamp, MetaDb};
use crate::store::{DeletionOutcome, VectorStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// What a clear removed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingestion_id: Option<String>,
    pub emails_deleted: u64,
    pub ingestions_deleted: u64,
    /// Best-effort vector removal result
    pub vectors: DeletionOutcome,
    pub timestamp: String,
}

fn log_vector_outcome(outcome: &DeletionOutcome, scope: &str) {
    match outcome {
        DeletionOutcome::Deleted => info!(scope, "Vectors removed"),
        DeletionOutcome::Unsupported => {
            warn!(scope, "Vector store cannot delete by id; run 'mailrag reindex' to drop stale vectors")
        }
        DeletionOutcome::Failed { reason } => {
            warn!(scope, reason = %reason, "Vector removal failed; run 'mailrag reconcile' later")
        }
    }
}

/// Delete every email and run, then drop the vector collection
pub async fn cmd_clear(db: &MetaDb, store: &dyn VectorStore) -> Result<ClearOutcome> {
    info!("Clearing index");

    let deleted = db.clear_all().await?;
    let timestamp = now_timestamp();
    db.set_last_updated(&timestamp).await?;

    let vectors = store.delete_collection().await;
    log_vector_outcome(&vectors, "all");

    Ok(ClearOutcome {
        ingestion_id: None,
        emails_deleted: deleted.emails,
        ingestions_deleted: deleted.ingestions,
        vectors,
        timestamp,
    })
}

/// Delete the emails of one run and the run itself
pub async fn cmd_clear_ingestion(
    db: &MetaDb,
    store: &dyn VectorStore,
    ingestion_id: &str,
) -> Result<ClearOutcome> {
    if ingestion_id.trim().is_empty() {
        return Err(Error::InvalidInput(
            "ingestion id must not be empty".to_string(),
        ));
    }

    let message_ids = db.message_ids_for_ingestion(ingestion_id).await?;
    if message_ids.is_empty() && db.get_ingestion(ingestion_id).await?.is_none() {
        return Err(Error::IngestionNotFound(ingestion_id.to_string()));
    }

    info!(ingestion_id, emails = message_ids.len(), "Clearing ingestion");

    let deleted = db.delete_ingestion(ingestion_id).await?;
    let timestamp = now_timestamp();
    db.set_last_updated(&timestamp).await?;

    let vectors = if message_ids.is_empty() {
        DeletionOutcome::Deleted
    } else {
        store.delete_ids(&message_ids).await
    };
    log_vector_outcome(&vectors, ingestion_id);

    Ok(ClearOutcome {
        ingestion_id: Some(ingestion_id.to_string()),
        emails_deleted: deleted.emails,
        ingestions_deleted: deleted.ingestions,
        vectors,
        timestamp,
    })
}

/// Print clear outcome to console
pub fn print_clear_outcome(outcome: &ClearOutcome) {
    match &outcome.ingestion_id {
        Some(id) => println!("\n🗑  Cleared ingestion {}\n", id),
        None => println!("\n🗑  Index cleared\n"),
    }
    println!("Emails deleted: {}", outcome.emails_deleted);
    println!("Ingestion runs deleted: {}", outcome.ingestions_deleted);
    println!("Vectors: {}", outcome.vectors);
}
