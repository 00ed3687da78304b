//! Sync command - pull mail from the provider and ingest it

use crate::commands::clear::cmd_clear;
use crate::commands::ingest::{cmd_ingest, IngestOutcome, IngestRequest, MODE_FULL, MODE_INCREMENTAL};
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::graph::GraphClient;
use crate::meta::MetaDb;
use crate::store::VectorStore;
use serde::Serialize;
use tracing::info;

/// Default folder when none is given
pub const DEFAULT_FOLDER: &str = "inbox";

/// What to pull
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub folder_id: String,
    /// Maximum messages fetched from the folder
    pub limit: usize,
    /// Fetch exactly these messages instead of listing the folder
    pub message_ids: Option<Vec<String>>,
    /// Clear the index first
    pub full: bool,
    pub ingestion_id: Option<String>,
    pub label: Option<String>,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            folder_id: DEFAULT_FOLDER.to_string(),
            limit: 100,
            message_ids: None,
            full: false,
            ingestion_id: None,
            label: None,
        }
    }
}

/// Sync result
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub fetched: usize,
    pub cleared: bool,
    pub ingest: IngestOutcome,
}

/// Fetch messages from the provider and ingest them
pub async fn cmd_sync(
    db: &MetaDb,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    graph: &GraphClient,
    token: &str,
    request: SyncRequest,
) -> Result<SyncOutcome> {
    if let Some(ids) = &request.message_ids {
        if ids.is_empty() {
            return Err(Error::InvalidInput(
                "message id list must not be empty".to_string(),
            ));
        }
    }
    if request.message_ids.is_none() && request.limit == 0 {
        return Err(Error::InvalidInput("limit must be positive".to_string()));
    }
    if token.trim().is_empty() {
        return Err(Error::InvalidInput("access token must not be empty".to_string()));
    }

    // Fetch before clearing so a provider failure leaves the index intact
    let messages = match &request.message_ids {
        Some(ids) => graph.get_messages_by_ids(token, ids).await?,
        None => {
            graph
                .list_all_messages(token, &request.folder_id, request.limit)
                .await?
        }
    };
    let fetched = messages.len();
    info!(fetched, full = request.full, "Fetched messages for sync");

    if request.full {
        cmd_clear(db, store).await?;
    }

    let mode = if request.full { MODE_FULL } else { MODE_INCREMENTAL };
    let folder_id = match request.message_ids {
        Some(_) => None,
        None => Some(request.folder_id),
    };

    let ingest = cmd_ingest(
        db,
        store,
        embedder,
        IngestRequest {
            messages,
            folder_id,
            ingestion_id: request.ingestion_id,
            label: request.label,
            mode: Some(mode.to_string()),
        },
    )
    .await?;

    Ok(SyncOutcome {
        fetched,
        cleared: request.full,
        ingest,
    })
}

/// Print sync outcome to console
pub fn print_sync_outcome(outcome: &SyncOutcome) {
    println!("\n📬 Sync Complete\n");
    println!("Fetched: {}", outcome.fetched);
    if outcome.cleared {
        println!("Index cleared before ingest (full sync)");
    }
    println!("Ingestion: {}", outcome.ingest.ingestion_id);
    println!("Emails indexed: {}", outcome.ingest.ingested_count);
    if outcome.ingest.degraded_vector_rebuild {
        println!("Warning: vector store does not support upsert; the collection was rebuilt.");
    }
}
