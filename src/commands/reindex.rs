//! Reindex command - rebuild vectors from the database

use crate::embed::{embed_in_batches, Embedder};
use crate::error::{Error, Result};
use crate::meta::{Email, MetaDb};
use crate::progress::{email_progress_bar, hidden_progress_bar};
use crate::store::{EmailVector, VectorStore};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

/// Reindex statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReindexStats {
    pub emails_reindexed: usize,
    pub batches: usize,
    /// Collection was dropped first because the store cannot upsert
    pub recreated: bool,
}

/// Reindex options
#[derive(Debug, Clone)]
pub struct ReindexOptions {
    /// Batch size for embedding
    pub batch_size: usize,
    /// Draw a progress bar
    pub show_progress: bool,
}

impl Default for ReindexOptions {
    fn default() -> Self {
        Self {
            batch_size: crate::config::default_embedding_batch_size(),
            show_progress: false,
        }
    }
}

/// Embed `emails` and write their vectors
pub(crate) async fn write_email_vectors(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    emails: &[Email],
    batch_size: usize,
    insert_only: bool,
) -> Result<usize> {
    if emails.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = emails.iter().map(|e| e.content.clone()).collect();
    let vectors = embed_in_batches(embedder, texts, batch_size).await?;

    let points: Vec<EmailVector> = emails
        .iter()
        .zip(vectors)
        .map(|(e, v)| EmailVector::new(e.message_id.clone(), v, e.ingestion_id.clone()))
        .collect();
    let written = points.len();

    if insert_only {
        store.insert(points).await?;
    } else {
        store.upsert(points).await?;
    }
    Ok(written)
}

async fn rebuild_pages(
    db: &MetaDb,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    batch_size: usize,
    skip: &HashSet<String>,
    pb: &ProgressBar,
) -> Result<(usize, usize)> {
    let insert_only = !store.capabilities().upsert;
    let page_size = batch_size.max(1);
    let mut offset = 0usize;
    let mut written = 0usize;
    let mut batches = 0usize;

    loop {
        let page = db.list_emails(offset, page_size).await?;
        if page.is_empty() {
            break;
        }
        offset += page.len();

        let pending: Vec<Email> = page
            .into_iter()
            .filter(|e| !skip.contains(&e.message_id))
            .collect();
        let count = write_email_vectors(store, embedder, &pending, batch_size, insert_only).await?;
        written += count;
        batches += 1;
        pb.inc(count as u64);
    }

    Ok((written, batches))
}

/// Re-embed every stored email except `skip` and write it to the vector store
pub(crate) async fn rebuild_vectors_from_db(
    db: &MetaDb,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    batch_size: usize,
    skip: &HashSet<String>,
) -> Result<usize> {
    let (written, _) = rebuild_pages(db, store, embedder, batch_size, skip, &hidden_progress_bar()).await?;
    Ok(written)
}

/// Execute reindex command - re-embed all emails
pub async fn cmd_reindex(
    db: &MetaDb,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    options: ReindexOptions,
) -> Result<ReindexStats> {
    if options.batch_size == 0 {
        return Err(Error::InvalidInput(
            "batch size must be positive".to_string(),
        ));
    }

    info!("Starting reindex operation");

    let total = db.count_emails().await?;

    // Without upsert the only way to replace vectors is to start empty
    let recreated = !store.capabilities().upsert;
    if recreated {
        store.recreate().await?;
    }

    let pb = if options.show_progress {
        email_progress_bar(total as u64, "Reindexing")
    } else {
        hidden_progress_bar()
    };

    let (written, batches) = rebuild_pages(
        db,
        store,
        embedder,
        options.batch_size,
        &HashSet::new(),
        &pb,
    )
    .await?;
    pb.finish_and_clear();

    info!(emails = written, batches, "Reindex complete");

    Ok(ReindexStats {
        emails_reindexed: written,
        batches,
        recreated,
    })
}

/// Print reindex stats to console
pub fn print_reindex_stats(stats: &ReindexStats) {
    println!("\n🔄 Reindex Complete\n");
    println!("Emails reindexed: {}", stats.emails_reindexed);
    println!("Batches: {}", stats.batches);
    if stats.recreated {
        println!("Collection recreated (store does not support upsert)");
    }
}
