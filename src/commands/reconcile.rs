//! Reconcile command - repair divergence between the database and the vector store

use crate::commands::reindex::write_email_vectors;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use crate::store::{DeletionOutcome, VectorStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Reconcile options
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Report only, change nothing
    pub dry_run: bool,
    /// Embed emails that have no vector
    pub reembed_missing: bool,
    pub batch_size: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            reembed_missing: true,
            batch_size: crate::config::default_embedding_batch_size(),
        }
    }
}

/// Reconcile statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub email_count: usize,
    pub vector_count: usize,
    /// Vectors with no email row
    pub orphan_vectors: Vec<String>,
    /// Emails with no vector
    pub missing_vectors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphan_deletion: Option<DeletionOutcome>,
    pub reembedded: usize,
    pub dry_run: bool,
}

/// Vector ids that have no email row
pub fn find_orphan_vectors(db_ids: &HashSet<String>, vector_ids: &[String]) -> Vec<String> {
    vector_ids
        .iter()
        .filter(|id| !db_ids.contains(*id))
        .cloned()
        .collect()
}

/// Compare both stores and repair what can be repaired
pub async fn cmd_reconcile(
    db: &MetaDb,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    options: ReconcileOptions,
) -> Result<ReconcileStats> {
    if options.batch_size == 0 {
        return Err(Error::InvalidInput(
            "batch size must be positive".to_string(),
        ));
    }

    info!(dry_run = options.dry_run, "Reconciling stores");

    let db_ids: HashSet<String> = db.list_all_message_ids().await?.into_iter().collect();
    let vector_ids = store.list_ids().await?;
    let vector_set: HashSet<&String> = vector_ids.iter().collect();

    let orphan_vectors = find_orphan_vectors(&db_ids, &vector_ids);
    let mut missing_vectors: Vec<String> = db_ids
        .iter()
        .filter(|id| !vector_set.contains(id))
        .cloned()
        .collect();
    missing_vectors.sort();

    debug!(
        orphans = orphan_vectors.len(),
        missing = missing_vectors.len(),
        "Divergence found"
    );

    let mut stats = ReconcileStats {
        email_count: db_ids.len(),
        vector_count: vector_ids.len(),
        dry_run: options.dry_run,
        ..Default::default()
    };

    if !options.dry_run && !orphan_vectors.is_empty() {
        let outcome = store.delete_ids(&orphan_vectors).await;
        if !outcome.is_deleted() {
            warn!(outcome = %outcome, count = orphan_vectors.len(), "Orphan vectors not removed");
        }
        stats.orphan_deletion = Some(outcome);
    }

    if !options.dry_run && options.reembed_missing && !missing_vectors.is_empty() {
        let mut emails = Vec::with_capacity(missing_vectors.len());
        for id in &missing_vectors {
            if let Some(email) = db.get_email(id).await? {
                emails.push(email);
            }
        }
        let insert_only = !store.capabilities().upsert;
        stats.reembedded =
            write_email_vectors(store, embedder, &emails, options.batch_size, insert_only).await?;
    }

    stats.orphan_vectors = orphan_vectors;
    stats.missing_vectors = missing_vectors;

    info!(
        orphans = stats.orphan_vectors.len(),
        missing = stats.missing_vectors.len(),
        reembedded = stats.reembedded,
        "Reconcile complete"
    );
    Ok(stats)
}

/// Print reconcile stats to console
pub fn print_reconcile_stats(stats: &ReconcileStats) {
    if stats.dry_run {
        println!("\n🔎 Reconcile (dry run)\n");
    } else {
        println!("\n🧹 Reconcile Complete\n");
    }
    println!("Emails: {}", stats.email_count);
    println!("Vectors: {}", stats.vector_count);
    println!("Orphan vectors: {}", stats.orphan_vectors.len());
    if let Some(outcome) = &stats.orphan_deletion {
        println!("  Deletion: {}", outcome);
    }
    println!("Emails without vector: {}", stats.missing_vectors.len());
    if stats.reembedded > 0 {
        println!("  Re-embedded: {}", stats.reembedded);
    }
}
