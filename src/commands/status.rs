//! Status and listing commands

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::{IngestionRun, MetaDb};
use crate::store::VectorStore;
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub indexed_count: i64,
    pub last_updated: Option<String>,
    pub ingestion_count: i64,
    pub config_path: String,
    pub db_path: String,
    pub vector_store: String,
    pub embedding_model: String,
    pub generation_model: String,
    pub vector_store_connected: bool,
    pub vector_count: u64,
}

/// Get index status. Vector store problems never fail this call.
pub async fn cmd_status(config: &Config, db: &MetaDb, store: &dyn VectorStore) -> Result<StatusInfo> {
    info!("Getting status");

    let indexed_count = db.count_emails().await?;
    let last_updated = db.last_updated().await?;
    let ingestion_count = db.count_ingestions().await?;

    let (vector_store_connected, vector_count) = match store.count().await {
        Ok(count) => (true, count),
        Err(e) => {
            debug!("Vector store status error: {:?}", e);
            (false, 0)
        }
    };

    Ok(StatusInfo {
        indexed_count,
        last_updated,
        ingestion_count,
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        vector_store: store.describe(),
        embedding_model: config.embedding.model.clone(),
        generation_model: config.generation.model.clone(),
        vector_store_connected,
        vector_count,
    })
}

/// Ingestion runs, newest first
pub async fn cmd_list_ingestions(db: &MetaDb, limit: usize) -> Result<Vec<IngestionRun>> {
    if limit == 0 {
        return Err(Error::InvalidInput("limit must be positive".to_string()));
    }
    info!("Listing ingestions");
    db.list_ingestions(limit).await
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 mailrag Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("\nIndex:");
    println!("  Emails: {}", status.indexed_count);
    println!(
        "  Last updated: {}",
        status.last_updated.as_deref().unwrap_or("never")
    );
    println!("  Ingestion runs: {}", status.ingestion_count);
    println!("\nVector store: {}", status.vector_store);

    let connection_status = if status.vector_store_connected {
        "✓ Connected"
    } else {
        "✗ Not connected"
    };
    println!("  Status: {}", connection_status);
    println!("  Vectors: {}", status.vector_count);
    if status.vector_store_connected && status.vector_count as i64 != status.indexed_count {
        println!("  ⚠ Vector count differs from email count; run 'mailrag reconcile'");
    }
    println!("\nEmbedding Model: {}", status.embedding_model);
    println!("Generation Model: {}", status.generation_model);
}

/// Print ingestion runs to console
pub fn print_ingestions(runs: &[IngestionRun]) {
    println!("\n📚 Ingestion Runs\n");

    if runs.is_empty() {
        println!("No ingestions yet. Use 'mailrag ingest' or 'mailrag sync' to add mail.");
        return;
    }

    for run in runs {
        println!("• {} [{}]", run.ingestion_id, run.mode);
        println!("  Label: {}", run.label);
        println!("  Emails: {}", run.email_count);
        println!("  Created: {}", run.created_at);
        println!();
    }
}

/// Print ingestion ids with descriptions for shell completions
pub fn print_ingestion_completions(runs: &[IngestionRun], shell: Shell) {
    for run in runs {
        let description = format!(
            "{} ({} emails), Created {}",
            run.label, run.email_count, run.created_at
        )
        .replace('\n', " ");

        match shell {
            Shell::Zsh => {
                let sanitized = description.replace(':', "\\:");
                println!("{}:{}", run.ingestion_id, sanitized);
            }
            Shell::Fish => {
                let sanitized = description.replace('\t', " ");
                println!("{}\t{}", run.ingestion_id, sanitized);
            }
            _ => {
                println!("{}", run.ingestion_id);
            }
        }
    }
}
