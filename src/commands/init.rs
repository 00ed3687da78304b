//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use crate::store::QdrantStore;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    /// Overwrite an existing config with defaults
    pub force: bool,
    /// Try to create the Qdrant collection now
    pub create_collection: bool,
}

/// Paths written by init
#[derive(Debug, Clone, Serialize)]
pub struct InitOutcome {
    pub base_dir: PathBuf,
    pub config_file: PathBuf,
    pub db_file: PathBuf,
    pub qdrant_dir: PathBuf,
    /// Collection exists and matches the embedding dimension
    pub collection_ready: bool,
}

/// Initialize mailrag configuration and database
pub async fn cmd_init(options: InitOptions) -> Result<InitOutcome> {
    let mut config = Config::default();
    config.init_paths(Some(options.base_dir.clone()));

    if config.paths.config_file.exists() && !options.force {
        return Err(Error::AlreadyInitialized(
            config.paths.base_dir.display().to_string(),
        ));
    }

    config.validate()?;
    config.save()?;
    info!("Created config at {:?}", config.paths.config_file);

    std::fs::create_dir_all(&config.paths.qdrant_dir)?;

    let db = MetaDb::connect(&config).await?;
    db.init_schema().await?;
    info!("Created database at {:?}", config.paths.db_file);

    let mut collection_ready = false;
    if options.create_collection {
        match QdrantStore::connect(&config).await {
            Ok(store) => match store.ensure_collection().await {
                Ok(()) => {
                    info!("Qdrant collection '{}' ready", config.collection_name);
                    collection_ready = true;
                }
                Err(e) => warn!(
                    "Could not create Qdrant collection: {}. It will be created on first ingest.",
                    e
                ),
            },
            Err(e) => warn!(
                "Could not connect to Qdrant at {}: {}. Make sure Qdrant is running.",
                config.qdrant_url, e
            ),
        }
    }

    Ok(InitOutcome {
        base_dir: config.paths.base_dir.clone(),
        config_file: config.paths.config_file.clone(),
        db_file: config.paths.db_file.clone(),
        qdrant_dir: config.paths.qdrant_dir.clone(),
        collection_ready,
    })
}

/// Print init outcome to console
pub fn print_init_outcome(outcome: &InitOutcome) {
    println!("✓ Initialized mailrag at {:?}", outcome.base_dir);
    println!("\nConfiguration: {:?}", outcome.config_file);
    println!("Database: {:?}", outcome.db_file);

    if !outcome.collection_ready {
        println!("\nQdrant is not reachable. To run it with storage under the data directory:");
        println!(
            "  docker run -p 6333:6333 -p 6334:6334 -v {}:/qdrant/storage qdrant/qdrant",
            outcome.qdrant_dir.display()
        );
    }

    println!("\nNext steps:");
    println!("  mailrag ingest messages.json             # Index exported Graph messages");
    println!("  mailrag sync --folder inbox --limit 200  # Pull mail (token from MAILRAG_GRAPH_TOKEN)");
    println!("  mailrag ask \"when is the invoice due?\"   # Ask a question");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(dir: &TempDir, force: bool) -> InitOptions {
        InitOptions {
            base_dir: dir.path().to_path_buf(),
            force,
            create_collection: false,
        }
    }

    #[tokio::test]
    async fn test_init_writes_config_and_database() {
        let tmp = TempDir::new().unwrap();
        let outcome = cmd_init(options(&tmp, false)).await.unwrap();

        assert!(outcome.config_file.exists());
        assert!(outcome.db_file.exists());
        assert!(outcome.qdrant_dir.is_dir());
        assert!(!outcome.collection_ready);

        let config = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert!(config.is_initialized());
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite_without_force() {
        let tmp = TempDir::new().unwrap();
        cmd_init(options(&tmp, false)).await.unwrap();

        let err = cmd_init(options(&tmp, false)).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized(_)));

        assert!(cmd_init(options(&tmp, true)).await.is_ok());
    }
}
