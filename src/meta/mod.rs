//! Metadata storage using SQLite
//!
//! This module is the authoritative store for the mail index:
//! - Emails (normalized message records, keyed by provider message id)
//! - Ingestions (one row per batch import, with a recomputed email count)
//! - Index metadata (last updated timestamp)
//!
//! The vector store only ranks; anything shown to a user is read from here.

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::Result;
use crate::normalize::NormalizedEmail;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use tracing::{debug, info};

/// Column list for reading emails; older rows may hold NULL display fields
const EMAIL_COLUMNS: &str = r#"
    message_id,
    folder_id,
    COALESCE(subject, '') AS subject,
    COALESCE(sender, '') AS sender,
    COALESCE(received_dt, '') AS received_dt,
    COALESCE(weblink, '') AS weblink,
    content,
    ingestion_id,
    ingested_at
"#;

const INGESTION_COLUMNS: &str = r#"
    ingestion_id,
    created_at,
    COALESCE(label, '') AS label,
    COALESCE(mode, '') AS mode,
    COALESCE(email_count, 0) AS email_count
"#;

/// An indexed email
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Email {
    pub message_id: String,
    pub folder_id: Option<String>,
    pub subject: String,
    pub sender: String,
    pub received_dt: String,
    pub weblink: String,
    pub content: String,
    pub ingestion_id: Option<String>,
    pub ingested_at: Option<String>,
}

impl Email {
    /// Tag a normalized message with the run that is writing it
    pub fn from_normalized(
        email: NormalizedEmail,
        folder_id: Option<&str>,
        ingestion_id: &str,
        ingested_at: &str,
    ) -> Self {
        Self {
            message_id: email.message_id,
            folder_id: folder_id.map(ToString::to_string).or(email.folder_id),
            subject: email.subject,
            sender: email.sender,
            received_dt: email.received_dt,
            weblink: email.weblink,
            content: email.content,
            ingestion_id: Some(ingestion_id.to_string()),
            ingested_at: Some(ingested_at.to_string()),
        }
    }
}

/// An ingestion run record
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct IngestionRun {
    pub ingestion_id: String,
    pub created_at: String,
    pub label: String,
    pub mode: String,
    pub email_count: i64,
}

impl IngestionRun {
    pub fn new(ingestion_id: String, label: String, mode: String, created_at: String) -> Self {
        Self {
            ingestion_id,
            created_at,
            label,
            mode,
            email_count: 0,
        }
    }
}

/// Row counts removed by a delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRows {
    pub emails: u64,
    pub ingestions: u64,
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    async fn open(db_path: &Path) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Open a database at `db_path`, creating and upgrading the schema as needed
    pub async fn new(db_path: &Path) -> Result<Self> {
        let db = Self::open(db_path).await?;
        db.init_schema().await?;
        Ok(db)
    }

    /// Create missing tables, add missing columns, then build indexes
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        let added = self.migrate().await?;
        if !added.is_empty() {
            info!(columns = ?added, "Upgraded database schema");
        }
        sqlx::query(INDEXES_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Add any nullable columns that an older on-disk schema lacks.
    /// Returns the `table.column` names that were added.
    pub async fn migrate(&self) -> Result<Vec<String>> {
        let mut added = Vec::new();

        for (table, column, decl) in ADDITIVE_COLUMNS {
            let existing: Vec<String> =
                sqlx::query_scalar(&format!("SELECT name FROM pragma_table_info('{}')", table))
                    .fetch_all(&self.pool)
                    .await?;

            if existing.iter().any(|c| c == column) {
                continue;
            }

            debug!(table, column, "Adding column");
            sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))
                .execute(&self.pool)
                .await?;
            added.push(format!("{}.{}", table, column));
        }

        Ok(added)
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='emails'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    // ===== Ingestion Run Operations =====

    /// Register a run if it does not exist yet. An existing run keeps its label and mode.
    /// Returns true when a new row was inserted.
    pub async fn ensure_ingestion(&self, run: &IngestionRun) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO ingestions (ingestion_id, created_at, label, mode, email_count)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT(ingestion_id) DO NOTHING
            "#,
        )
        .bind(&run.ingestion_id)
        .bind(&run.created_at)
        .bind(&run.label)
        .bind(&run.mode)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Get ingestion run by id
    pub async fn get_ingestion(&self, ingestion_id: &str) -> Result<Option<IngestionRun>> {
        let run = sqlx::query_as::<_, IngestionRun>(&format!(
            "SELECT {} FROM ingestions WHERE ingestion_id = ?",
            INGESTION_COLUMNS
        ))
        .bind(ingestion_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    /// List runs, newest first
    pub async fn list_ingestions(&self, limit: usize) -> Result<Vec<IngestionRun>> {
        let runs = sqlx::query_as::<_, IngestionRun>(&format!(
            "SELECT {} FROM ingestions ORDER BY created_at DESC LIMIT ?",
            INGESTION_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    /// Number of recorded runs
    pub async fn count_ingestions(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingestions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Set a run's email_count to the number of rows currently tagged with it
    pub async fn refresh_email_count(&self, ingestion_id: &str) -> Result<i64> {
        let count = self.count_emails_for_ingestion(ingestion_id).await?;
        sqlx::query("UPDATE ingestions SET email_count = ? WHERE ingestion_id = ?")
            .bind(count)
            .bind(ingestion_id)
            .execute(&self.pool)
            .await?;
        Ok(count)
    }

    // ===== Email Operations =====

    /// Insert or replace emails by message id in a single transaction (last write wins)
    pub async fn upsert_emails(&self, emails: &[Email]) -> Result<()> {
        if emails.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for email in emails {
            sqlx::query(
                r#"
                INSERT INTO emails (message_id, folder_id, subject, sender, received_dt, weblink, content, ingestion_id, ingested_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(message_id) DO UPDATE SET
                    folder_id = excluded.folder_id,
                    subject = excluded.subject,
                    sender = excluded.sender,
                    received_dt = excluded.received_dt,
                    weblink = excluded.weblink,
                    content = excluded.content,
                    ingestion_id = excluded.ingestion_id,
                    ingested_at = excluded.ingested_at
                "#,
            )
            .bind(&email.message_id)
            .bind(&email.folder_id)
            .bind(&email.subject)
            .bind(&email.sender)
            .bind(&email.received_dt)
            .bind(&email.weblink)
            .bind(&email.content)
            .bind(&email.ingestion_id)
            .bind(&email.ingested_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = emails.len(), "Upserted emails");
        Ok(())
    }

    /// Get email by message id
    pub async fn get_email(&self, message_id: &str) -> Result<Option<Email>> {
        let email = sqlx::query_as::<_, Email>(&format!(
            "SELECT {} FROM emails WHERE message_id = ?",
            EMAIL_COLUMNS
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(email)
    }

    /// Page through all emails ordered by message id
    pub async fn list_emails(&self, offset: usize, limit: usize) -> Result<Vec<Email>> {
        let emails = sqlx::query_as::<_, Email>(&format!(
            "SELECT {} FROM emails ORDER BY message_id LIMIT ? OFFSET ?",
            EMAIL_COLUMNS
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(emails)
    }

    /// Total indexed emails
    pub async fn count_emails(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emails")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Emails currently tagged with a run
    pub async fn count_emails_for_ingestion(&self, ingestion_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emails WHERE ingestion_id = ?")
            .bind(ingestion_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Message ids currently tagged with a run
    pub async fn message_ids_for_ingestion(&self, ingestion_id: &str) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT message_id FROM emails WHERE ingestion_id = ?")
                .bind(ingestion_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    /// All message ids (for orphan detection)
    pub async fn list_all_message_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT message_id FROM emails")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    // ===== Deletion =====

    /// Delete every email and run row
    pub async fn clear_all(&self) -> Result<DeletedRows> {
        let mut tx = self.pool.begin().await?;
        let emails = sqlx::query("DELETE FROM emails")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let ingestions = sqlx::query("DELETE FROM ingestions")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(DeletedRows { emails, ingestions })
    }

    /// Delete the emails tagged with a run, and the run itself
    pub async fn delete_ingestion(&self, ingestion_id: &str) -> Result<DeletedRows> {
        let mut tx = self.pool.begin().await?;
        let emails = sqlx::query("DELETE FROM emails WHERE ingestion_id = ?")
            .bind(ingestion_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let ingestions = sqlx::query("DELETE FROM ingestions WHERE ingestion_id = ?")
            .bind(ingestion_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(DeletedRows { emails, ingestions })
    }

    // ===== Index Metadata =====

    /// Upsert a metadata value
    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read a metadata value
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.flatten())
    }

    /// Record `timestamp` as the last index change
    pub async fn set_last_updated(&self, timestamp: &str) -> Result<()> {
        self.set_meta(LAST_UPDATED_KEY, timestamp).await
    }

    /// Timestamp of the last ingest or clear, if any
    pub async fn last_updated(&self) -> Result<Option<String>> {
        self.get_meta(LAST_UPDATED_KEY).await
    }
}

/// Current time in the format stored in every timestamp column
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}
