//! SQLite schema definition

/// Tables for the mail index. Column additions go in `ADDITIVE_COLUMNS`, never here alone.
pub const SCHEMA_SQL: &str = r#"
-- Emails: one normalized message per provider id
CREATE TABLE IF NOT EXISTS emails (
    message_id TEXT PRIMARY KEY,
    folder_id TEXT,
    subject TEXT,
    sender TEXT,
    received_dt TEXT,
    weblink TEXT,
    content TEXT NOT NULL,
    ingestion_id TEXT,
    ingested_at TEXT
);

-- Ingestions: one row per batch import
CREATE TABLE IF NOT EXISTS ingestions (
    ingestion_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    label TEXT,
    mode TEXT,
    email_count INTEGER DEFAULT 0
);

-- Index metadata: singleton key/value pairs (last_updated)
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT
);
"#;

/// Indexes are created after migration so they can reference added columns
pub const INDEXES_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_emails_ingestion ON emails(ingestion_id);
CREATE INDEX IF NOT EXISTS idx_ingestions_created ON ingestions(created_at);
"#;

/// Nullable columns that older databases may lack: (table, column, declaration)
pub const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    ("emails", "folder_id", "TEXT"),
    ("emails", "subject", "TEXT"),
    ("emails", "sender", "TEXT"),
    ("emails", "received_dt", "TEXT"),
    ("emails", "weblink", "TEXT"),
    ("emails", "ingestion_id", "TEXT"),
    ("emails", "ingested_at", "TEXT"),
    ("ingestions", "label", "TEXT"),
    ("ingestions", "mode", "TEXT"),
    ("ingestions", "email_count", "INTEGER DEFAULT 0"),
];

/// Key under which the last ingest/clear timestamp is stored
pub const LAST_UPDATED_KEY: &str = "last_updated";
