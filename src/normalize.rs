//! Provider message normalization
//!
//! Turns loosely typed Graph message JSON into the canonical record that is
//! stored and embedded. Records without a usable id are dropped, never fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A provider message reduced to the fields the index keeps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEmail {
    pub message_id: String,
    /// `parentFolderId` when the provider includes it
    pub folder_id: Option<String>,
    pub subject: String,
    pub sender: String,
    pub received_dt: String,
    pub weblink: String,
    pub body_preview: String,
    /// Embedded text: header lines plus body preview
    pub content: String,
}

/// Normalize one raw message. Returns `None` when it has no usable id.
pub fn normalize_message(raw: &Value) -> Option<NormalizedEmail> {
    let Some(obj) = raw.as_object() else {
        debug!("Skipping non-object message record");
        return None;
    };

    let message_id = match obj.get("id").and_then(Value::as_str) {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => {
            debug!("Skipping message record without id");
            return None;
        }
    };

    let subject = str_field(raw, &["subject"]);
    let body_preview = str_field(raw, &["bodyPreview"]);
    let weblink = str_field(raw, &["webLink"]);
    let received_dt = str_field(raw, &["receivedDateTime"]);

    let mut sender = str_field(raw, &["from", "emailAddress", "address"]);
    if sender.is_empty() {
        sender = str_field(raw, &["from", "emailAddress", "name"]);
    }

    let folder_id = Some(str_field(raw, &["parentFolderId"])).filter(|f| !f.is_empty());

    let content = format!(
        "Subject: {}\nFrom: {}\nReceived: {}\n\n{}",
        subject, sender, received_dt, body_preview
    )
    .trim()
    .to_string();

    Some(NormalizedEmail {
        message_id,
        folder_id,
        subject,
        sender,
        received_dt,
        weblink,
        body_preview,
        content,
    })
}

/// Normalize a batch, preserving order and dropping records without an id
pub fn normalize_batch(raw: &[Value]) -> Vec<NormalizedEmail> {
    let emails: Vec<NormalizedEmail> = raw.iter().filter_map(normalize_message).collect();
    let dropped = raw.len() - emails.len();
    if dropped > 0 {
        debug!(dropped, kept = emails.len(), "Dropped messages without id");
    }
    emails
}

/// Walk a nested path of object keys; anything missing, null or non-string is empty
fn str_field(value: &Value, path: &[&str]) -> String {
    let mut current = value;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    current.as_str().unwrap_or_default().to_string()
}
