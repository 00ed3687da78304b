//! Vector store integration
//!
//! This module defines the seam between the pipelines and the nearest-neighbor
//! index:
//! - `VectorStore` trait keyed by message id
//! - `QdrantStore` for production use
//! - `MemoryVectorStore` for tests and dry runs
//!
//! Stores rank; they never hold display data.

mod memory;
mod payload;
mod qdrant;

pub use memory::MemoryVectorStore;
pub use payload::*;
pub use qdrant::QdrantStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A nearest-neighbor hit. Lower distance is more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub message_id: String,
    pub distance: f32,
}

/// Result of a best-effort vector deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeletionOutcome {
    Deleted,
    Unsupported,
    Failed { reason: String },
}

impl DeletionOutcome {
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeletionOutcome::Deleted)
    }
}

impl std::fmt::Display for DeletionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeletionOutcome::Deleted => write!(f, "deleted"),
            DeletionOutcome::Unsupported => write!(f, "unsupported by store"),
            DeletionOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// What a store can do natively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStoreCapabilities {
    /// Keyed insert-or-replace
    pub upsert: bool,
    /// Delete individual vectors by id
    pub delete_by_id: bool,
}

impl Default for VectorStoreCapabilities {
    fn default() -> Self {
        Self {
            upsert: true,
            delete_by_id: true,
        }
    }
}

/// Persistent nearest-neighbor collection keyed by message id
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Native capabilities of this store
    fn capabilities(&self) -> VectorStoreCapabilities;

    /// Human readable location (for status output)
    fn describe(&self) -> String;

    /// Insert or replace vectors by message id
    async fn upsert(&self, vectors: Vec<EmailVector>) -> Result<()>;

    /// Add vectors whose ids are not present yet
    async fn insert(&self, vectors: Vec<EmailVector>) -> Result<()>;

    /// Drop and recreate an empty collection
    async fn recreate(&self) -> Result<()>;

    /// Nearest neighbors of `vector`, closest first
    async fn query(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<VectorHit>>;

    /// Best-effort removal of the given message ids
    async fn delete_ids(&self, message_ids: &[String]) -> DeletionOutcome;

    /// Best-effort removal of the whole collection
    async fn delete_collection(&self) -> DeletionOutcome;

    /// Number of stored vectors (0 when the collection does not exist)
    async fn count(&self) -> Result<u64>;

    /// All stored message ids
    async fn list_ids(&self) -> Result<Vec<String>>;
}

/// Cosine distance between two vectors (1 - cosine similarity)
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_deletion_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(DeletionOutcome::Failed {
            reason: "offline".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "offline");
        assert_eq!(
            serde_json::to_value(DeletionOutcome::Deleted).unwrap()["status"],
            "deleted"
        );
    }
}
