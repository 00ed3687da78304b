//! In-process brute-force vector store

use super::payload::EmailVector;
use super::{cosine_distance, DeletionOutcome, VectorHit, VectorStore, VectorStoreCapabilities};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    vector: Vec<f32>,
    ingestion_id: Option<String>,
}

/// Exact nearest-neighbor search over vectors held in memory.
///
/// Capabilities can be narrowed to exercise the degraded code paths of
/// stores that cannot upsert or delete by id. `set_unavailable` makes every
/// write and delete fail the way an unreachable backend would.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    entries: RwLock<BTreeMap<String, Entry>>,
    capabilities: VectorStoreCapabilities,
    unavailable: AtomicBool,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(capabilities: VectorStoreCapabilities) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capabilities,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Toggle simulated backend outage for writes and deletes
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Qdrant("in-memory store unavailable".to_string()));
        }
        Ok(())
    }

    /// Stored vector for a message id
    pub async fn get(&self, message_id: &str) -> Option<Vec<f32>> {
        self.entries
            .read()
            .await
            .get(message_id)
            .map(|e| e.vector.clone())
    }

    /// Ingestion run recorded with a stored vector
    pub async fn ingestion_of(&self, message_id: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .get(message_id)
            .and_then(|e| e.ingestion_id.clone())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn capabilities(&self) -> VectorStoreCapabilities {
        self.capabilities
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }

    async fn upsert(&self, vectors: Vec<EmailVector>) -> Result<()> {
        self.check_available()?;
        if !self.capabilities.upsert {
            return Err(Error::Other(
                "vector store does not support upsert".to_string(),
            ));
        }

        let mut entries = self.entries.write().await;
        for v in vectors {
            entries.insert(
                v.message_id,
                Entry {
                    vector: v.vector,
                    ingestion_id: v.ingestion_id,
                },
            );
        }
        Ok(())
    }

    async fn insert(&self, vectors: Vec<EmailVector>) -> Result<()> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        if let Some(dup) = vectors.iter().find(|v| entries.contains_key(&v.message_id)) {
            return Err(Error::Other(format!(
                "vector id already exists: {}",
                dup.message_id
            )));
        }
        for v in vectors {
            entries.insert(
                v.message_id,
                Entry {
                    vector: v.vector,
                    ingestion_id: v.ingestion_id,
                },
            );
        }
        Ok(())
    }

    async fn recreate(&self) -> Result<()> {
        self.check_available()?;
        self.entries.write().await.clear();
        Ok(())
    }

    async fn query(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<VectorHit>> {
        let entries = self.entries.read().await;
        let mut hits: Vec<VectorHit> = entries
            .iter()
            .map(|(id, e)| VectorHit {
                message_id: id.clone(),
                distance: cosine_distance(&vector, &e.vector),
            })
            .collect();

        // Stable on ties: BTreeMap iteration order is by id
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        debug!(hits = hits.len(), "In-memory query");
        Ok(hits)
    }

    async fn delete_ids(&self, message_ids: &[String]) -> DeletionOutcome {
        if !self.capabilities.delete_by_id {
            return DeletionOutcome::Unsupported;
        }
        if let Err(e) = self.check_available() {
            return DeletionOutcome::Failed {
                reason: e.to_string(),
            };
        }

        let mut entries = self.entries.write().await;
        for id in message_ids {
            entries.remove(id);
        }
        DeletionOutcome::Deleted
    }

    async fn delete_collection(&self) -> DeletionOutcome {
        if let Err(e) = self.check_available() {
            return DeletionOutcome::Failed {
                reason: e.to_string(),
            };
        }
        self.entries.write().await.clear();
        DeletionOutcome::Deleted
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.read().await.len() as u64)
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: &str, vector: Vec<f32>) -> EmailVector {
        EmailVector::new(id.to_string(), vector, None)
    }

    #[tokio::test]
    async fn test_query_orders_by_distance() {
        let store = MemoryVectorStore::new();
        store
            .upsert(vec![
                v("far", vec![0.0, 1.0]),
                v("near", vec![1.0, 0.1]),
                v("exact", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(vec![1.0, 0.0], 2).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.message_id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_vector() {
        let store = MemoryVectorStore::new();
        store.upsert(vec![v("m1", vec![1.0, 0.0])]).await.unwrap();
        store.upsert(vec![v("m1", vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get("m1").await, Some(vec![0.0, 1.0]));
    }

    #[tokio::test]
    async fn test_insert_rejects_existing_id() {
        let store = MemoryVectorStore::new();
        store.insert(vec![v("m1", vec![1.0])]).await.unwrap();
        assert!(store.insert(vec![v("m1", vec![1.0])]).await.is_err());
    }

    #[tokio::test]
    async fn test_narrowed_capabilities() {
        let store = MemoryVectorStore::with_capabilities(VectorStoreCapabilities {
            upsert: false,
            delete_by_id: false,
        });

        assert!(store.upsert(vec![v("m1", vec![1.0])]).await.is_err());
        store.insert(vec![v("m1", vec![1.0])]).await.unwrap();
        assert_eq!(
            store.delete_ids(&["m1".to_string()]).await,
            DeletionOutcome::Unsupported
        );
        assert_eq!(store.count().await.unwrap(), 1);

        assert!(store.delete_collection().await.is_deleted());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_writes_and_deletes() {
        let store = MemoryVectorStore::new();
        store.upsert(vec![v("m1", vec![1.0])]).await.unwrap();
        store.set_unavailable(true);

        assert!(matches!(
            store.upsert(vec![v("m2", vec![1.0])]).await,
            Err(Error::Qdrant(_))
        ));
        assert!(matches!(
            store.delete_ids(&["m1".to_string()]).await,
            DeletionOutcome::Failed { .. }
        ));
        assert!(matches!(
            store.delete_collection().await,
            DeletionOutcome::Failed { .. }
        ));
        // Reads still work and nothing was removed
        assert_eq!(store.list_ids().await.unwrap(), vec!["m1"]);

        store.set_unavailable(false);
        assert!(store.delete_collection().await.is_deleted());
    }
}
