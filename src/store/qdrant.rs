//! Qdrant vector database integration

use super::payload::{point_id_for, point_id_to_string, EmailPayload, EmailVector};
use super::{DeletionOutcome, VectorHit, VectorStore, VectorStoreCapabilities};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, DeletePointsBuilder, Distance, GetCollectionInfoResponse, PointId,
    PointStruct, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::{debug, info, warn};

/// Qdrant store handle
pub struct QdrantStore {
    client: Qdrant,
    url: String,
    collection: String,
    dimension: usize,
}

impl QdrantStore {
    /// Connect to Qdrant using config
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(
            &config.qdrant_url,
            &config.collection_name,
            config.embedding.resolved_dimension(),
        )
        .await
    }

    /// Create a new store connection directly with URL and collection name
    pub async fn new(url: &str, collection: &str, dimension: usize) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            collection: collection.to_string(),
            dimension,
        })
    }

    /// Get the expected vector dimension for this store
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Check if the collection exists
    pub async fn collection_exists(&self) -> Result<bool> {
        let exists = self.client.collection_exists(&self.collection).await?;
        Ok(exists)
    }

    /// Ensure the collection exists with correct configuration
    pub async fn ensure_collection(&self) -> Result<()> {
        if self.collection_exists().await? {
            debug!("Collection {} already exists", self.collection);

            let info = self.client.collection_info(&self.collection).await?;
            if let Some(size) = extract_vector_size(&info) {
                if size as usize != self.dimension {
                    return Err(Error::Qdrant(format!(
                        "Collection '{}' has vector size {}, but the embedding model produces {}. Remediation: set a new collection name or run 'mailrag reindex' after 'mailrag clear'.",
                        self.collection, size, self.dimension
                    )));
                }
            }
            return Ok(());
        }

        info!(
            "Creating collection {} with dimension {}",
            self.collection, self.dimension
        );

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(
                    VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
                ),
            )
            .await?;

        info!("Collection {} created successfully", self.collection);
        Ok(())
    }

    fn to_points(&self, vectors: Vec<EmailVector>) -> Result<Vec<PointStruct>> {
        if let Some(mismatch) = vectors.iter().find(|v| v.vector.len() != self.dimension) {
            return Err(Error::Qdrant(format!(
                "Vector dimension mismatch for collection '{}': expected {} (got {})",
                self.collection,
                self.dimension,
                mismatch.vector.len()
            )));
        }
        Ok(vectors.into_iter().map(EmailVector::to_point_struct).collect())
    }

    async fn write_points(&self, vectors: Vec<EmailVector>) -> Result<()> {
        if vectors.is_empty() {
            return Ok(());
        }

        let points = self.to_points(vectors)?;
        self.ensure_collection().await?;

        debug!(
            "Upserting {} points to collection {}",
            points.len(),
            self.collection
        );

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await?;
        Ok(())
    }

    async fn try_delete_ids(&self, message_ids: &[String]) -> Result<()> {
        if message_ids.is_empty() || !self.collection_exists().await? {
            return Ok(());
        }

        debug!(
            "Deleting {} points from collection {}",
            message_ids.len(),
            self.collection
        );

        let ids: Vec<PointId> = message_ids
            .iter()
            .map(|id| PointId::from(point_id_for(id).to_string()))
            .collect();

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(ids)
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    async fn try_delete_collection(&self) -> Result<()> {
        if !self.collection_exists().await? {
            debug!("Collection {} does not exist, nothing to delete", self.collection);
            return Ok(());
        }

        info!("Deleting collection {}", self.collection);
        self.client.delete_collection(&self.collection).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn capabilities(&self) -> VectorStoreCapabilities {
        VectorStoreCapabilities {
            upsert: true,
            delete_by_id: true,
        }
    }

    fn describe(&self) -> String {
        format!("qdrant {} (collection {})", self.url, self.collection)
    }

    async fn upsert(&self, vectors: Vec<EmailVector>) -> Result<()> {
        self.write_points(vectors).await
    }

    async fn insert(&self, vectors: Vec<EmailVector>) -> Result<()> {
        // Qdrant has no insert-only write; ids are fresh after a recreate
        self.write_points(vectors).await
    }

    async fn recreate(&self) -> Result<()> {
        if self.collection_exists().await? {
            info!("Deleting existing collection {}", self.collection);
            self.client.delete_collection(&self.collection).await?;
        }
        self.ensure_collection().await
    }

    async fn query(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<VectorHit>> {
        if limit == 0 || !self.collection_exists().await? {
            return Ok(Vec::new());
        }

        debug!(
            "Searching collection {} with limit {}",
            self.collection, limit
        );

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector, limit as u64).with_payload(true),
            )
            .await?;

        let hits = response
            .result
            .into_iter()
            .filter_map(|p| {
                let point_id = point_id_to_string(p.id);
                let payload = EmailPayload::from_qdrant_payload(p.payload);
                if payload.message_id.is_empty() {
                    debug!(point_id, "Skipping point without message_id payload");
                    return None;
                }
                Some(VectorHit {
                    message_id: payload.message_id,
                    // Qdrant reports cosine similarity
                    distance: 1.0 - p.score,
                })
            })
            .collect();

        Ok(hits)
    }

    async fn delete_ids(&self, message_ids: &[String]) -> DeletionOutcome {
        match self.try_delete_ids(message_ids).await {
            Ok(()) => DeletionOutcome::Deleted,
            Err(e) => {
                warn!(error = %e, count = message_ids.len(), "Vector deletion failed");
                DeletionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn delete_collection(&self) -> DeletionOutcome {
        match self.try_delete_collection().await {
            Ok(()) => DeletionOutcome::Deleted,
            Err(e) => {
                warn!(error = %e, collection = %self.collection, "Collection deletion failed");
                DeletionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn count(&self) -> Result<u64> {
        if !self.collection_exists().await? {
            return Ok(0);
        }

        let info = self.client.collection_info(&self.collection).await?;
        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0))
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        if !self.collection_exists().await? {
            return Ok(Vec::new());
        }

        let mut all_ids = Vec::new();
        let mut offset: Option<PointId> = None;
        let batch_size = 1000u32;

        loop {
            let mut scroll_builder = ScrollPointsBuilder::new(&self.collection)
                .limit(batch_size)
                .with_payload(true)
                .with_vectors(false);

            if let Some(ref o) = offset {
                scroll_builder = scroll_builder.offset(o.clone());
            }

            let response = self.client.scroll(scroll_builder).await?;

            let points = response.result;
            if points.is_empty() {
                break;
            }

            for point in points {
                let payload = EmailPayload::from_qdrant_payload(point.payload);
                if payload.message_id.is_empty() {
                    debug!(
                        point_id = point_id_to_string(point.id),
                        "Point has no message_id payload"
                    );
                    continue;
                }
                all_ids.push(payload.message_id);
            }

            offset = response.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        Ok(all_ids)
    }
}

fn extract_vector_size(info: &GetCollectionInfoResponse) -> Option<u64> {
    let result = info.result.as_ref()?;
    let config = result.config.as_ref()?;
    let params = config.params.as_ref()?;
    let vectors_config = params.vectors_config.as_ref()?;

    match vectors_config.config.as_ref()? {
        qdrant_client::qdrant::vectors_config::Config::Params(params) => Some(params.size),
        qdrant_client::qdrant::vectors_config::Config::ParamsMap(_) => None,
    }
}
