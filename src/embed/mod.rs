//! Embedding generation
//!
//! This module provides an abstraction over embedding models with:
//! - A trait for different embedding backends
//! - Local FastEmbed backend (feature `local-embed`)
//! - HTTP embedding sidecar backend
//! - Batch processing for efficiency

#[cfg(feature = "local-embed")]
mod fastembed_impl;
mod http_backend;

#[cfg(feature = "local-embed")]
pub use fastembed_impl::*;
pub use http_backend::*;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Scale a vector to unit length (zero vectors are returned unchanged)
pub fn normalize_embedding(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. Output has the same length and order as the input.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.backend.as_str() {
        "http" => Ok(Box::new(HttpEmbedder::new(config)?)),
        "local" => local_embedder(config),
        other => Err(Error::Config(format!(
            "Unsupported embedding backend '{}'",
            other
        ))),
    }
}

#[cfg(feature = "local-embed")]
fn local_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    Ok(Box::new(FastEmbedder::new(config)?))
}

#[cfg(not(feature = "local-embed"))]
fn local_embedder(_config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    Err(Error::Config(
        "embedding.backend = \"local\" needs the 'local-embed' feature; rebuild with it or use backend = \"http\"".to_string(),
    ))
}

/// Embed texts as one oracle call and check the result shape.
///
/// The count must match the input and every vector is L2-normalized,
/// whatever the backend claims.
pub async fn embed_checked(embedder: &dyn Embedder, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
    let expected = texts.len();
    if expected == 0 {
        return Ok(Vec::new());
    }

    let embeddings = embedder.embed(texts).await?;
    if embeddings.len() != expected {
        return Err(Error::Embedding(format!(
            "Embedder '{}' returned {} vectors for {} inputs",
            embedder.model_name(),
            embeddings.len(),
            expected
        )));
    }

    Ok(embeddings.iter().map(|v| normalize_embedding(v)).collect())
}

/// Helper to embed in batches
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: Vec<String>,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(batch_size.max(1)) {
        let embeddings = embed_checked(embedder, chunk.to_vec()).await?;
        all_embeddings.extend(embeddings);
    }

    Ok(all_embeddings)
}
