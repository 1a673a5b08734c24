//! Async wrapper around the image embedding model.

use std::sync::Arc;

use anyhow::{bail, Result};
use image::DynamicImage;

use super::l2_normalized;
use crate::models::{Model, ModelKind, ModelManager};

/// Produces unit-norm visual-similarity embeddings for images.
#[derive(Clone)]
pub struct ImageEmbeddingEngine {
    manager: Arc<ModelManager>,
}

impl ImageEmbeddingEngine {
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self { manager }
    }

    pub async fn embed(&self, image: DynamicImage) -> Result<Vec<f32>> {
        let _lease = self.manager.lease(ModelKind::ImageEmbedding).await;
        let Model::ImageEmbedding(model) = self.manager.get(ModelKind::ImageEmbedding).await?
        else {
            bail!("image embedding provider returned a different model kind");
        };
        let vector = tokio::task::spawn_blocking(move || model.embed(&image)).await??;
        Ok(l2_normalized(vector))
    }
}
