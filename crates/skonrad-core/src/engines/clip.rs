//! Async wrapper around the CLIP joint text-image model.

use std::sync::Arc;

use anyhow::{bail, Result};
use image::DynamicImage;

use super::l2_normalized;
use crate::models::{Model, ModelKind, ModelManager};

/// Produces unit-norm CLIP embeddings; text and image vectors are comparable.
#[derive(Clone)]
pub struct ClipEngine {
    manager: Arc<ModelManager>,
}

impl ClipEngine {
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self { manager }
    }

    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let _lease = self.manager.lease(ModelKind::Clip).await;
        let model = self.clip_model().await?;
        let text = text.to_string();
        let vector = tokio::task::spawn_blocking(move || model.embed_text(&text)).await??;
        Ok(l2_normalized(vector))
    }

    pub async fn embed_image(&self, image: DynamicImage) -> Result<Vec<f32>> {
        let _lease = self.manager.lease(ModelKind::Clip).await;
        let model = self.clip_model().await?;
        let vector = tokio::task::spawn_blocking(move || model.embed_image(&image)).await??;
        Ok(l2_normalized(vector))
    }

    async fn clip_model(&self) -> Result<Arc<dyn super::ClipModel>> {
        match self.manager.get(ModelKind::Clip).await? {
            Model::Clip(model) => Ok(model),
            _ => bail!("clip provider returned a different model kind"),
        }
    }
}
