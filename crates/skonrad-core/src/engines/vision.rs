//! Async wrapper around the vision language model.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::models::{Model, ModelKind, ModelManager};

/// Generates a free-form description of an image.
#[derive(Clone)]
pub struct VisionLmEngine {
    manager: Arc<ModelManager>,
}

impl VisionLmEngine {
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self { manager }
    }

    pub async fn describe(&self, path: &Path) -> Result<String> {
        let _lease = self.manager.lease(ModelKind::VisionLm).await;
        let Model::VisionLm(model) = self.manager.get(ModelKind::VisionLm).await? else {
            bail!("vision-lm provider returned a different model kind");
        };
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || model.describe(&path)).await?
    }
}
