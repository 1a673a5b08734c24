//! Async wrapper around the OCR model.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use super::OcrOutput;
use crate::models::{Model, ModelKind, ModelManager};

/// Runs OCR over an image file, reporting the text and whether the image
/// should be treated as a screenshot.
#[derive(Clone)]
pub struct OcrEngine {
    manager: Arc<ModelManager>,
}

impl OcrEngine {
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self { manager }
    }

    pub async fn run_ocr(&self, path: &Path) -> Result<OcrOutput> {
        let _lease = self.manager.lease(ModelKind::Ocr).await;
        let Model::Ocr(model) = self.manager.get(ModelKind::Ocr).await? else {
            bail!("ocr provider returned a different model kind");
        };
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || model.run_ocr(&path)).await?
    }
}
