//! Async wrapper around the speech transcription model.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::models::{Model, ModelKind, ModelManager};

/// Transcribes speech from an audio or video file.
#[derive(Clone)]
pub struct TranscriptionEngine {
    manager: Arc<ModelManager>,
}

impl TranscriptionEngine {
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self { manager }
    }

    pub async fn transcribe(&self, path: &Path) -> Result<String> {
        let _lease = self.manager.lease(ModelKind::Transcriber).await;
        let Model::Transcriber(model) = self.manager.get(ModelKind::Transcriber).await? else {
            bail!("transcription provider returned a different model kind");
        };
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || model.transcribe(&path)).await?
    }
}
