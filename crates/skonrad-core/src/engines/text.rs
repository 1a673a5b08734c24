//! Async wrapper around the text embedding model.

use std::sync::Arc;

use anyhow::{bail, Result};

use super::{l2_normalized, TextEmbeddingModel};
use crate::models::{Model, ModelKind, ModelManager};

/// A text embedding model together with its language-specific affixes:
/// queries are prefixed, passages are suffixed before encoding.
#[derive(Clone)]
pub struct TextModelWithConfig {
    pub model: Arc<dyn TextEmbeddingModel>,
    pub query_prefix: String,
    pub passage_suffix: String,
}

/// Produces unit-norm text embeddings with separate query/passage encoders.
#[derive(Clone)]
pub struct TextEmbeddingEngine {
    manager: Arc<ModelManager>,
}

impl TextEmbeddingEngine {
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self { manager }
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, true).await
    }

    pub async fn embed_passage(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, false).await
    }

    async fn embed(&self, text: &str, is_query: bool) -> Result<Vec<f32>> {
        let _lease = self.manager.lease(ModelKind::TextEmbedding).await;
        let Model::TextEmbedding(config) = self.manager.get(ModelKind::TextEmbedding).await?
        else {
            bail!("text embedding provider returned a different model kind");
        };
        let text = if is_query {
            format!("{}{}", config.query_prefix, text)
        } else {
            format!("{}{}", text, config.passage_suffix)
        };
        let vector = tokio::task::spawn_blocking(move || config.model.embed(&text)).await??;
        Ok(l2_normalized(vector))
    }
}
