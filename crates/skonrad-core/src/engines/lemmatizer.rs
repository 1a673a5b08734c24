//! Async wrapper around the lemmatizer model.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::models::{Model, ModelKind, ModelManager};

/// Lemmatizes text into ordered lowercase tokens, splitting compound lemmas
/// on whitespace.
#[derive(Clone)]
pub struct LemmatizerEngine {
    manager: Arc<ModelManager>,
}

impl LemmatizerEngine {
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self { manager }
    }

    pub async fn lemmatize(&self, text: &str) -> Result<Vec<String>> {
        let _lease = self.manager.lease(ModelKind::Lemmatizer).await;
        let Model::Lemmatizer(model) = self.manager.get(ModelKind::Lemmatizer).await? else {
            bail!("lemmatizer provider returned a different model kind");
        };
        let text = text.to_string();
        let lemmas = tokio::task::spawn_blocking(move || model.lemmatize(&text)).await??;
        Ok(lemmas
            .iter()
            .flat_map(|lemma| lemma.split_whitespace())
            .map(str::to_lowercase)
            .collect())
    }
}
