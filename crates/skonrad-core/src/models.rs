//! Lazy, refcounted lifecycle management for expensive ML models.
//!
//! Models are provided by the embedding application through a provider table
//! keyed by [`ModelKind`]. A model is instantiated (on the blocking pool) the
//! first time it is requested while at least one lease is held, and dropped a
//! grace period after the last lease is released, so bursts of work reuse one
//! instance.
//!
//! A per-language secondary manager is a `ModelManager` built with
//! [`ModelManager::with_primary`]: kinds it has no local provider for are
//! delegated to the primary, which lets languages share GPU-heavy models.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use crate::engines::{
    ClipModel, ImageEmbeddingModel, LemmatizerModel, OcrModel, TextModelWithConfig,
    TranscriptionModel, VisionLmModel,
};

/// Grace period between the last release and model deallocation.
pub const MODEL_CLEANUP_DELAY: Duration = Duration::from_secs(10);

/// Every model kind the system can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Ocr,
    Transcriber,
    TextEmbedding,
    ImageEmbedding,
    Clip,
    Lemmatizer,
    VisionLm,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelKind::Ocr => "ocr",
            ModelKind::Transcriber => "transcriber",
            ModelKind::TextEmbedding => "text-embedding",
            ModelKind::ImageEmbedding => "image-embedding",
            ModelKind::Clip => "clip",
            ModelKind::Lemmatizer => "lemmatizer",
            ModelKind::VisionLm => "vision-lm",
        };
        f.write_str(name)
    }
}

/// A loaded model, tagged by kind.
#[derive(Clone)]
pub enum Model {
    Ocr(Arc<dyn OcrModel>),
    Transcriber(Arc<dyn TranscriptionModel>),
    TextEmbedding(TextModelWithConfig),
    ImageEmbedding(Arc<dyn ImageEmbeddingModel>),
    Clip(Arc<dyn ClipModel>),
    Lemmatizer(Arc<dyn LemmatizerModel>),
    VisionLm(Arc<dyn VisionLmModel>),
}

/// Builds a model instance; runs on the blocking pool.
pub type ModelProvider = Arc<dyn Fn() -> Result<Model> + Send + Sync>;

#[derive(Default)]
struct ModelSlot {
    model: Option<Model>,
    refcount: usize,
}

/// Refcounted model cache with deferred unloading.
pub struct ModelManager {
    providers: HashMap<ModelKind, ModelProvider>,
    slots: HashMap<ModelKind, Arc<Mutex<ModelSlot>>>,
    primary: Option<Arc<ModelManager>>,
    cleanup_delay: Duration,
}

impl ModelManager {
    pub fn new(providers: HashMap<ModelKind, ModelProvider>) -> Self {
        Self::with_cleanup_delay(providers, MODEL_CLEANUP_DELAY)
    }

    pub fn with_cleanup_delay(
        providers: HashMap<ModelKind, ModelProvider>,
        cleanup_delay: Duration,
    ) -> Self {
        let slots = providers
            .keys()
            .map(|&kind| (kind, Arc::new(Mutex::new(ModelSlot::default()))))
            .collect();
        Self {
            providers,
            slots,
            primary: None,
            cleanup_delay,
        }
    }

    /// A secondary manager owning `providers` and delegating every other kind
    /// to `primary`.
    pub fn with_primary(
        providers: HashMap<ModelKind, ModelProvider>,
        primary: Arc<ModelManager>,
    ) -> Self {
        let mut manager = Self::new(providers);
        manager.primary = Some(primary);
        manager
    }

    /// Whether this manager (or its primary) can provide `kind`.
    pub fn supports(&self, kind: ModelKind) -> bool {
        self.providers.contains_key(&kind)
            || self.primary.as_ref().is_some_and(|p| p.supports(kind))
    }

    fn delegate(&self, kind: ModelKind) -> &ModelManager {
        if self.providers.contains_key(&kind) {
            self
        } else if let Some(primary) = &self.primary {
            primary
        } else {
            self
        }
    }

    /// Register usage for the duration of the returned lease. The model is
    /// not loaded until [`get`](Self::get) is called, but once loaded it stays
    /// resident while any lease exists (plus the grace period).
    pub async fn lease(&self, kind: ModelKind) -> ModelLease {
        let target = self.delegate(kind);
        let slot = target.slot(kind);
        slot.lock().await.refcount += 1;
        ModelLease {
            slot,
            kind,
            cleanup_delay: target.cleanup_delay,
        }
    }

    /// Load the model if needed and return it. Callers must hold a lease and
    /// must not keep the model past the lease lifetime.
    pub async fn get(&self, kind: ModelKind) -> Result<Model> {
        let target = self.delegate(kind);
        let provider = target
            .providers
            .get(&kind)
            .with_context(|| format!("no provider registered for model kind {kind}"))?
            .clone();
        let slot = target.slot(kind);
        let mut slot = slot.lock().await;
        if slot.model.is_none() {
            tracing::info!("initializing model: {kind}");
            let model = tokio::task::spawn_blocking(move || provider())
                .await
                .context("model provider task failed")??;
            slot.model = Some(model);
        }
        Ok(slot.model.clone().context("model slot emptied during load")?)
    }

    /// Immediately load the model and keep it resident until the matching
    /// [`release_eager`](Self::release_eager).
    pub async fn require_eager(&self, kind: ModelKind) -> Result<()> {
        let target = self.delegate(kind);
        target.slot(kind).lock().await.refcount += 1;
        self.get(kind).await?;
        Ok(())
    }

    pub async fn release_eager(&self, kind: ModelKind) {
        let target = self.delegate(kind);
        release_slot(target.slot(kind), kind, target.cleanup_delay).await;
    }

    fn slot(&self, kind: ModelKind) -> Arc<Mutex<ModelSlot>> {
        self.slots
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(ModelSlot::default())))
    }
}

/// Scoped usage registration; dropping it schedules the deferred release.
pub struct ModelLease {
    slot: Arc<Mutex<ModelSlot>>,
    kind: ModelKind,
    cleanup_delay: Duration,
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        let slot = Arc::clone(&self.slot);
        let kind = self.kind;
        let delay = self.cleanup_delay;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                release_slot(slot, kind, delay).await;
            });
        }
    }
}

async fn release_slot(slot: Arc<Mutex<ModelSlot>>, kind: ModelKind, delay: Duration) {
    {
        let mut guard = slot.lock().await;
        guard.refcount = guard.refcount.saturating_sub(1);
        if guard.refcount > 0 || guard.model.is_none() {
            return;
        }
    }
    // Free later unless someone reacquired in the meantime.
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let mut guard = slot.lock().await;
        if guard.refcount == 0 && guard.model.is_some() {
            tracing::info!("freeing model: {kind}");
            guard.model = None;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLemmatizer;

    impl LemmatizerModel for CountingLemmatizer {
        fn lemmatize(&self, text: &str) -> Result<Vec<String>> {
            Ok(text.split_whitespace().map(str::to_lowercase).collect())
        }
    }

    fn counting_providers(loads: Arc<AtomicUsize>) -> HashMap<ModelKind, ModelProvider> {
        let mut providers: HashMap<ModelKind, ModelProvider> = HashMap::new();
        providers.insert(
            ModelKind::Lemmatizer,
            Arc::new(move || {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(Model::Lemmatizer(Arc::new(CountingLemmatizer)))
            }),
        );
        providers
    }

    #[tokio::test]
    async fn test_model_loaded_once_while_leased() {
        let loads = Arc::new(AtomicUsize::new(0));
        let manager = ModelManager::new(counting_providers(loads.clone()));

        let _lease = manager.lease(ModelKind::Lemmatizer).await;
        manager.get(ModelKind::Lemmatizer).await.unwrap();
        manager.get(ModelKind::Lemmatizer).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_kind_errors() {
        let manager = ModelManager::new(HashMap::new());
        let _lease = manager.lease(ModelKind::Clip).await;
        assert!(manager.get(ModelKind::Clip).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_freed_after_grace_period() {
        let loads = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(ModelManager::with_cleanup_delay(
            counting_providers(loads.clone()),
            Duration::from_secs(10),
        ));

        manager.require_eager(ModelKind::Lemmatizer).await.unwrap();
        manager.release_eager(ModelKind::Lemmatizer).await;
        tokio::time::sleep(Duration::from_secs(11)).await;

        manager.require_eager(ModelKind::Lemmatizer).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        manager.release_eager(ModelKind::Lemmatizer).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reacquire_within_grace_keeps_model() {
        let loads = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(ModelManager::with_cleanup_delay(
            counting_providers(loads.clone()),
            Duration::from_secs(10),
        ));

        manager.require_eager(ModelKind::Lemmatizer).await.unwrap();
        manager.release_eager(ModelKind::Lemmatizer).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        manager.require_eager(ModelKind::Lemmatizer).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        manager.get(ModelKind::Lemmatizer).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        manager.release_eager(ModelKind::Lemmatizer).await;
    }

    #[tokio::test]
    async fn test_secondary_delegates_missing_kinds() {
        let loads = Arc::new(AtomicUsize::new(0));
        let primary = Arc::new(ModelManager::new(counting_providers(loads.clone())));
        let secondary = ModelManager::with_primary(HashMap::new(), primary.clone());

        let _lease = secondary.lease(ModelKind::Lemmatizer).await;
        secondary.get(ModelKind::Lemmatizer).await.unwrap();
        // the primary hosts the instance
        let _primary_lease = primary.lease(ModelKind::Lemmatizer).await;
        primary.get(ModelKind::Lemmatizer).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(secondary.supports(ModelKind::Lemmatizer));
        assert!(!secondary.supports(ModelKind::Clip));
    }
}
