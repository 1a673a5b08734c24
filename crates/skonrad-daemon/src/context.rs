//! Per-directory lifecycle: initialization, incremental file events, and the
//! registry of live directories.
//!
//! Initialization order matters: the watcher starts first so nothing is
//! missed (events queue until init completes), then rows are reconciled with
//! the directory, OCR/transcription/vision-LM sweeps fill missing analysis,
//! the lexical engines are built, embeddings are reconciled, and finally the
//! queued events drain in arrival order.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use skonrad_core::{
    ClipEngine, DirectoryRecord, DirectoryRegistry, EmbeddingPersistor, EmbeddingProcessor,
    FileStore, FileType, ImageEmbeddingEngine, LemmatizerEngine, LexicalSearchEngine,
    LexicalSearchEngineInitializer, MetadataEditor, ModelKind, ModelManager, OcrEngine,
    SearchIndexes, SearchService, TextEmbeddingEngine, TranscriptionEngine, VideoProber,
    VisionLmEngine,
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::analysis::{OcrService, TranscriptionService, VisionLmService};
use crate::indexer::FileIndexer;
use crate::thumbnails::ThumbnailManager;
use crate::watcher::{DirectoryWatcher, FileEvent};

/// Interval for polling debounced file system events.
const WATCHER_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct EventGate {
    ready: bool,
    queue: Vec<FileEvent>,
}

/// One registered directory: its store, indexes, analysis services and
/// watcher.
pub struct DirectoryContext {
    name: String,
    root_dir: PathBuf,
    model_manager: Arc<ModelManager>,
    store: Arc<FileStore>,
    indexes: Arc<RwLock<SearchIndexes>>,
    search_service: SearchService,
    metadata_editor: MetadataEditor,
    thumbnails: ThumbnailManager,
    ocr: OcrService,
    transcription: TranscriptionService,
    vision: VisionLmService,
    prober: Arc<dyn VideoProber>,
    preload_thumbnails: bool,
    gate: Mutex<EventGate>,
    init_lock: Mutex<()>,
    watcher_task: Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryContext {
    pub fn new(
        name: &str,
        root_dir: &Path,
        model_manager: Arc<ModelManager>,
        prober: Arc<dyn VideoProber>,
        preload_thumbnails: bool,
    ) -> Result<Self> {
        let store = Arc::new(FileStore::open_in_directory(root_dir)?);
        let lemmatizer = LemmatizerEngine::new(model_manager.clone());
        let embeddings = EmbeddingProcessor::new(
            root_dir.to_path_buf(),
            EmbeddingPersistor::new(root_dir)?,
            TextEmbeddingEngine::new(model_manager.clone()),
            ImageEmbeddingEngine::new(model_manager.clone()),
            ClipEngine::new(model_manager.clone()),
            prober.clone(),
        );
        let indexes = Arc::new(RwLock::new(SearchIndexes {
            description_lexical: LexicalSearchEngine::new(lemmatizer.clone()),
            ocr_lexical: LexicalSearchEngine::new(lemmatizer.clone()),
            transcript_lexical: LexicalSearchEngine::new(lemmatizer),
            embeddings,
        }));

        Ok(Self {
            name: name.to_string(),
            root_dir: root_dir.to_path_buf(),
            store: store.clone(),
            search_service: SearchService::new(store.clone(), indexes.clone()),
            metadata_editor: MetadataEditor::new(store.clone(), indexes.clone()),
            thumbnails: ThumbnailManager::new(root_dir, prober.clone())?,
            ocr: OcrService::new(
                root_dir.to_path_buf(),
                store.clone(),
                OcrEngine::new(model_manager.clone()),
            ),
            transcription: TranscriptionService::new(
                root_dir.to_path_buf(),
                store.clone(),
                TranscriptionEngine::new(model_manager.clone()),
            ),
            vision: VisionLmService::new(
                root_dir.to_path_buf(),
                store,
                VisionLmEngine::new(model_manager.clone()),
            ),
            indexes,
            model_manager,
            prober,
            preload_thumbnails,
            gate: Mutex::new(EventGate::default()),
            init_lock: Mutex::new(()),
            watcher_task: Mutex::new(None),
        })
    }

    /// Run the full initialization pipeline and drain queued events.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        let _init = self.init_lock.lock().await;
        tracing::info!("initializing directory {} at {}", self.name, self.root_dir.display());

        self.start_watcher().await?;

        let indexer = FileIndexer::new(&self.root_dir, &self.store, self.prober.as_ref());
        indexer.ensure_directory_initialized().await?;

        tracing::info!("initializing OCR for directory {}", self.name);
        self.ocr.init_ocrs().await?;

        tracing::info!("initializing transcriptions for directory {}", self.name);
        self.transcription.init_transcriptions(false).await?;

        if self.model_manager.supports(ModelKind::VisionLm) {
            tracing::info!("initializing vision-LM descriptions for directory {}", self.name);
            self.vision.init_descriptions().await?;
        }

        tracing::info!("initializing lexical search engines for directory {}", self.name);
        let mut initializer =
            LexicalSearchEngineInitializer::new(LemmatizerEngine::new(self.model_manager.clone()));
        initializer.init_search_engines(&self.store).await?;

        tracing::info!("initializing embeddings for directory {}", self.name);
        {
            let mut indexes = self.indexes.write().await;
            indexes.description_lexical = initializer.description_engine;
            indexes.ocr_lexical = initializer.ocr_text_engine;
            indexes.transcript_lexical = initializer.transcript_engine;

            let _text = self.model_manager.lease(ModelKind::TextEmbedding).await;
            let _image = self.model_manager.lease(ModelKind::ImageEmbedding).await;
            let _clip = self.model_manager.lease(ModelKind::Clip).await;
            indexes.embeddings.init_embeddings(&self.store).await?;
        }

        if self.preload_thumbnails {
            tracing::info!("preloading thumbnails for directory {}", self.name);
            self.thumbnails
                .preload_thumbnails(&self.store.load_all_files()?)
                .await;
        }

        self.set_ready().await;
        tracing::info!("directory {} ready", self.name);
        Ok(())
    }

    /// Stop the watcher. The store closes when the context drops.
    pub async fn teardown(&self) {
        if let Some(handle) = self.watcher_task.lock().await.take() {
            handle.abort();
        }
    }

    pub fn search_service(&self) -> &SearchService {
        &self.search_service
    }

    pub fn metadata_editor(&self) -> &MetadataEditor {
        &self.metadata_editor
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    pub fn thumbnails(&self) -> &ThumbnailManager {
        &self.thumbnails
    }

    pub async fn is_ready(&self) -> bool {
        self.gate.lock().await.ready
    }

    /// Apply or queue a file event; pre-init events replay in arrival order.
    pub async fn handle_event(&self, event: FileEvent) {
        {
            let mut gate = self.gate.lock().await;
            if !gate.ready {
                gate.queue.push(event);
                return;
            }
        }
        self.process_event(event).await;
    }

    async fn set_ready(&self) {
        let queued = {
            let mut gate = self.gate.lock().await;
            gate.ready = true;
            std::mem::take(&mut gate.queue)
        };
        for event in queued {
            self.process_event(event).await;
        }
    }

    async fn process_event(&self, event: FileEvent) {
        let outcome = match &event {
            FileEvent::Created(path) => self.on_file_created(path).await,
            FileEvent::Deleted(path) => self.on_file_deleted(path).await,
            FileEvent::Moved { from, to } => self.on_file_moved(from, to).await,
        };
        if let Err(err) = outcome {
            tracing::error!("failed to process {event:?}: {err:#}");
        }
    }

    async fn on_file_created(&self, path: &Path) -> Result<()> {
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        if self.store.get_file_by_name(&name)?.is_some() {
            // already indexed (e.g. the init reconciliation beat the event)
            return Ok(());
        }
        tracing::info!("handling new file at: {}", path.display());
        let indexer = FileIndexer::new(&self.root_dir, &self.store, self.prober.as_ref());
        let Some(mut file) = indexer.add_file(path).await? else {
            return Ok(());
        };
        if file.file_type == FileType::Image {
            self.ocr.perform_ocr(&mut file).await;
        }
        if matches!(file.file_type, FileType::Audio | FileType::Video) {
            self.transcription.transcribe_file(&mut file).await;
        }
        {
            let mut indexes = self.indexes.write().await;
            indexes.index_new_file(&self.store, &mut file).await?;
            indexes.embeddings.on_file_created(&self.store, &mut file).await?;
        }
        self.thumbnails.on_file_created(&file).await;
        self.store.update_file(&file)?;
        tracing::info!("file ready for querying: {}", path.display());
        Ok(())
    }

    async fn on_file_deleted(&self, path: &Path) -> Result<()> {
        let indexer = FileIndexer::new(&self.root_dir, &self.store, self.prober.as_ref());
        let Some(file) = indexer.delete_file(path)? else {
            return Ok(());
        };
        tracing::info!("handling file deleted from: {}", path.display());
        {
            let mut indexes = self.indexes.write().await;
            indexes.unindex_file(&file);
            indexes.embeddings.on_file_deleted(&file)?;
        }
        self.thumbnails.on_file_deleted(&file);
        Ok(())
    }

    async fn on_file_moved(&self, from: &Path, to: &Path) -> Result<()> {
        self.on_file_deleted(from).await?;
        if to.parent() == Some(self.root_dir.as_path()) {
            self.on_file_created(to).await?;
        }
        Ok(())
    }

    async fn start_watcher(self: &Arc<Self>) -> Result<()> {
        let mut watcher = DirectoryWatcher::new(&self.root_dir)?;
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(WATCHER_POLL_INTERVAL);
            loop {
                interval.tick().await;
                let Some(context) = weak.upgrade() else { break };
                for event in watcher.poll_events() {
                    context.handle_event(event).await;
                }
            }
        });
        *self.watcher_task.lock().await = Some(handle);
        Ok(())
    }
}

/// All live directory contexts, keyed by registered name.
pub struct DirectoryContextHolder {
    model_managers: HashMap<String, Arc<ModelManager>>,
    prober: Arc<dyn VideoProber>,
    preload_thumbnails: bool,
    contexts: Mutex<HashMap<String, Arc<DirectoryContext>>>,
    init_failed: Mutex<HashSet<String>>,
    stopped: AtomicBool,
    initialized: AtomicBool,
}

impl DirectoryContextHolder {
    /// `model_managers` maps a primary language to its manager (secondary
    /// managers share GPU-heavy kinds with the primary).
    pub fn new(
        model_managers: HashMap<String, Arc<ModelManager>>,
        prober: Arc<dyn VideoProber>,
        preload_thumbnails: bool,
    ) -> Self {
        Self {
            model_managers,
            prober,
            preload_thumbnails,
            contexts: Mutex::new(HashMap::new()),
            init_failed: Mutex::new(HashSet::new()),
            stopped: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
        }
    }

    pub async fn register_directory(&self, directory: &DirectoryRecord) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            bail!("directory holder is stopped");
        }
        let mut contexts = self.contexts.lock().await;
        if contexts.contains_key(&directory.name) {
            bail!("directory {} is already registered", directory.name);
        }

        match self.build_and_init(directory).await {
            Ok(context) => {
                self.init_failed.lock().await.remove(&directory.name);
                contexts.insert(directory.name.clone(), context);
                Ok(())
            }
            Err(err) => {
                self.init_failed.lock().await.insert(directory.name.clone());
                Err(err)
            }
        }
    }

    async fn build_and_init(&self, directory: &DirectoryRecord) -> Result<Arc<DirectoryContext>> {
        if !directory.fs_path.exists() {
            bail!(
                "directory {} does not exist at {}",
                directory.name,
                directory.fs_path.display()
            );
        }
        let model_manager = self
            .model_managers
            .get(&directory.primary_language)
            .cloned()
            .with_context(|| {
                format!("no model manager for language {}", directory.primary_language)
            })?;
        let context = Arc::new(DirectoryContext::new(
            &directory.name,
            &directory.fs_path,
            model_manager,
            self.prober.clone(),
            self.preload_thumbnails,
        )?);
        if let Err(err) = context.init().await {
            context.teardown().await;
            return Err(err);
        }
        Ok(context)
    }

    pub async fn unregister_directory(&self, name: &str) -> Result<()> {
        let context = self
            .contexts
            .lock()
            .await
            .remove(name)
            .with_context(|| format!("directory {name} is not registered"))?;
        context.teardown().await;
        Ok(())
    }

    pub async fn get_context(&self, name: &str) -> Option<Arc<DirectoryContext>> {
        self.contexts.lock().await.get(name).cloned()
    }

    pub async fn has_context(&self, name: &str) -> bool {
        self.contexts.lock().await.contains_key(name)
    }

    pub async fn has_init_failed(&self, name: &str) -> bool {
        self.init_failed.lock().await.contains(name)
    }

    /// Mark startup registration as done (directories registered at boot).
    pub fn set_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Unregister and re-register every directory in the registry. Run
    /// periodically to recover from missed filesystem events.
    pub async fn refresh_from_registry(&self, registry: &DirectoryRegistry) {
        let directories = match registry.get_all() {
            Ok(directories) => directories,
            Err(err) => {
                tracing::error!("failed to list registered directories: {err:#}");
                return;
            }
        };
        for directory in directories {
            if let Err(err) = self.unregister_directory(&directory.name).await {
                tracing::debug!("refresh unregister of {}: {err:#}", directory.name);
            }
            if let Err(err) = self.register_directory(&directory).await {
                tracing::error!("failed to refresh directory {}: {err:#}", directory.name);
            }
        }
    }

    /// Detached consistency-refresh loop; aborts when the handle is dropped
    /// by the caller or the holder is stopped.
    pub fn spawn_periodic_refresh(
        self: &Arc<Self>,
        registry: Arc<DirectoryRegistry>,
        period: Duration,
    ) -> JoinHandle<()> {
        let holder = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if holder.stopped.load(Ordering::SeqCst) {
                    break;
                }
                tracing::info!("running periodic directory refresh");
                holder.refresh_from_registry(&registry).await;
            }
        })
    }

    pub async fn teardown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let contexts = std::mem::take(&mut *self.contexts.lock().await);
        for (name, context) in contexts {
            tracing::info!("tearing down directory context {name}");
            context.teardown().await;
        }
    }
}
