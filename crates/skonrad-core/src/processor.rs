//! Embedding lifecycle: reconciliation at init, incremental updates, and the
//! dense search entry points.
//!
//! Six semantic dimensions are maintained per directory: three text spaces
//! (description, OCR text, transcript), one visual-similarity image space, a
//! CLIP image space, and a multi-row CLIP space for sampled video frames.
//! Vectors live in the on-disk persistor records and in the in-memory
//! calculators; both are kept in sync by this type.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::DynamicImage;

use crate::engines::{ClipEngine, ImageEmbeddingEngine, TextEmbeddingEngine, VideoProber};
use crate::persistence::{EmbeddingPersistor, ExpectedTexts, StoredEmbeddings, TextEmbedding};
use crate::search::SearchResult;
use crate::similarity::{
    MultiSimilarityCalculator, MultiSimilarityCalculatorBuilder, SimilarityCalculator,
    SimilarityCalculatorBuilder,
};
use crate::store::{FileRecord, FileStore, FileType};

/// Number of evenly spaced frames sampled per video.
pub const NUM_VIDEO_FRAMES: usize = 3;

/// The three text-derived embedding kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Description,
    OcrText,
    Transcript,
}

/// Owns the per-dimension calculators and the persistor for one directory.
pub struct EmbeddingProcessor {
    root_dir: PathBuf,
    persistor: EmbeddingPersistor,
    text_engine: TextEmbeddingEngine,
    image_engine: ImageEmbeddingEngine,
    clip_engine: ClipEngine,
    video_prober: Arc<dyn VideoProber>,
    description_calc: SimilarityCalculator,
    ocr_text_calc: SimilarityCalculator,
    transcription_calc: SimilarityCalculator,
    image_calc: SimilarityCalculator,
    clip_image_calc: SimilarityCalculator,
    clip_video_calc: MultiSimilarityCalculator,
}

#[derive(Default)]
struct Builders {
    description: SimilarityCalculatorBuilder,
    ocr_text: SimilarityCalculatorBuilder,
    transcription: SimilarityCalculatorBuilder,
    image: SimilarityCalculatorBuilder,
    clip_image: SimilarityCalculatorBuilder,
    clip_video: MultiSimilarityCalculatorBuilder,
}

impl EmbeddingProcessor {
    pub fn new(
        root_dir: PathBuf,
        persistor: EmbeddingPersistor,
        text_engine: TextEmbeddingEngine,
        image_engine: ImageEmbeddingEngine,
        clip_engine: ClipEngine,
        video_prober: Arc<dyn VideoProber>,
    ) -> Self {
        Self {
            root_dir,
            persistor,
            text_engine,
            image_engine,
            clip_engine,
            video_prober,
            description_calc: SimilarityCalculator::default(),
            ocr_text_calc: SimilarityCalculator::default(),
            transcription_calc: SimilarityCalculator::default(),
            image_calc: SimilarityCalculator::default(),
            clip_image_calc: SimilarityCalculator::default(),
            clip_video_calc: MultiSimilarityCalculator::default(),
        }
    }

    /// Reconcile on-disk records with the file rows and rebuild the matrices.
    ///
    /// Orphaned records are deleted, missing vectors are generated, vectors
    /// whose source text vanished are dropped, and every surviving vector is
    /// fed into the fresh calculators.
    pub async fn init_embeddings(&mut self, store: &FileStore) -> Result<()> {
        let mut by_name: HashMap<String, FileRecord> = store
            .load_all_files()?
            .into_iter()
            .map(|file| (file.name.clone(), file))
            .collect();

        let mut builders = Builders::default();
        for name in self.persistor.list()? {
            let Some(mut file) = by_name.remove(&name) else {
                tracing::info!("deleting orphaned embedding record: {name}");
                self.persistor.delete(&name)?;
                continue;
            };
            let mut stored = self.persistor.load(&name, expected_texts(&file));
            let dirty = self.reconcile(&mut file, &mut stored, store).await?;
            if dirty {
                self.persistor.save(&name, &stored)?;
            }
            Self::feed(&mut builders, &file, &stored);
        }

        for (name, mut file) in by_name {
            let mut stored = StoredEmbeddings::default();
            let dirty = self.reconcile(&mut file, &mut stored, store).await?;
            if dirty {
                self.persistor.save(&name, &stored)?;
            }
            Self::feed(&mut builders, &file, &stored);
        }

        self.description_calc = builders.description.build();
        self.ocr_text_calc = builders.ocr_text.build();
        self.transcription_calc = builders.transcription.build();
        self.image_calc = builders.image.build();
        self.clip_image_calc = builders.clip_image.build();
        self.clip_video_calc = builders.clip_video.build();
        Ok(())
    }

    /// Bring `stored` in line with what the file row calls for. Returns
    /// whether anything changed (caller persists).
    async fn reconcile(
        &self,
        file: &mut FileRecord,
        stored: &mut StoredEmbeddings,
        store: &FileStore,
    ) -> Result<bool> {
        let mut dirty = false;

        dirty |= self
            .reconcile_text_kind(file, &mut stored.description, TextKind::Description)
            .await;
        dirty |= self
            .reconcile_text_kind(file, &mut stored.ocr_text, TextKind::OcrText)
            .await;
        dirty |= self
            .reconcile_text_kind(file, &mut stored.transcription_text, TextKind::Transcript)
            .await;

        let wants_image = file.file_type == FileType::Image;
        if wants_image && stored.image.is_none() {
            match self.compute_image_embedding(&file.name).await {
                Ok(vector) => {
                    stored.image = Some(vector);
                    dirty = true;
                }
                Err(err) => {
                    tracing::warn!("image embedding failed for {}: {err:#}", file.name)
                }
            }
        } else if !wants_image && stored.image.is_some() {
            stored.image = None;
            dirty = true;
        }

        if wants_image && stored.clip_image.is_none() {
            match self.compute_clip_image_embedding(&file.name).await {
                Ok(vector) => {
                    stored.clip_image = Some(vector);
                    dirty = true;
                }
                Err(err) => {
                    tracing::warn!("clip embedding failed for {}: {err:#}", file.name)
                }
            }
        } else if !wants_image && stored.clip_image.is_some() {
            stored.clip_image = None;
            dirty = true;
        }

        let wants_video = file.file_type == FileType::Video && !file.has_video_embedding_failed;
        if wants_video && stored.clip_video.is_none() {
            match self.compute_video_frame_embeddings(&file.name).await {
                Ok(rows) => {
                    stored.clip_video = Some(rows);
                    dirty = true;
                }
                Err(err) => {
                    tracing::warn!("video clip embedding failed for {}: {err:#}", file.name);
                    file.has_video_embedding_failed = true;
                    store.update_file(file)?;
                }
            }
        } else if !wants_video && stored.clip_video.is_some() {
            stored.clip_video = None;
            dirty = true;
        }

        Ok(dirty)
    }

    async fn reconcile_text_kind(
        &self,
        file: &FileRecord,
        slot: &mut Option<TextEmbedding>,
        kind: TextKind,
    ) -> bool {
        let text = text_for_kind(file, kind).unwrap_or("");
        if text.is_empty() {
            return slot.take().is_some();
        }
        if slot.is_some() {
            return false;
        }
        match self.text_engine.embed_passage(text).await {
            Ok(vector) => {
                *slot = Some(TextEmbedding {
                    text: text.to_string(),
                    vector,
                });
                true
            }
            Err(err) => {
                tracing::warn!("{kind:?} embedding failed for {}: {err:#}", file.name);
                false
            }
        }
    }

    fn feed(builders: &mut Builders, file: &FileRecord, stored: &StoredEmbeddings) {
        if let Some(description) = &stored.description {
            builders.description.add_row(file.id, &description.vector);
        }
        if let Some(ocr_text) = &stored.ocr_text {
            builders.ocr_text.add_row(file.id, &ocr_text.vector);
        }
        if let Some(transcription) = &stored.transcription_text {
            builders.transcription.add_row(file.id, &transcription.vector);
        }
        if let Some(image) = &stored.image {
            builders.image.add_row(file.id, image);
        }
        if let Some(clip_image) = &stored.clip_image {
            builders.clip_image.add_row(file.id, clip_image);
        }
        if let Some(clip_video) = &stored.clip_video {
            builders.clip_video.add_rows(file.id, clip_video);
        }
    }

    // --- search entry points ---

    pub async fn search_description_based(
        &self,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let embedding = self.text_engine.embed_query(query).await?;
        Ok(self.description_calc.compute_similarity(&embedding, k))
    }

    pub async fn search_ocr_text_based(
        &self,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let embedding = self.text_engine.embed_query(query).await?;
        Ok(self.ocr_text_calc.compute_similarity(&embedding, k))
    }

    pub async fn search_transcription_text_based(
        &self,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let embedding = self.text_engine.embed_query(query).await?;
        Ok(self.transcription_calc.compute_similarity(&embedding, k))
    }

    pub async fn search_clip_based(&self, query: &str, k: Option<usize>) -> Result<Vec<SearchResult>> {
        let embedding = self.clip_engine.embed_text(query).await?;
        Ok(self.clip_image_calc.compute_similarity(&embedding, k))
    }

    pub async fn search_clip_video_based(
        &self,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let embedding = self.clip_engine.embed_text(query).await?;
        Ok(self.clip_video_calc.compute_similarity(&embedding, k))
    }

    // --- reverse lookups ---

    /// Files whose descriptions are closest to this file's. The probe file
    /// itself ranks first with score 1.
    pub fn find_items_with_similar_descriptions(
        &self,
        file: &FileRecord,
        k: Option<usize>,
    ) -> Vec<SearchResult> {
        match self.description_calc.get_embedding(file.id) {
            Some(embedding) => {
                let embedding = embedding.to_vec();
                self.description_calc.compute_similarity(&embedding, k)
            }
            None => Vec::new(),
        }
    }

    /// Images visually closest to this image file.
    pub async fn find_visually_similar_images(
        &self,
        file: &FileRecord,
        k: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let embedding = match self.image_calc.get_embedding(file.id) {
            Some(embedding) => embedding.to_vec(),
            // not in the matrix (e.g. embedding previously failed): embed now
            None => self.compute_image_embedding(&file.name).await?,
        };
        Ok(self.image_calc.compute_similarity(&embedding, k))
    }

    /// Videos whose sampled frames are closest to this video's frames. Every
    /// stored frame of the probe is scored and candidates keep their best
    /// frame score.
    pub fn find_visually_similar_videos(
        &self,
        file: &FileRecord,
        k: Option<usize>,
    ) -> Vec<SearchResult> {
        let Some(rows) = self.clip_video_calc.get_rows(file.id) else {
            return Vec::new();
        };
        let rows: Vec<Vec<f32>> = rows.into_iter().map(<[f32]>::to_vec).collect();
        let mut best: HashMap<i64, f32> = HashMap::new();
        for row in &rows {
            for result in self.clip_video_calc.compute_similarity(row, None) {
                let entry = best.entry(result.file_id).or_insert(f32::NEG_INFINITY);
                if result.score > *entry {
                    *entry = result.score;
                }
            }
        }
        let mut results: Vec<SearchResult> = best
            .into_iter()
            .map(|(file_id, score)| SearchResult { file_id, score })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        results.truncate(k.unwrap_or(results.len()));
        results
    }

    /// Indexed images visually closest to an uploaded image.
    pub async fn find_visually_similar_images_to_image(
        &self,
        image: DynamicImage,
        k: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let embedding = self.image_engine.embed(image).await?;
        Ok(self.image_calc.compute_similarity(&embedding, k))
    }

    // --- incremental updates ---

    /// Compute and persist every applicable vector of a new file and add the
    /// rows to the calculators.
    pub async fn on_file_created(&mut self, store: &FileStore, file: &mut FileRecord) -> Result<()> {
        let mut stored = StoredEmbeddings::default();
        let dirty = self.reconcile(file, &mut stored, store).await?;
        if dirty {
            self.persistor.save(&file.name, &stored)?;
        }
        if let Some(description) = &stored.description {
            self.description_calc.add(file.id, &description.vector);
        }
        if let Some(ocr_text) = &stored.ocr_text {
            self.ocr_text_calc.add(file.id, &ocr_text.vector);
        }
        if let Some(transcription) = &stored.transcription_text {
            self.transcription_calc.add(file.id, &transcription.vector);
        }
        if let Some(image) = &stored.image {
            self.image_calc.add(file.id, image);
        }
        if let Some(clip_image) = &stored.clip_image {
            self.clip_image_calc.add(file.id, clip_image);
        }
        if let Some(clip_video) = &stored.clip_video {
            self.clip_video_calc.add_rows(file.id, clip_video);
        }
        Ok(())
    }

    /// Drop the file from every dimension and remove its record.
    pub fn on_file_deleted(&mut self, file: &FileRecord) -> Result<()> {
        self.description_calc.delete(file.id);
        self.ocr_text_calc.delete(file.id);
        self.transcription_calc.delete(file.id);
        self.image_calc.delete(file.id);
        self.clip_image_calc.delete(file.id);
        self.clip_video_calc.delete(file.id);
        self.persistor.delete(&file.name)
    }

    /// Re-embed one text dimension after an edit. `file` already carries the
    /// new text; `old_text` is what was indexed before.
    pub async fn update_text_embedding(
        &mut self,
        file: &FileRecord,
        old_text: &str,
        kind: TextKind,
    ) -> Result<()> {
        let new_text = text_for_kind(file, kind).unwrap_or("").to_string();
        let new_vector = if new_text.is_empty() {
            None
        } else {
            Some(self.text_engine.embed_passage(&new_text).await?)
        };
        let mut stored = self
            .persistor
            .load_without_consistency_check(&file.name, expected_texts(file));

        let (calc, slot) = match kind {
            TextKind::Description => (&mut self.description_calc, &mut stored.description),
            TextKind::OcrText => (&mut self.ocr_text_calc, &mut stored.ocr_text),
            TextKind::Transcript => (&mut self.transcription_calc, &mut stored.transcription_text),
        };

        match new_vector {
            None => {
                calc.delete(file.id);
                *slot = None;
            }
            Some(vector) => {
                if old_text.is_empty() {
                    calc.add(file.id, &vector);
                } else {
                    calc.replace(file.id, &vector);
                }
                *slot = Some(TextEmbedding {
                    text: new_text,
                    vector,
                });
            }
        }
        self.persistor.save(&file.name, &stored)
    }

    // --- vector generation ---

    async fn compute_image_embedding(&self, name: &str) -> Result<Vec<f32>> {
        let image = self.load_image(name).await?;
        self.image_engine.embed(image).await
    }

    async fn compute_clip_image_embedding(&self, name: &str) -> Result<Vec<f32>> {
        let image = self.load_image(name).await?;
        self.clip_engine.embed_image(image).await
    }

    /// Sample evenly spaced frames at `(2i+1)/(2N)` of the duration and CLIP-
    /// encode each into one matrix row.
    async fn compute_video_frame_embeddings(&self, name: &str) -> Result<Vec<Vec<f32>>> {
        let path = self.root_dir.join(name);
        let duration = self.video_prober.duration_seconds(&path).await?;
        let mut rows = Vec::with_capacity(NUM_VIDEO_FRAMES);
        for i in 0..NUM_VIDEO_FRAMES {
            let offset = (2 * i + 1) as f64 / (2 * NUM_VIDEO_FRAMES) as f64 * duration;
            let frame = self.video_prober.frame_at_offset(&path, offset).await?;
            rows.push(self.clip_engine.embed_image(frame).await?);
        }
        Ok(rows)
    }

    async fn load_image(&self, name: &str) -> Result<DynamicImage> {
        let path = self.root_dir.join(name);
        tokio::task::spawn_blocking(move || {
            image::open(&path).with_context(|| format!("failed to read image {}", path.display()))
        })
        .await?
    }

    pub fn persistor(&self) -> &EmbeddingPersistor {
        &self.persistor
    }
}

fn text_for_kind(file: &FileRecord, kind: TextKind) -> Option<&str> {
    match kind {
        TextKind::Description => Some(file.description.as_str()),
        TextKind::OcrText => file.ocr_text.as_deref(),
        TextKind::Transcript => {
            if file.is_transcript_analyzed {
                file.transcript.as_deref()
            } else {
                None
            }
        }
    }
}

fn expected_texts(file: &FileRecord) -> ExpectedTexts<'_> {
    ExpectedTexts {
        description: &file.description,
        ocr_text: file.ocr_text.as_deref(),
        transcript: file.transcript.as_deref(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::{ClipEngine, ImageEmbeddingEngine, TextEmbeddingEngine};
    use crate::store::NewFile;
    use crate::testing::{encode_png, stub_model_manager, StubVideoProber, MP4_HEADER};
    use anyhow::bail;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    struct FailingProber;

    #[async_trait]
    impl VideoProber for FailingProber {
        async fn duration_seconds(&self, _path: &Path) -> Result<f64> {
            bail!("no ffprobe here")
        }

        async fn frame_at_offset(&self, _path: &Path, _seconds: f64) -> Result<DynamicImage> {
            bail!("no ffmpeg here")
        }

        async fn has_video_stream(&self, _path: &Path) -> Result<bool> {
            Ok(true)
        }
    }

    fn processor(root: &Path, prober: Arc<dyn VideoProber>) -> EmbeddingProcessor {
        let manager = stub_model_manager();
        EmbeddingProcessor::new(
            root.to_path_buf(),
            EmbeddingPersistor::new(root).unwrap(),
            TextEmbeddingEngine::new(manager.clone()),
            ImageEmbeddingEngine::new(manager.clone()),
            ClipEngine::new(manager),
            prober,
        )
    }

    fn add_described_file(store: &FileStore, name: &str, description: &str) -> i64 {
        store
            .add_file(&NewFile {
                name: name.into(),
                file_type: FileType::Image,
                description: description.into(),
                ..Default::default()
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_init_builds_description_matrix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cat.png"), encode_png(10, 20, 30)).unwrap();
        std::fs::write(dir.path().join("dog.png"), encode_png(200, 100, 50)).unwrap();

        let store = FileStore::in_memory().unwrap();
        let cat = add_described_file(&store, "cat.png", "a cat on a sofa");
        add_described_file(&store, "dog.png", "a dog in a park");

        let mut processor = processor(dir.path(), Arc::new(StubVideoProber::default()));
        processor.init_embeddings(&store).await.unwrap();

        let results = processor.search_description_based("cat", None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].file_id, cat);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_init_removes_orphaned_records() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::in_memory().unwrap();

        let persistor = EmbeddingPersistor::new(dir.path()).unwrap();
        persistor
            .save(
                "ghost.png",
                &StoredEmbeddings {
                    image: Some(vec![1.0, 0.0]),
                    ..Default::default()
                },
            )
            .unwrap();

        let mut processor = processor(dir.path(), Arc::new(StubVideoProber::default()));
        processor.init_embeddings(&store).await.unwrap();

        assert!(processor.persistor().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_init_drops_vector_for_emptied_description() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cat.png"), encode_png(10, 20, 30)).unwrap();
        let store = FileStore::in_memory().unwrap();
        let id = add_described_file(&store, "cat.png", "a cat on a sofa");

        let mut processor1 = processor(dir.path(), Arc::new(StubVideoProber::default()));
        processor1.init_embeddings(&store).await.unwrap();
        assert!(!processor1.search_description_based("cat", None).await.unwrap().is_empty());

        let mut file = store.get_file_by_id(id).unwrap().unwrap();
        file.description = String::new();
        store.update_file(&file).unwrap();

        let mut processor2 = processor(dir.path(), Arc::new(StubVideoProber::default()));
        processor2.init_embeddings(&store).await.unwrap();
        assert!(processor2.search_description_based("cat", None).await.unwrap().is_empty());
        // the image vectors survive
        assert!(!processor2
            .find_visually_similar_images(&store.get_file_by_id(id).unwrap().unwrap(), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_video_produces_multi_row_matrix_and_single_result() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sky.mp4"), MP4_HEADER).unwrap();
        let store = FileStore::in_memory().unwrap();
        let id = store
            .add_file(&NewFile {
                name: "sky.mp4".into(),
                file_type: FileType::Video,
                ..Default::default()
            })
            .unwrap();

        let mut processor = processor(dir.path(), Arc::new(StubVideoProber::default()));
        processor.init_embeddings(&store).await.unwrap();

        let file = store.get_file_by_id(id).unwrap().unwrap();
        let stored = processor
            .persistor()
            .load("sky.mp4", ExpectedTexts::default());
        assert_eq!(stored.clip_video.as_ref().unwrap().len(), NUM_VIDEO_FRAMES);
        assert!(!file.has_video_embedding_failed);

        // identical frames still yield the video once
        let results = processor
            .search_clip_video_based("a blue sky", None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_id, id);
    }

    #[tokio::test]
    async fn test_video_embedding_failure_is_recorded_and_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.mp4"), MP4_HEADER).unwrap();
        let store = FileStore::in_memory().unwrap();
        let id = store
            .add_file(&NewFile {
                name: "bad.mp4".into(),
                file_type: FileType::Video,
                ..Default::default()
            })
            .unwrap();

        let mut processor1 = processor(dir.path(), Arc::new(FailingProber));
        processor1.init_embeddings(&store).await.unwrap();

        let file = store.get_file_by_id(id).unwrap().unwrap();
        assert!(file.has_video_embedding_failed);
        assert!(processor1
            .search_clip_video_based("anything", None)
            .await
            .unwrap()
            .is_empty());

        // reinit does not retry
        let mut processor2 = processor(dir.path(), Arc::new(FailingProber));
        processor2.init_embeddings(&store).await.unwrap();
    }

    #[tokio::test]
    async fn test_reverse_description_lookup_ranks_self_first() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cat.png"), encode_png(10, 20, 30)).unwrap();
        std::fs::write(dir.path().join("dog.png"), encode_png(200, 100, 50)).unwrap();
        let store = FileStore::in_memory().unwrap();
        let cat = add_described_file(&store, "cat.png", "a cat on a sofa");
        add_described_file(&store, "dog.png", "a dog in a park");

        let mut processor = processor(dir.path(), Arc::new(StubVideoProber::default()));
        processor.init_embeddings(&store).await.unwrap();

        let file = store.get_file_by_id(cat).unwrap().unwrap();
        let results = processor.find_items_with_similar_descriptions(&file, None);
        assert_eq!(results[0].file_id, cat);
        assert!((results[0].score - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_on_file_created_and_deleted() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::in_memory().unwrap();
        let mut processor = processor(dir.path(), Arc::new(StubVideoProber::default()));
        processor.init_embeddings(&store).await.unwrap();

        std::fs::write(dir.path().join("new.png"), encode_png(5, 5, 5)).unwrap();
        let id = add_described_file(&store, "new.png", "fresh snow");
        let mut file = store.get_file_by_id(id).unwrap().unwrap();
        processor.on_file_created(&store, &mut file).await.unwrap();

        assert_eq!(
            processor
                .search_description_based("snow", None)
                .await
                .unwrap()[0]
                .file_id,
            id
        );
        assert_eq!(processor.persistor().list().unwrap(), vec!["new.png".to_string()]);

        processor.on_file_deleted(&file).unwrap();
        assert!(processor.search_description_based("snow", None).await.unwrap().is_empty());
        assert!(processor.persistor().list().unwrap().is_empty());

        // deleting again is harmless
        processor.on_file_deleted(&file).unwrap();
    }

    #[tokio::test]
    async fn test_update_text_embedding_replaces_row_and_record() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cat.png"), encode_png(10, 20, 30)).unwrap();
        let store = FileStore::in_memory().unwrap();
        let id = add_described_file(&store, "cat.png", "a cat");

        let mut processor = processor(dir.path(), Arc::new(StubVideoProber::default()));
        processor.init_embeddings(&store).await.unwrap();

        let mut file = store.get_file_by_id(id).unwrap().unwrap();
        file.description = "a pink elephant".into();
        store.update_file(&file).unwrap();
        processor
            .update_text_embedding(&file, "a cat", TextKind::Description)
            .await
            .unwrap();

        let elephant = processor
            .search_description_based("pink elephant", None)
            .await
            .unwrap();
        assert_eq!(elephant[0].file_id, id);

        // the record reloads against the new text
        let stored = processor.persistor().load(
            "cat.png",
            ExpectedTexts {
                description: "a pink elephant",
                ocr_text: None,
                transcript: None,
            },
        );
        assert!(stored.description.is_some());

        // emptying removes the row and the component
        file.description = String::new();
        store.update_file(&file).unwrap();
        processor
            .update_text_embedding(&file, "a pink elephant", TextKind::Description)
            .await
            .unwrap();
        assert!(processor
            .search_description_based("elephant", None)
            .await
            .unwrap()
            .is_empty());
    }
}
