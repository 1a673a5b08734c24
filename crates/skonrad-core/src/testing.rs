//! Deterministic stub capabilities for tests.
//!
//! The text stubs hash bag-of-words into a fixed-dimension space, so texts
//! sharing tokens have higher cosine similarity; the image stubs derive a
//! vector from pixel content, so identical images embed identically. Nothing
//! here loads a real model.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use image::{DynamicImage, RgbImage};

use crate::engines::{
    ClipModel, ImageEmbeddingModel, LemmatizerModel, OcrModel, OcrOutput, TextEmbeddingModel,
    TextModelWithConfig, TranscriptionModel, VideoProber, VisionLmModel,
};
use crate::models::{Model, ModelKind, ModelManager, ModelProvider};

/// Dimension of every stub embedding space. Large enough that distinct
/// tokens practically never share a slot.
pub const STUB_EMBED_DIM: usize = 256;

/// Minimal mp4 container header (`ftyp` box), sniffed as `video/mp4`.
pub const MP4_HEADER: &[u8] = &[
    0x00, 0x00, 0x00, 0x18, 0x66, 0x74, 0x79, 0x70, 0x6d, 0x70, 0x34, 0x32, 0x00, 0x00, 0x00,
    0x00, 0x6d, 0x70, 0x34, 0x32, 0x69, 0x73, 0x6f, 0x6d,
];

/// Minimal mp3 header (`ID3` tag), sniffed as `audio/mpeg`.
pub const MP3_HEADER: &[u8] = b"ID3\x04\x00\x00\x00\x00\x00\x00";

/// Unit-norm bag-of-words embedding; shared by the text and CLIP-text stubs.
pub fn bag_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; STUB_EMBED_DIM];
    for token in tokenize(text) {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        vector[(hasher.finish() as usize) % STUB_EMBED_DIM] += 1.0;
    }
    normalize(vector)
}

/// Unit-norm embedding derived from raw pixel content.
pub fn pixel_embedding(image: &DynamicImage) -> Vec<f32> {
    let mut hasher = DefaultHasher::new();
    image.to_rgb8().as_raw().hash(&mut hasher);
    let mut state = hasher.finish() | 1;
    let mut vector = vec![0.0f32; STUB_EMBED_DIM];
    for value in &mut vector {
        // xorshift keeps distinct images close to orthogonal
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        *value = ((state % 1000) as f32 / 1000.0) - 0.5;
    }
    normalize(vector)
}

/// A solid-color PNG, decodable by the `image` crate.
pub fn encode_png(r: u8, g: u8, b: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(4, 4, image::Rgb([r, g, b]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|token| {
            token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// Lowercases and splits on whitespace, dropping punctuation.
pub struct StubLemmatizer;

impl LemmatizerModel for StubLemmatizer {
    fn lemmatize(&self, text: &str) -> Result<Vec<String>> {
        Ok(tokenize(text))
    }
}

pub struct StubTextEmbedder;

impl TextEmbeddingModel for StubTextEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(bag_embedding(text))
    }
}

pub struct StubImageEmbedder;

impl ImageEmbeddingModel for StubImageEmbedder {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        Ok(pixel_embedding(image))
    }
}

pub struct StubClip;

impl ClipModel for StubClip {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(bag_embedding(text))
    }

    fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        Ok(pixel_embedding(image))
    }
}

/// Table-driven OCR keyed by file name; unknown files read as empty non-text.
#[derive(Default, Clone)]
pub struct StubOcr {
    pub outputs: HashMap<String, OcrOutput>,
}

impl OcrModel for StubOcr {
    fn run_ocr(&self, path: &Path) -> Result<OcrOutput> {
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        Ok(self.outputs.get(name.as_ref()).cloned().unwrap_or(OcrOutput {
            text: String::new(),
            is_screenshot: false,
        }))
    }
}

/// Table-driven transcripts keyed by file name.
#[derive(Default, Clone)]
pub struct StubTranscriber {
    pub transcripts: HashMap<String, String>,
}

impl TranscriptionModel for StubTranscriber {
    fn transcribe(&self, path: &Path) -> Result<String> {
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        Ok(self.transcripts.get(name.as_ref()).cloned().unwrap_or_default())
    }
}

pub struct StubVisionLm;

impl VisionLmModel for StubVisionLm {
    fn describe(&self, _path: &Path) -> Result<String> {
        Ok(String::new())
    }
}

/// Fixed-duration prober yielding one solid-color frame per file.
#[derive(Clone)]
pub struct StubVideoProber {
    pub duration: f64,
    pub has_stream: bool,
}

impl Default for StubVideoProber {
    fn default() -> Self {
        Self {
            duration: 10.0,
            has_stream: true,
        }
    }
}

#[async_trait]
impl VideoProber for StubVideoProber {
    async fn duration_seconds(&self, _path: &Path) -> Result<f64> {
        Ok(self.duration)
    }

    async fn frame_at_offset(&self, path: &Path, _seconds: f64) -> Result<DynamicImage> {
        // every frame of one file looks the same, so dedup paths get exercised
        let mut hasher = DefaultHasher::new();
        path.file_name().unwrap_or_default().hash(&mut hasher);
        let shade = (hasher.finish() % 256) as u8;
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            4,
            4,
            image::Rgb([shade, shade.wrapping_add(40), shade.wrapping_add(80)]),
        )))
    }

    async fn has_video_stream(&self, _path: &Path) -> Result<bool> {
        Ok(self.has_stream)
    }
}

/// A manager whose providers return the deterministic stubs above.
pub fn stub_model_manager() -> Arc<ModelManager> {
    stub_model_manager_with(StubOcr::default(), StubTranscriber::default())
}

/// Like [`stub_model_manager`], with table-driven OCR and transcription.
pub fn stub_model_manager_with(ocr: StubOcr, transcriber: StubTranscriber) -> Arc<ModelManager> {
    let mut providers: HashMap<ModelKind, ModelProvider> = HashMap::new();
    providers.insert(
        ModelKind::Lemmatizer,
        Arc::new(|| Ok(Model::Lemmatizer(Arc::new(StubLemmatizer)))),
    );
    providers.insert(
        ModelKind::TextEmbedding,
        Arc::new(|| {
            Ok(Model::TextEmbedding(TextModelWithConfig {
                model: Arc::new(StubTextEmbedder),
                query_prefix: String::new(),
                passage_suffix: String::new(),
            }))
        }),
    );
    providers.insert(
        ModelKind::ImageEmbedding,
        Arc::new(|| Ok(Model::ImageEmbedding(Arc::new(StubImageEmbedder)))),
    );
    providers.insert(ModelKind::Clip, Arc::new(|| Ok(Model::Clip(Arc::new(StubClip)))));
    providers.insert(ModelKind::Ocr, {
        let ocr = ocr.clone();
        Arc::new(move || Ok(Model::Ocr(Arc::new(ocr.clone()))))
    });
    providers.insert(ModelKind::Transcriber, {
        let transcriber = transcriber.clone();
        Arc::new(move || Ok(Model::Transcriber(Arc::new(transcriber.clone()))))
    });
    providers.insert(
        ModelKind::VisionLm,
        Arc::new(|| Ok(Model::VisionLm(Arc::new(StubVisionLm)))),
    );
    Arc::new(ModelManager::new(providers))
}
