//! Capability seams for the external ML workers.
//!
//! The traits describe what the embedding application must provide (model
//! inference is synchronous and runs on the blocking pool); the engine
//! wrappers pair a [`crate::models::ModelManager`] lease with one capability
//! and expose async entry points to the rest of the system.

mod clip;
mod image_embedding;
mod lemmatizer;
mod ocr;
mod text;
mod transcriber;
mod vision;

pub use clip::ClipEngine;
pub use image_embedding::ImageEmbeddingEngine;
pub use lemmatizer::LemmatizerEngine;
pub use ocr::OcrEngine;
pub use text::{TextEmbeddingEngine, TextModelWithConfig};
pub use transcriber::TranscriptionEngine;
pub use vision::VisionLmEngine;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use image::DynamicImage;

/// Produces ordered lowercase lemma tokens for a text in the directory's
/// language. Compound lemmas may contain whitespace; the engine splits them.
pub trait LemmatizerModel: Send + Sync {
    fn lemmatize(&self, text: &str) -> Result<Vec<String>>;
}

/// Sentence embedding model; prefix handling lives in [`TextModelWithConfig`].
pub trait TextEmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Visual-similarity embedding over whole images.
pub trait ImageEmbeddingModel: Send + Sync {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>>;
}

/// Joint text/image embedding; both outputs live in the same space.
pub trait ClipModel: Send + Sync {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
    fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>>;
}

/// Result of running OCR over one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrOutput {
    pub text: String,
    /// Whether the image carries enough real words to be treated as a
    /// text-bearing screenshot.
    pub is_screenshot: bool,
}

pub trait OcrModel: Send + Sync {
    fn run_ocr(&self, path: &Path) -> Result<OcrOutput>;
}

pub trait TranscriptionModel: Send + Sync {
    fn transcribe(&self, path: &Path) -> Result<String>;
}

/// Vision language model producing a free-form description of an image.
pub trait VisionLmModel: Send + Sync {
    fn describe(&self, path: &Path) -> Result<String>;
}

/// Video metadata and frame access, typically backed by ffmpeg/ffprobe.
#[async_trait]
pub trait VideoProber: Send + Sync {
    async fn duration_seconds(&self, path: &Path) -> Result<f64>;
    async fn frame_at_offset(&self, path: &Path, seconds: f64) -> Result<DynamicImage>;
    async fn has_video_stream(&self, path: &Path) -> Result<bool>;
}

/// Scale `vector` to unit L2 norm; zero vectors are returned unchanged.
pub(crate) fn l2_normalized(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalized() {
        let v = l2_normalized(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let zero = l2_normalized(vec![0.0, 0.0]);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
