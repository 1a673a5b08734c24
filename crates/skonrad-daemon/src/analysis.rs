//! Init-time analysis sweeps: OCR, speech transcription and vision-LM
//! descriptions.
//!
//! Each driver walks the rows that have not been analyzed yet, runs the
//! capability, and records the result. A failure marks the file analyzed with
//! no text so it is not retried on every startup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use skonrad_core::{FileRecord, FileStore, OcrEngine, TranscriptionEngine, VisionLmEngine};

/// Runs OCR over images and flags detected screenshots.
pub struct OcrService {
    root_dir: PathBuf,
    store: Arc<FileStore>,
    engine: OcrEngine,
}

impl OcrService {
    pub fn new(root_dir: PathBuf, store: Arc<FileStore>, engine: OcrEngine) -> Self {
        Self {
            root_dir,
            store,
            engine,
        }
    }

    pub async fn init_ocrs(&self) -> Result<()> {
        let files = self.store.images_without_ocr()?;
        if files.is_empty() {
            return Ok(());
        }
        tracing::info!("running OCR for {} images", files.len());
        for mut file in files {
            self.perform_ocr(&mut file).await;
            self.store.update_file(&file)?;
        }
        Ok(())
    }

    /// Run OCR for one image row, updating its fields in place. A screenshot
    /// with an empty description gets the OCR text as its description.
    pub async fn perform_ocr(&self, file: &mut FileRecord) {
        match self.engine.run_ocr(&self.root_dir.join(&file.name)).await {
            Ok(output) => {
                file.is_screenshot = output.is_screenshot;
                if output.is_screenshot {
                    if file.description.is_empty() {
                        file.description = output.text.clone();
                    }
                    file.ocr_text = Some(output.text);
                }
            }
            Err(err) => tracing::error!("OCR failed for {}: {err:#}", file.name),
        }
        file.is_ocr_analyzed = true;
    }
}

/// Transcribes audio and video files.
pub struct TranscriptionService {
    root_dir: PathBuf,
    store: Arc<FileStore>,
    engine: TranscriptionEngine,
}

impl TranscriptionService {
    pub fn new(root_dir: PathBuf, store: Arc<FileStore>, engine: TranscriptionEngine) -> Self {
        Self {
            root_dir,
            store,
            engine,
        }
    }

    /// Transcribe every pending file. With `retranscribe_all_auto` set, files
    /// whose transcript was never manually corrected are redone as well.
    pub async fn init_transcriptions(&self, retranscribe_all_auto: bool) -> Result<()> {
        let files = if retranscribe_all_auto {
            self.store.media_with_auto_transcript()?
        } else {
            self.store.media_without_transcript()?
        };
        if files.is_empty() {
            return Ok(());
        }
        tracing::info!("generating transcriptions for {} files", files.len());
        for mut file in files {
            self.transcribe_file(&mut file).await;
            self.store.update_file(&file)?;
        }
        Ok(())
    }

    /// Transcribe one file, updating its fields in place.
    pub async fn transcribe_file(&self, file: &mut FileRecord) {
        match self.engine.transcribe(&self.root_dir.join(&file.name)).await {
            Ok(transcript) => file.transcript = Some(transcript),
            Err(err) => tracing::error!("failed to transcribe {}: {err:#}", file.name),
        }
        file.is_transcript_analyzed = true;
    }
}

/// Generates vision-LM descriptions for images that lack one.
pub struct VisionLmService {
    root_dir: PathBuf,
    store: Arc<FileStore>,
    engine: VisionLmEngine,
}

impl VisionLmService {
    pub fn new(root_dir: PathBuf, store: Arc<FileStore>, engine: VisionLmEngine) -> Self {
        Self {
            root_dir,
            store,
            engine,
        }
    }

    pub async fn init_descriptions(&self) -> Result<()> {
        let files = self.store.images_without_llm_description()?;
        if files.is_empty() {
            return Ok(());
        }
        tracing::info!("generating vision-LM descriptions for {} images", files.len());
        for mut file in files {
            match self.engine.describe(&self.root_dir.join(&file.name)).await {
                Ok(description) => file.llm_description = Some(description),
                Err(err) => {
                    tracing::error!("vision-LM description failed for {}: {err:#}", file.name)
                }
            }
            file.is_llm_description_analyzed = true;
            self.store.update_file(&file)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skonrad_core::testing::{stub_model_manager_with, StubOcr, StubTranscriber};
    use skonrad_core::{FileType, NewFile, OcrOutput};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn store_with(files: &[NewFile]) -> Arc<FileStore> {
        let store = Arc::new(FileStore::in_memory().unwrap());
        for file in files {
            store.add_file(file).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_ocr_seeds_description_for_screenshots() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&[
            NewFile {
                name: "shot.png".into(),
                file_type: FileType::Image,
                ..Default::default()
            },
            NewFile {
                name: "photo.png".into(),
                file_type: FileType::Image,
                ..Default::default()
            },
        ]);

        let manager = stub_model_manager_with(
            StubOcr {
                outputs: HashMap::from([(
                    "shot.png".to_string(),
                    OcrOutput {
                        text: "Submit".into(),
                        is_screenshot: true,
                    },
                )]),
            },
            StubTranscriber::default(),
        );
        let service = OcrService::new(
            dir.path().to_path_buf(),
            store.clone(),
            OcrEngine::new(manager),
        );
        service.init_ocrs().await.unwrap();

        let shot = store.get_file_by_name("shot.png").unwrap().unwrap();
        assert!(shot.is_ocr_analyzed);
        assert!(shot.is_screenshot);
        assert_eq!(shot.ocr_text.as_deref(), Some("Submit"));
        assert_eq!(shot.description, "Submit");

        let photo = store.get_file_by_name("photo.png").unwrap().unwrap();
        assert!(photo.is_ocr_analyzed);
        assert!(!photo.is_screenshot);
        assert!(photo.ocr_text.is_none());
        assert_eq!(photo.description, "");
    }

    #[tokio::test]
    async fn test_ocr_keeps_existing_description() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&[NewFile {
            name: "shot.png".into(),
            file_type: FileType::Image,
            description: "my settings screen".into(),
            ..Default::default()
        }]);

        let manager = stub_model_manager_with(
            StubOcr {
                outputs: HashMap::from([(
                    "shot.png".to_string(),
                    OcrOutput {
                        text: "Submit".into(),
                        is_screenshot: true,
                    },
                )]),
            },
            StubTranscriber::default(),
        );
        let service = OcrService::new(
            dir.path().to_path_buf(),
            store.clone(),
            OcrEngine::new(manager),
        );
        service.init_ocrs().await.unwrap();

        let shot = store.get_file_by_name("shot.png").unwrap().unwrap();
        assert_eq!(shot.description, "my settings screen");
        assert_eq!(shot.ocr_text.as_deref(), Some("Submit"));
    }

    #[tokio::test]
    async fn test_transcription_marks_analyzed() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&[NewFile {
            name: "talk.mp3".into(),
            file_type: FileType::Audio,
            ..Default::default()
        }]);

        let manager = stub_model_manager_with(
            StubOcr::default(),
            StubTranscriber {
                transcripts: HashMap::from([(
                    "talk.mp3".to_string(),
                    "happy birthday".to_string(),
                )]),
            },
        );
        let service = TranscriptionService::new(
            dir.path().to_path_buf(),
            store.clone(),
            TranscriptionEngine::new(manager),
        );
        service.init_transcriptions(false).await.unwrap();

        let talk = store.get_file_by_name("talk.mp3").unwrap().unwrap();
        assert!(talk.is_transcript_analyzed);
        assert_eq!(talk.transcript.as_deref(), Some("happy birthday"));

        // second sweep finds nothing to do
        service.init_transcriptions(false).await.unwrap();
    }
}
