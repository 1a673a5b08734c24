//! Pre-rendered video thumbnails under `<root>/.thumbnails/`.
//!
//! Image thumbnails are cheap to produce on demand, so only videos get a
//! cached thumbnail: one frame, letterboxed onto a square canvas and stored
//! as JPEG under the file's own name.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use image::imageops;
use image::{DynamicImage, RgbImage};
use skonrad_core::{FileRecord, FileType, VideoProber};

const THUMBNAILS_DIR_NAME: &str = ".thumbnails";

/// Square thumbnail edge in pixels.
const THUMBNAIL_SIZE: u32 = 300;

/// Offset of the frame used for video thumbnails.
const THUMBNAIL_FRAME_OFFSET_SECONDS: f64 = 1.0;

pub struct ThumbnailManager {
    root_dir: PathBuf,
    thumbnails_dir: PathBuf,
    prober: Arc<dyn VideoProber>,
}

impl ThumbnailManager {
    pub fn new(root_dir: &Path, prober: Arc<dyn VideoProber>) -> Result<Self> {
        let thumbnails_dir = root_dir.join(THUMBNAILS_DIR_NAME);
        std::fs::create_dir_all(&thumbnails_dir)
            .with_context(|| format!("failed to create {}", thumbnails_dir.display()))?;
        Ok(Self {
            root_dir: root_dir.to_path_buf(),
            thumbnails_dir,
            prober,
        })
    }

    /// Pre-render the thumbnail for a new video file. Failures are logged;
    /// the file stays searchable either way.
    pub async fn on_file_created(&self, file: &FileRecord) {
        if file.file_type != FileType::Video {
            return;
        }
        if let Err(err) = self.create_video_thumbnail(&file.name).await {
            tracing::warn!("failed to create thumbnail for {}: {err:#}", file.name);
        }
    }

    pub fn on_file_deleted(&self, file: &FileRecord) {
        let path = self.thumbnails_dir.join(&file.name);
        if let Err(err) = std::fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove thumbnail {}: {err}", path.display());
            }
        }
    }

    /// Render thumbnails for every video that does not have one yet.
    pub async fn preload_thumbnails(&self, files: &[FileRecord]) {
        for file in files {
            if file.file_type == FileType::Video && !self.thumbnails_dir.join(&file.name).exists() {
                self.on_file_created(file).await;
            }
        }
    }

    pub fn thumbnail_path(&self, file: &FileRecord) -> PathBuf {
        self.thumbnails_dir.join(&file.name)
    }

    async fn create_video_thumbnail(&self, name: &str) -> Result<()> {
        let video_path = self.root_dir.join(name);
        let frame = self
            .prober
            .frame_at_offset(&video_path, THUMBNAIL_FRAME_OFFSET_SECONDS)
            .await?;
        let thumbnail_path = self.thumbnails_dir.join(name);
        tokio::task::spawn_blocking(move || {
            let letterboxed = letterbox(&frame, THUMBNAIL_SIZE);
            letterboxed
                .to_rgb8()
                .save_with_format(&thumbnail_path, image::ImageFormat::Jpeg)
                .with_context(|| format!("failed to write {}", thumbnail_path.display()))
        })
        .await?
    }
}

/// Scale to fit and pad onto a black square canvas.
fn letterbox(frame: &DynamicImage, size: u32) -> DynamicImage {
    let scaled = frame.thumbnail(size, size);
    let mut canvas = RgbImage::new(size, size);
    let x = (size - scaled.width()) / 2;
    let y = (size - scaled.height()) / 2;
    imageops::overlay(&mut canvas, &scaled.to_rgb8(), i64::from(x), i64::from(y));
    DynamicImage::ImageRgb8(canvas)
}
