//! skonrad-daemon: directory lifecycle for the skonrad search engine.
//!
//! This crate provides:
//! - Per-directory initialization and teardown (`DirectoryContext`)
//! - A registry of live directories with failure tracking and a periodic
//!   consistency refresh (`DirectoryContextHolder`)
//! - Debounced filesystem watching feeding incremental index updates
//! - File indexing (MIME reconciliation), OCR / transcription / vision-LM
//!   sweeps, video thumbnails, and the ffmpeg-backed video prober
//!
//! The HTTP surface is intentionally absent; embed this crate and expose the
//! contexts' search and editor services however fits the application.

pub mod analysis;
pub mod config;
pub mod context;
pub mod indexer;
pub mod probe;
pub mod thumbnails;
pub mod watcher;

pub use analysis::{OcrService, TranscriptionService, VisionLmService};
pub use config::{default_config_path, load_config, Config};
pub use context::{DirectoryContext, DirectoryContextHolder};
pub use indexer::FileIndexer;
pub use probe::FfmpegVideoProber;
pub use thumbnails::ThumbnailManager;
pub use watcher::{DirectoryWatcher, FileEvent};
