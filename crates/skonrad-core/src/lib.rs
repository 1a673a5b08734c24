//! skonrad-core: local multi-modal file search primitives.
//!
//! This crate provides:
//! - A streaming BM25 inverted index over lemmatized file metadata
//!   (description, OCR text, transcript)
//! - A content-addressed on-disk embedding store with in-memory cosine
//!   similarity matrices across six semantic dimensions
//! - The search orchestrator: qualifier parsing, per-dimension dispatch,
//!   weighted and reciprocal-rank fusion, filtering and pagination
//! - SQLite persistence for file rows and the directory registry
//! - Refcounted lazy lifecycle management for the external ML models
//! - A dictionary-assisted CTC decoder for speech transcripts

pub mod decoder;
pub mod editor;
pub mod engines;
pub mod file_types;
pub mod lexical;
pub mod models;
pub mod persistence;
pub mod processor;
pub mod query;
pub mod search;
pub mod similarity;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-exports
pub use decoder::{DictionaryAssistedDecoder, TokenSet};
pub use editor::MetadataEditor;
pub use engines::{
    ClipEngine, ClipModel, ImageEmbeddingEngine, ImageEmbeddingModel, LemmatizerEngine,
    LemmatizerModel, OcrEngine, OcrModel, OcrOutput, TextEmbeddingEngine, TextEmbeddingModel,
    TextModelWithConfig, TranscriptionEngine, TranscriptionModel, VideoProber, VisionLmEngine,
    VisionLmModel,
};
pub use file_types::detect_file_type;
pub use lexical::{
    Bm25Config, LexicalSearchEngine, LexicalSearchEngineInitializer, ReverseIndex,
    TokenStatCounter,
};
pub use models::{Model, ModelKind, ModelManager, ModelProvider};
pub use persistence::{EmbeddingPersistor, ExpectedTexts, StoredEmbeddings, TextEmbedding};
pub use processor::{EmbeddingProcessor, TextKind, NUM_VIDEO_FRAMES};
pub use query::{ParsedSearchQuery, SearchMetric, SearchQueryParser};
pub use search::{
    combine_results_with_rescoring, reciprocal_rank_fusion, AggregatedSearchResult, SearchIndexes,
    SearchResult, SearchService, SCORE_UNSET,
};
pub use store::{
    DirectoryRecord, DirectoryRegistry, FileRecord, FileStore, FileType, NewFile, DB_FILE_NAME,
};
