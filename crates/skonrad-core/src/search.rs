//! Search orchestration: metric dispatch, score fusion, filtering and
//! pagination over one directory's indexes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::lexical::LexicalSearchEngine;
use crate::processor::EmbeddingProcessor;
use crate::query::{ParsedSearchQuery, SearchMetric, SearchQueryParser};
use crate::store::{FileRecord, FileStore};

/// RRF dampening constant.
const RRF_K: f32 = 60.0;

/// Weights for the hybrid fusion of [combined lexical, combined semantic,
/// clip].
const HYBRID_WEIGHTS: [f32; 3] = [1.0, 1.0, 2.0];

/// Weights for the [description, ocr, transcript] combination.
const TEXT_DIMENSION_WEIGHTS: [f32; 3] = [0.5, 0.3, 0.2];

/// Weights for the [clip image, clip video] combination.
const CLIP_WEIGHTS: [f32; 2] = [0.5, 0.5];

/// Result count for reverse ("find similar") lookups.
const SIMILAR_ITEMS_K: usize = 100;

/// Sentinel for score components that did not participate in a search.
pub const SCORE_UNSET: f32 = -1.0;

/// A scored file id from a single retrieval dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchResult {
    pub file_id: i64,
    pub score: f32,
}

/// A fully resolved search hit.
///
/// `lexical_score` and `dense_score` are only populated where the metric
/// actually produced them; [`SCORE_UNSET`] (-1) marks the rest. Reverse
/// lookups report `dense_score = total_score` and `lexical_score = 0`.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedSearchResult {
    pub file: FileRecord,
    pub lexical_score: f32,
    pub dense_score: f32,
    pub total_score: f32,
}

/// Sum `score * weight` per id across result lists; weights must sum to 1.
pub fn combine_results_with_rescoring(
    all_results: &[Vec<SearchResult>],
    weights: &[f32],
) -> Vec<SearchResult> {
    assert_eq!(all_results.len(), weights.len());
    assert!((weights.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    let mut scores: HashMap<i64, f32> = HashMap::new();
    for (results, &weight) in all_results.iter().zip(weights) {
        for result in results {
            *scores.entry(result.file_id).or_insert(0.0) += result.score * weight;
        }
    }
    sorted_results(scores)
}

/// Reciprocal rank fusion: each list contributes `weight / (k + rank)` with
/// ranks starting at 1. `weights = None` weighs every list equally.
pub fn reciprocal_rank_fusion(
    all_results: &[Vec<SearchResult>],
    weights: Option<&[f32]>,
) -> Vec<SearchResult> {
    if let Some(weights) = weights {
        assert_eq!(all_results.len(), weights.len());
    }
    let mut scores: HashMap<i64, f32> = HashMap::new();
    for (list_index, results) in all_results.iter().enumerate() {
        let weight = weights.map(|w| w[list_index]).unwrap_or(1.0);
        for (rank, result) in results.iter().enumerate() {
            *scores.entry(result.file_id).or_insert(0.0) +=
                weight / (RRF_K + (rank + 1) as f32);
        }
    }
    sorted_results(scores)
}

fn sorted_results(scores: HashMap<i64, f32>) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = scores
        .into_iter()
        .map(|(file_id, score)| SearchResult { file_id, score })
        .collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.file_id.cmp(&b.file_id))
    });
    results
}

/// The mutable per-directory index state guarded by the directory lock:
/// writers (edits, file events) take the write side, queries the read side.
pub struct SearchIndexes {
    pub description_lexical: LexicalSearchEngine,
    pub ocr_lexical: LexicalSearchEngine,
    pub transcript_lexical: LexicalSearchEngine,
    pub embeddings: EmbeddingProcessor,
}

impl SearchIndexes {
    /// Register a newly indexed file's text fields with the lexical engines,
    /// lemmatizing and persisting any missing lemma strings.
    pub async fn index_new_file(&mut self, store: &FileStore, file: &mut FileRecord) -> Result<()> {
        let mut dirty = false;
        if !file.description.is_empty() {
            if file.lemmatized_description.is_none() {
                let lemmas = self
                    .description_lexical
                    .lemmatizer()
                    .lemmatize(&file.description)
                    .await?;
                file.lemmatized_description = Some(lemmas.join(" "));
                dirty = true;
            }
            if let Some(lemmas) = file.lemmatized_description.as_deref() {
                self.description_lexical.register_text(lemmas, file.id);
            }
        }
        if file.is_ocr_analyzed {
            if let Some(ocr_text) = file.ocr_text.clone().filter(|t| !t.is_empty()) {
                if file.lemmatized_ocr_text.is_none() {
                    let lemmas = self.ocr_lexical.lemmatizer().lemmatize(&ocr_text).await?;
                    file.lemmatized_ocr_text = Some(lemmas.join(" "));
                    dirty = true;
                }
                if let Some(lemmas) = file.lemmatized_ocr_text.as_deref() {
                    self.ocr_lexical.register_text(lemmas, file.id);
                }
            }
        }
        if file.is_transcript_analyzed {
            if let Some(transcript) = file.transcript.clone().filter(|t| !t.is_empty()) {
                if file.lemmatized_transcript.is_none() {
                    let lemmas = self
                        .transcript_lexical
                        .lemmatizer()
                        .lemmatize(&transcript)
                        .await?;
                    file.lemmatized_transcript = Some(lemmas.join(" "));
                    dirty = true;
                }
                if let Some(lemmas) = file.lemmatized_transcript.as_deref() {
                    self.transcript_lexical.register_text(lemmas, file.id);
                }
            }
        }
        if dirty {
            store.update_file(file)?;
        }
        Ok(())
    }

    /// Drop every indexed token of a deleted file from the lexical engines.
    pub fn unindex_file(&mut self, file: &FileRecord) {
        if let Some(lemmas) = file.lemmatized_description.as_deref() {
            self.description_lexical.unregister_text(lemmas, file.id);
        }
        if let Some(lemmas) = file.lemmatized_ocr_text.as_deref() {
            self.ocr_lexical.unregister_text(lemmas, file.id);
        }
        if let Some(lemmas) = file.lemmatized_transcript.as_deref() {
            self.transcript_lexical.unregister_text(lemmas, file.id);
        }
    }
}

/// Per-directory search facade.
pub struct SearchService {
    store: Arc<FileStore>,
    parser: SearchQueryParser,
    indexes: Arc<RwLock<SearchIndexes>>,
}

impl SearchService {
    pub fn new(store: Arc<FileStore>, indexes: Arc<RwLock<SearchIndexes>>) -> Self {
        Self {
            store,
            parser: SearchQueryParser::new(),
            indexes,
        }
    }

    /// Parse, dispatch, filter and paginate. Returns the page and the total
    /// number of matches after filtering.
    pub async fn search(
        &self,
        raw_query: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<(Vec<AggregatedSearchResult>, usize)> {
        let parsed = self.parser.parse(raw_query);
        let query_text = parsed.query_text.clone();

        let mut aggregated = if query_text.is_empty() {
            self.all_files_with_unit_score()?
        } else if let Some(file) = self.store.get_file_by_name(&query_text)? {
            vec![AggregatedSearchResult {
                file,
                lexical_score: SCORE_UNSET,
                dense_score: SCORE_UNSET,
                total_score: 1.0,
            }]
        } else {
            self.dispatch(&parsed, &query_text).await?
        };

        aggregated.retain(|result| Self::matches_filters(&parsed, &result.file));
        let total = aggregated.len();
        let end = limit.map_or(total, |limit| (offset + limit).min(total));
        let page = if offset >= total {
            Vec::new()
        } else {
            aggregated[offset..end].to_vec()
        };
        Ok((page, total))
    }

    async fn dispatch(
        &self,
        parsed: &ParsedSearchQuery,
        query: &str,
    ) -> Result<Vec<AggregatedSearchResult>> {
        let indexes = self.indexes.read().await;
        let mut lexical_components: HashMap<i64, f32> = HashMap::new();
        let mut dense_components: HashMap<i64, f32> = HashMap::new();

        let results = match parsed.search_metric {
            SearchMetric::Hybrid => {
                let lexical = Self::combined_lexical(&indexes, query).await?;
                let semantic = Self::combined_semantic(&indexes, query).await?;
                let clip = Self::combined_clip(&indexes, query).await?;
                lexical_components =
                    lexical.iter().map(|r| (r.file_id, r.score)).collect();
                dense_components =
                    semantic.iter().map(|r| (r.file_id, r.score)).collect();
                reciprocal_rank_fusion(&[lexical, semantic, clip], Some(&HYBRID_WEIGHTS))
            }
            SearchMetric::CombinedLexical => Self::combined_lexical(&indexes, query).await?,
            SearchMetric::CombinedSemantic => Self::combined_semantic(&indexes, query).await?,
            SearchMetric::DescriptionLexical => indexes.description_lexical.search(query).await?,
            SearchMetric::DescriptionSemantic => {
                indexes.embeddings.search_description_based(query, None).await?
            }
            SearchMetric::OcrTextLexical => indexes.ocr_lexical.search(query).await?,
            SearchMetric::OcrTextSemantic => {
                indexes.embeddings.search_ocr_text_based(query, None).await?
            }
            SearchMetric::TranscriptLexical => indexes.transcript_lexical.search(query).await?,
            SearchMetric::TranscriptSemantic => {
                indexes
                    .embeddings
                    .search_transcription_text_based(query, None)
                    .await?
            }
            SearchMetric::Clip => Self::combined_clip(&indexes, query).await?,
        };
        drop(indexes);

        let ids: HashSet<i64> = results.iter().map(|r| r.file_id).collect();
        let files = self.store.get_files_by_ids(&ids)?;
        Ok(results
            .into_iter()
            .filter_map(|result| {
                let file = files.get(&result.file_id)?.clone();
                Some(AggregatedSearchResult {
                    file,
                    lexical_score: lexical_components
                        .get(&result.file_id)
                        .copied()
                        .unwrap_or(SCORE_UNSET),
                    dense_score: dense_components
                        .get(&result.file_id)
                        .copied()
                        .unwrap_or(SCORE_UNSET),
                    total_score: result.score,
                })
            })
            .collect())
    }

    async fn combined_lexical(indexes: &SearchIndexes, query: &str) -> Result<Vec<SearchResult>> {
        Ok(combine_results_with_rescoring(
            &[
                indexes.description_lexical.search(query).await?,
                indexes.ocr_lexical.search(query).await?,
                indexes.transcript_lexical.search(query).await?,
            ],
            &TEXT_DIMENSION_WEIGHTS,
        ))
    }

    async fn combined_semantic(indexes: &SearchIndexes, query: &str) -> Result<Vec<SearchResult>> {
        Ok(combine_results_with_rescoring(
            &[
                indexes.embeddings.search_description_based(query, None).await?,
                indexes.embeddings.search_ocr_text_based(query, None).await?,
                indexes
                    .embeddings
                    .search_transcription_text_based(query, None)
                    .await?,
            ],
            &TEXT_DIMENSION_WEIGHTS,
        ))
    }

    async fn combined_clip(indexes: &SearchIndexes, query: &str) -> Result<Vec<SearchResult>> {
        Ok(combine_results_with_rescoring(
            &[
                indexes.embeddings.search_clip_based(query, None).await?,
                indexes.embeddings.search_clip_video_based(query, None).await?,
            ],
            &CLIP_WEIGHTS,
        ))
    }

    /// Files whose descriptions are semantically closest to the given file's.
    pub async fn find_items_with_similar_descriptions(
        &self,
        file_id: i64,
    ) -> Result<Vec<AggregatedSearchResult>> {
        let file = self.get_file(file_id)?;
        let indexes = self.indexes.read().await;
        let results = indexes
            .embeddings
            .find_items_with_similar_descriptions(&file, Some(SIMILAR_ITEMS_K));
        drop(indexes);
        self.aggregate_similarity_results(results)
    }

    /// Images visually closest to the given image file.
    pub async fn find_visually_similar_images(
        &self,
        file_id: i64,
    ) -> Result<Vec<AggregatedSearchResult>> {
        let file = self.get_file(file_id)?;
        let indexes = self.indexes.read().await;
        let results = indexes
            .embeddings
            .find_visually_similar_images(&file, Some(SIMILAR_ITEMS_K))
            .await?;
        drop(indexes);
        self.aggregate_similarity_results(results)
    }

    /// Videos whose sampled frames are closest to the given video's.
    pub async fn find_visually_similar_videos(
        &self,
        file_id: i64,
    ) -> Result<Vec<AggregatedSearchResult>> {
        let file = self.get_file(file_id)?;
        let indexes = self.indexes.read().await;
        let results = indexes
            .embeddings
            .find_visually_similar_videos(&file, Some(SIMILAR_ITEMS_K));
        drop(indexes);
        self.aggregate_similarity_results(results)
    }

    /// Indexed images visually closest to an uploaded image.
    pub async fn find_visually_similar_images_to_image(
        &self,
        image_bytes: &[u8],
    ) -> Result<Vec<AggregatedSearchResult>> {
        let image = image::load_from_memory(image_bytes).context("failed to decode image")?;
        let indexes = self.indexes.read().await;
        let results = indexes
            .embeddings
            .find_visually_similar_images_to_image(image, Some(SIMILAR_ITEMS_K))
            .await?;
        drop(indexes);
        self.aggregate_similarity_results(results)
    }

    fn all_files_with_unit_score(&self) -> Result<Vec<AggregatedSearchResult>> {
        Ok(self
            .store
            .load_all_files()?
            .into_iter()
            .map(|file| AggregatedSearchResult {
                file,
                lexical_score: SCORE_UNSET,
                dense_score: SCORE_UNSET,
                total_score: 1.0,
            })
            .collect())
    }

    fn aggregate_similarity_results(
        &self,
        results: Vec<SearchResult>,
    ) -> Result<Vec<AggregatedSearchResult>> {
        let ids: HashSet<i64> = results.iter().map(|r| r.file_id).collect();
        let files = self.store.get_files_by_ids(&ids)?;
        Ok(results
            .into_iter()
            .filter_map(|result| {
                let file = files.get(&result.file_id)?.clone();
                Some(AggregatedSearchResult {
                    file,
                    lexical_score: 0.0,
                    dense_score: result.score,
                    total_score: result.score,
                })
            })
            .collect())
    }

    fn get_file(&self, file_id: i64) -> Result<FileRecord> {
        match self.store.get_file_by_id(file_id)? {
            Some(file) => Ok(file),
            None => bail!("no file with id {file_id}"),
        }
    }

    fn matches_filters(parsed: &ParsedSearchQuery, file: &FileRecord) -> bool {
        if let Some(file_type) = parsed.file_type {
            if file.file_type != file_type {
                return false;
            }
        }
        if parsed.only_screenshot && !file.is_screenshot {
            return false;
        }
        if parsed.no_screenshots && file.is_screenshot {
            return false;
        }
        true
    }
}
