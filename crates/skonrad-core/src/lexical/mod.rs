//! Lexical retrieval: BM25 over lemmatized metadata text.
//!
//! Three engine instances exist per directory (description, OCR text,
//! transcript). They share the lemmatizer but keep independent indices.

mod initializer;
mod reverse_index;
mod token_stats;

pub use initializer::LexicalSearchEngineInitializer;
pub use reverse_index::ReverseIndex;
pub use token_stats::TokenStatCounter;

use std::collections::HashSet;

use anyhow::Result;

use crate::engines::LemmatizerEngine;
use crate::search::SearchResult;

/// Okapi BM25 parameters.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// BM25 search over one text dimension of a directory's files.
pub struct LexicalSearchEngine {
    lemmatizer: LemmatizerEngine,
    pub reverse_index: ReverseIndex,
    pub token_stats: TokenStatCounter,
    config: Bm25Config,
}

impl LexicalSearchEngine {
    pub fn new(lemmatizer: LemmatizerEngine) -> Self {
        Self::with_config(lemmatizer, Bm25Config::default())
    }

    pub fn with_config(lemmatizer: LemmatizerEngine, config: Bm25Config) -> Self {
        Self {
            lemmatizer,
            reverse_index: ReverseIndex::new(),
            token_stats: TokenStatCounter::new(),
            config,
        }
    }

    /// Score every file containing at least one query token, best first.
    ///
    /// The denominator uses the corpus-size to average-length ratio
    /// (`N / avgdl`), not the per-document length.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        if self.reverse_index.is_empty() {
            return Ok(Vec::new());
        }
        let tokens = self.lemmatizer.lemmatize(query).await?;
        Ok(self.score_tokens(&tokens))
    }

    fn score_tokens(&self, tokens: &[String]) -> Vec<SearchResult> {
        let Bm25Config { k1, b } = self.config;
        let num_items = self.token_stats.number_of_items() as f32;
        let avgdl = self.token_stats.avg_item_length();
        if avgdl == 0.0 {
            return Vec::new();
        }

        let mut scores: std::collections::HashMap<i64, f32> = std::collections::HashMap::new();
        let unique: HashSet<&String> = tokens.iter().collect();
        for token in unique {
            let postings = self.reverse_index.lookup(token);
            if postings.is_empty() {
                continue;
            }
            let idf = self.token_stats.idf(token);
            for &file_id in postings {
                let freq = self.token_stats.occurrences(file_id, token) as f32;
                let gain =
                    idf * (freq * (k1 + 1.0)) / (freq + k1 * (1.0 - b + b * num_items / avgdl));
                *scores.entry(file_id).or_insert(0.0) += gain;
            }
        }

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

    /// Register a whitespace-joined lemma string for `file_id`.
    ///
    /// The posting list receives each unique token once; the stat counter
    /// records the full list for term frequencies.
    pub fn register_text(&mut self, lemmatized: &str, file_id: i64) {
        let tokens: Vec<String> = lemmatized.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            return;
        }
        let mut seen = HashSet::new();
        for token in &tokens {
            if seen.insert(token.as_str()) {
                self.reverse_index.add_entry(token, file_id);
            }
        }
        self.token_stats.register(&tokens, file_id);
    }

    /// Reverse of [`register_text`](Self::register_text) for the same string.
    pub fn unregister_text(&mut self, lemmatized: &str, file_id: i64) {
        let tokens: Vec<String> = lemmatized.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            return;
        }
        let mut seen = HashSet::new();
        for token in &tokens {
            if seen.insert(token.as_str()) {
                self.reverse_index.remove_entry(token, file_id);
            }
        }
        self.token_stats.unregister(&tokens, file_id);
    }

    pub fn lemmatizer(&self) -> &LemmatizerEngine {
        &self.lemmatizer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelManager;
    use crate::testing::stub_model_manager;
    use std::sync::Arc;

    fn engine() -> LexicalSearchEngine {
        let manager: Arc<ModelManager> = stub_model_manager();
        LexicalSearchEngine::new(LemmatizerEngine::new(manager))
    }

    #[tokio::test]
    async fn test_single_file_query_matches_description() {
        let mut lex = engine();
        lex.register_text("a cat on a sofa", 1);

        let full = lex.search("a cat on a sofa").await.unwrap();
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].file_id, 1);

        // the full query scores at least as high as any single token
        for token in ["a", "cat", "on", "sofa"] {
            let single = lex.search(token).await.unwrap();
            assert!(single[0].score <= full[0].score);
        }
    }

    #[tokio::test]
    async fn test_unknown_token_matches_nothing() {
        let mut lex = engine();
        lex.register_text("a cat on a sofa", 1);

        let results = lex.search("zebra").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_rarer_token_ranks_higher() {
        let mut lex = engine();
        lex.register_text("cat sofa", 1);
        lex.register_text("cat park", 2);

        let results = lex.search("cat sofa").await.unwrap();
        assert_eq!(results[0].file_id, 1);
        assert_eq!(results.len(), 2);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty() {
        let lex = engine();
        assert!(lex.search("anything").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_unregister_round_trip() {
        let mut lex = engine();
        lex.register_text("cat sofa", 1);
        lex.register_text("foo bar foo", 2);
        lex.unregister_text("foo bar foo", 2);

        assert!(lex.search("foo").await.unwrap().is_empty());
        assert_eq!(lex.reverse_index.lookup("foo"), &[] as &[i64]);
        assert_eq!(lex.token_stats.number_of_items(), 1);
        let results = lex.search("cat").await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
