//! Per-file token frequencies and corpus statistics for BM25.

use std::collections::HashMap;

/// Tracks `token -> count` per file plus the corpus totals BM25 needs.
///
/// Registration and unregistration must be symmetric: unregistering the exact
/// token list that was registered restores the previous state, including the
/// removal of zero-count entries.
#[derive(Debug, Default)]
pub struct TokenStatCounter {
    /// file id -> (token -> occurrences in that file's text)
    item_counts: HashMap<i64, HashMap<String, usize>>,
    /// token -> number of files containing it
    document_frequency: HashMap<String, usize>,
    /// Sum of token-list lengths over all registered files.
    total_token_count: usize,
}

impl TokenStatCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `file_id`'s text consists of `tokens` (repeats allowed).
    pub fn register(&mut self, tokens: &[String], file_id: i64) {
        if tokens.is_empty() {
            return;
        }
        let counts = self.item_counts.entry(file_id).or_default();
        for token in tokens {
            let count = counts.entry(token.clone()).or_insert(0);
            if *count == 0 {
                *self.document_frequency.entry(token.clone()).or_insert(0) += 1;
            }
            *count += 1;
        }
        self.total_token_count += tokens.len();
    }

    /// Reverse a prior [`register`](Self::register) with the same token list.
    pub fn unregister(&mut self, tokens: &[String], file_id: i64) {
        if tokens.is_empty() {
            return;
        }
        let Some(counts) = self.item_counts.get_mut(&file_id) else {
            return;
        };
        for token in tokens {
            if let Some(count) = counts.get_mut(token.as_str()) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(token.as_str());
                    if let Some(df) = self.document_frequency.get_mut(token.as_str()) {
                        *df -= 1;
                        if *df == 0 {
                            self.document_frequency.remove(token.as_str());
                        }
                    }
                }
            }
        }
        if counts.is_empty() {
            self.item_counts.remove(&file_id);
        }
        self.total_token_count = self.total_token_count.saturating_sub(tokens.len());
    }

    /// Occurrences of `token` in the text registered for `file_id`.
    pub fn occurrences(&self, file_id: i64, token: &str) -> usize {
        self.item_counts
            .get(&file_id)
            .and_then(|counts| counts.get(token))
            .copied()
            .unwrap_or(0)
    }

    /// Number of files with registered (non-empty) text.
    pub fn number_of_items(&self) -> usize {
        self.item_counts.len()
    }

    /// Mean token-list length over registered files, 0 if none.
    pub fn avg_item_length(&self) -> f32 {
        if self.item_counts.is_empty() {
            return 0.0;
        }
        self.total_token_count as f32 / self.item_counts.len() as f32
    }

    /// Inverse document frequency: `ln((N - df + 0.5) / (df + 0.5) + 1)`.
    pub fn idf(&self, token: &str) -> f32 {
        let n = self.item_counts.len() as f32;
        let df = self.document_frequency.get(token).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    #[cfg(test)]
    pub(crate) fn item_tokens(&self, file_id: i64) -> Option<&HashMap<String, usize>> {
        self.item_counts.get(&file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_register_counts_occurrences() {
        let mut stats = TokenStatCounter::new();
        stats.register(&tokens(&["cat", "sofa", "cat"]), 1);

        assert_eq!(stats.occurrences(1, "cat"), 2);
        assert_eq!(stats.occurrences(1, "sofa"), 1);
        assert_eq!(stats.occurrences(1, "dog"), 0);
        assert_eq!(stats.number_of_items(), 1);
        assert_eq!(stats.avg_item_length(), 3.0);
    }

    #[test]
    fn test_unregister_restores_previous_state() {
        let mut stats = TokenStatCounter::new();
        stats.register(&tokens(&["cat", "sofa"]), 1);
        stats.register(&tokens(&["dog", "park"]), 2);

        stats.register(&tokens(&["foo", "bar", "foo"]), 3);
        stats.unregister(&tokens(&["foo", "bar", "foo"]), 3);

        assert_eq!(stats.number_of_items(), 2);
        assert_eq!(stats.occurrences(3, "foo"), 0);
        assert!(stats.item_tokens(3).is_none());
        assert_eq!(stats.avg_item_length(), 2.0);
        // df entries for the removed tokens are purged
        assert!((stats.idf("foo") - stats.idf("never-seen")).abs() < 1e-6);
    }

    #[test]
    fn test_idf_decreases_with_document_frequency() {
        let mut stats = TokenStatCounter::new();
        stats.register(&tokens(&["cat"]), 1);
        stats.register(&tokens(&["cat", "dog"]), 2);
        stats.register(&tokens(&["dog"]), 3);
        stats.register(&tokens(&["rare"]), 4);

        assert!(stats.idf("rare") > stats.idf("cat"));
        // both cat and dog appear in two of four files
        assert!((stats.idf("cat") - stats.idf("dog")).abs() < 1e-6);
    }

    #[test]
    fn test_empty_counter() {
        let stats = TokenStatCounter::new();
        assert_eq!(stats.number_of_items(), 0);
        assert_eq!(stats.avg_item_length(), 0.0);
    }

    #[test]
    fn test_unregister_unknown_file_is_noop() {
        let mut stats = TokenStatCounter::new();
        stats.register(&tokens(&["cat"]), 1);
        stats.unregister(&tokens(&["cat"]), 99);

        assert_eq!(stats.occurrences(1, "cat"), 1);
        assert_eq!(stats.number_of_items(), 1);
    }
}
