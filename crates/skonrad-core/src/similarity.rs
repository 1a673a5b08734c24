//! In-memory cosine similarity over dense row matrices.
//!
//! One [`SimilarityCalculator`] exists per semantic dimension; videos use the
//! multi-row variant where a file contributes one row per sampled frame. All
//! vectors are expected to be L2-normalized, so a dot product is a cosine.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::search::SearchResult;

/// Row-major dense matrix with a row <-> file-id bijection.
///
/// Invariant: `row_to_file_id[file_id_to_row[id]] == id` for every id present.
#[derive(Debug, Default)]
pub struct SimilarityCalculator {
    row_to_file_id: Vec<i64>,
    file_id_to_row: HashMap<i64, usize>,
    matrix: Vec<f32>,
    dim: usize,
}

/// Stacks `(file_id, vector)` pairs into a contiguous matrix.
#[derive(Debug, Default)]
pub struct SimilarityCalculatorBuilder {
    row_to_file_id: Vec<i64>,
    file_id_to_row: HashMap<i64, usize>,
    rows: Vec<f32>,
    dim: usize,
}

impl SimilarityCalculatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, file_id: i64, embedding: &[f32]) {
        debug_assert!(self.dim == 0 || self.dim == embedding.len());
        if self.dim == 0 {
            self.dim = embedding.len();
        }
        self.file_id_to_row.insert(file_id, self.row_to_file_id.len());
        self.row_to_file_id.push(file_id);
        self.rows.extend_from_slice(embedding);
    }

    pub fn build(self) -> SimilarityCalculator {
        SimilarityCalculator {
            row_to_file_id: self.row_to_file_id,
            file_id_to_row: self.file_id_to_row,
            matrix: self.rows,
            dim: self.dim,
        }
    }
}

impl SimilarityCalculator {
    pub fn builder() -> SimilarityCalculatorBuilder {
        SimilarityCalculatorBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.row_to_file_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_to_file_id.is_empty()
    }

    pub fn contains(&self, file_id: i64) -> bool {
        self.file_id_to_row.contains_key(&file_id)
    }

    /// Top-k file ids by dot product with `query`, descending; ties break by
    /// row index. `k = None` ranks every row.
    pub fn compute_similarity(&self, query: &[f32], k: Option<usize>) -> Vec<SearchResult> {
        if self.is_empty() {
            return Vec::new();
        }
        let scores: Vec<f32> = self
            .matrix
            .par_chunks(self.dim)
            .map(|row| dot(row, query))
            .collect();

        let mut ranked: Vec<usize> = (0..scores.len()).collect();
        ranked.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(&b))
        });
        let k = k.unwrap_or(ranked.len()).min(ranked.len());
        ranked[..k]
            .iter()
            .map(|&row| SearchResult {
                file_id: self.row_to_file_id[row],
                score: scores[row],
            })
            .collect()
    }

    /// The stored row for `file_id`, if any.
    pub fn get_embedding(&self, file_id: i64) -> Option<&[f32]> {
        let row = *self.file_id_to_row.get(&file_id)?;
        Some(&self.matrix[row * self.dim..(row + 1) * self.dim])
    }

    /// Append a new row for a file not yet present.
    pub fn add(&mut self, file_id: i64, embedding: &[f32]) {
        debug_assert!(!self.contains(file_id));
        if self.dim == 0 {
            self.dim = embedding.len();
        }
        debug_assert_eq!(self.dim, embedding.len());
        self.file_id_to_row.insert(file_id, self.row_to_file_id.len());
        self.row_to_file_id.push(file_id);
        self.matrix.extend_from_slice(embedding);
    }

    /// Overwrite the row of a file already present; adds it if absent.
    pub fn replace(&mut self, file_id: i64, embedding: &[f32]) {
        match self.file_id_to_row.get(&file_id) {
            Some(&row) => {
                self.matrix[row * self.dim..(row + 1) * self.dim].copy_from_slice(embedding);
            }
            None => self.add(file_id, embedding),
        }
    }

    /// Swap-remove the file's row. No-op if the file is absent.
    pub fn delete(&mut self, file_id: i64) {
        let Some(row) = self.file_id_to_row.remove(&file_id) else {
            return;
        };
        let last = self.row_to_file_id.len() - 1;
        if row != last {
            let moved_id = self.row_to_file_id[last];
            let (head, tail) = self.matrix.split_at_mut(last * self.dim);
            head[row * self.dim..(row + 1) * self.dim].copy_from_slice(&tail[..self.dim]);
            self.row_to_file_id[row] = moved_id;
            self.file_id_to_row.insert(moved_id, row);
        }
        self.row_to_file_id.pop();
        self.matrix.truncate(last * self.dim);
    }

    #[cfg(test)]
    fn assert_bijection(&self) {
        for (&id, &row) in &self.file_id_to_row {
            assert_eq!(self.row_to_file_id[row], id);
        }
        assert_eq!(self.row_to_file_id.len(), self.file_id_to_row.len());
        assert_eq!(self.matrix.len(), self.row_to_file_id.len() * self.dim);
    }
}

/// Multi-row variant: one file owns several rows (e.g. one per video frame).
/// Top-k deduplicates by file id, keeping the best-scoring row.
#[derive(Debug, Default)]
pub struct MultiSimilarityCalculator {
    row_to_file_id: Vec<i64>,
    file_id_to_rows: HashMap<i64, Vec<usize>>,
    matrix: Vec<f32>,
    dim: usize,
}

/// Builder for [`MultiSimilarityCalculator`].
#[derive(Debug, Default)]
pub struct MultiSimilarityCalculatorBuilder {
    calculator: MultiSimilarityCalculator,
}

impl MultiSimilarityCalculatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `rows` (row-major, all belonging to `file_id`).
    pub fn add_rows(&mut self, file_id: i64, rows: &[Vec<f32>]) {
        self.calculator.add_rows(file_id, rows);
    }

    pub fn build(self) -> MultiSimilarityCalculator {
        self.calculator
    }
}

impl MultiSimilarityCalculator {
    pub fn builder() -> MultiSimilarityCalculatorBuilder {
        MultiSimilarityCalculatorBuilder::new()
    }

    pub fn is_empty(&self) -> bool {
        self.row_to_file_id.is_empty()
    }

    pub fn contains(&self, file_id: i64) -> bool {
        self.file_id_to_rows.contains_key(&file_id)
    }

    pub fn add_rows(&mut self, file_id: i64, rows: &[Vec<f32>]) {
        if rows.is_empty() {
            return;
        }
        debug_assert!(!self.contains(file_id));
        if self.dim == 0 {
            self.dim = rows[0].len();
        }
        let indices = self.file_id_to_rows.entry(file_id).or_default();
        for row in rows {
            debug_assert_eq!(self.dim, row.len());
            indices.push(self.row_to_file_id.len());
            self.row_to_file_id.push(file_id);
            self.matrix.extend_from_slice(row);
        }
    }

    /// All stored rows of `file_id`, row-major.
    pub fn get_rows(&self, file_id: i64) -> Option<Vec<&[f32]>> {
        let rows = self.file_id_to_rows.get(&file_id)?;
        Some(
            rows.iter()
                .map(|&row| &self.matrix[row * self.dim..(row + 1) * self.dim])
                .collect(),
        )
    }

    /// Swap-remove every row of `file_id`. No-op if absent.
    pub fn delete(&mut self, file_id: i64) {
        let Some(mut rows) = self.file_id_to_rows.remove(&file_id) else {
            return;
        };
        // Remove highest rows first so earlier removals don't shift later ones.
        rows.sort_unstable_by(|a, b| b.cmp(a));
        for row in rows {
            let last = self.row_to_file_id.len() - 1;
            if row != last {
                let moved_id = self.row_to_file_id[last];
                let (head, tail) = self.matrix.split_at_mut(last * self.dim);
                head[row * self.dim..(row + 1) * self.dim].copy_from_slice(&tail[..self.dim]);
                self.row_to_file_id[row] = moved_id;
                if let Some(moved_rows) = self.file_id_to_rows.get_mut(&moved_id) {
                    for r in moved_rows.iter_mut() {
                        if *r == last {
                            *r = row;
                        }
                    }
                }
            }
            self.row_to_file_id.pop();
            self.matrix.truncate(last * self.dim);
        }
    }

    /// Top-k distinct file ids by best row dot product, descending.
    pub fn compute_similarity(&self, query: &[f32], k: Option<usize>) -> Vec<SearchResult> {
        if self.is_empty() {
            return Vec::new();
        }
        let scores: Vec<f32> = self
            .matrix
            .par_chunks(self.dim)
            .map(|row| dot(row, query))
            .collect();

        let mut ranked: Vec<usize> = (0..scores.len()).collect();
        ranked.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(&b))
        });

        let k = k.unwrap_or(self.file_id_to_rows.len());
        let mut seen = std::collections::HashSet::new();
        let mut results = Vec::new();
        for row in ranked {
            if results.len() >= k {
                break;
            }
            let file_id = self.row_to_file_id[row];
            if seen.insert(file_id) {
                results.push(SearchResult {
                    file_id,
                    score: scores[row],
                });
            }
        }
        results
    }

    #[cfg(test)]
    fn assert_bijection(&self) {
        let mut total = 0;
        for (&id, rows) in &self.file_id_to_rows {
            for &row in rows {
                assert_eq!(self.row_to_file_id[row], id);
            }
            total += rows.len();
        }
        assert_eq!(total, self.row_to_file_id.len());
        assert_eq!(self.matrix.len(), self.row_to_file_id.len() * self.dim);
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
