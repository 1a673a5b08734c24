//! Dictionary-assisted greedy CTC decoding for speech transcripts.
//!
//! Raw CTC argmax output over noisy audio drifts into non-words. This decoder
//! walks the frame-level distribution word by word (words are delimited by the
//! silence token) and checks each candidate against a dictionary:
//! - known words are accepted greedily,
//! - a word that merges with the previous one into a known word is merged,
//! - an unfinished dictionary prefix may be continued by looking a few frames
//!   ahead for a plausible next letter,
//! - otherwise nearby dictionary words (bounded Levenshtein distance) and
//!   two-word splits are scored by their best monotone frame alignment and
//!   the likeliest repair wins. Words with no viable repair are kept as-is.

mod bktree;
mod trie;

pub use bktree::{levenshtein, BkTree};
pub use trie::{Trie, TrieSearch};

use std::collections::HashMap;

/// How many frames past a tentative word end are inspected when the word is a
/// strict prefix of dictionary entries.
const LOOK_AHEAD_FRAMES: usize = 5;

/// Argmax confidence below which a word boundary is treated as uncertain.
const UNCERTAIN_BOUNDARY_PROB: f32 = 0.9;

/// Minimum probability for a looked-ahead letter to extend the word.
const CONTINUATION_PROB: f32 = 0.25;

/// The CTC alphabet: special tokens first, then letters.
#[derive(Debug, Clone)]
pub struct TokenSet {
    tokens: Vec<char>,
    blank_id: usize,
    silence_id: usize,
    num_special: usize,
    id_by_token: HashMap<char, usize>,
}

impl TokenSet {
    /// Alphabet with the conventional layout: blank, silence, then `letters`.
    pub fn new(letters: &str) -> Self {
        let mut tokens = vec!['\0', ' '];
        tokens.extend(letters.chars());
        let id_by_token = tokens
            .iter()
            .enumerate()
            .skip(2)
            .map(|(id, &c)| (c, id))
            .collect();
        Self {
            tokens,
            blank_id: 0,
            silence_id: 1,
            num_special: 2,
            id_by_token,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn char_of(&self, id: usize) -> char {
        self.tokens[id]
    }

    fn id_of(&self, c: char) -> Option<usize> {
        self.id_by_token.get(&c).copied()
    }

    /// Letter ids relative to the dictionary alphabet (specials stripped).
    fn to_dictionary(&self, ids: &[usize]) -> Vec<usize> {
        ids.iter().map(|&id| id - self.num_special).collect()
    }
}

/// Greedy CTC decoder with dictionary-guided correction.
pub struct DictionaryAssistedDecoder {
    token_set: TokenSet,
    dictionary: Trie,
    correction_tree: BkTree,
}

impl DictionaryAssistedDecoder {
    pub fn new<I, S>(token_set: TokenSet, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dictionary = Trie::new();
        let mut correction_tree = BkTree::new();
        for word in words {
            let word = word.as_ref();
            let ids: Option<Vec<usize>> =
                word.chars().map(|c| token_set.id_of(c)).collect();
            if let Some(ids) = ids {
                dictionary.insert(&token_set.to_dictionary(&ids));
                correction_tree.insert(word);
            } else {
                tracing::warn!("skipping dictionary word with unknown letters: {word}");
            }
        }
        Self {
            token_set,
            dictionary,
            correction_tree,
        }
    }

    /// Decode a `frames x vocabulary` logit matrix into text.
    pub fn decode(&self, logits: &[Vec<f32>]) -> String {
        if logits.is_empty() {
            return String::new();
        }
        let mut run = DecodeRun::new(self, logits);
        run.run();
        self.render(&run.predicted)
    }

    fn render(&self, ids: &[usize]) -> String {
        let mut text = String::new();
        for &id in ids {
            if id == self.token_set.blank_id {
                continue;
            }
            if id == self.token_set.silence_id {
                text.push(' ');
            } else {
                text.push(self.token_set.char_of(id));
            }
        }
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

enum Finalized {
    /// Word emitted; continue scanning after the boundary.
    Done,
    /// Look-ahead extended the word; resume scanning at this frame.
    Resume { next_frame: usize, word: Vec<usize> },
}

struct DecodeRun<'a> {
    decoder: &'a DictionaryAssistedDecoder,
    probs: Vec<Vec<f32>>,
    log_probs: Vec<Vec<f32>>,
    argmax: Vec<usize>,
    predicted: Vec<usize>,
    previous_word: Option<Vec<usize>>,
}

impl<'a> DecodeRun<'a> {
    fn new(decoder: &'a DictionaryAssistedDecoder, logits: &[Vec<f32>]) -> Self {
        let probs: Vec<Vec<f32>> = logits.iter().map(|row| softmax(row)).collect();
        let log_probs = probs
            .iter()
            .map(|row| row.iter().map(|p| p.max(f32::MIN_POSITIVE).ln()).collect())
            .collect();
        let argmax = probs.iter().map(|row| argmax_index(row)).collect();
        Self {
            decoder,
            probs,
            log_probs,
            argmax,
            predicted: Vec::new(),
            previous_word: None,
        }
    }

    fn run(&mut self) {
        let n = self.argmax.len();
        let mut word_start = 0;
        while word_start < n {
            word_start = self.scan_word(word_start);
        }
    }

    /// Consume one word starting at `word_start`; returns the next start.
    fn scan_word(&mut self, word_start: usize) -> usize {
        let n = self.argmax.len();
        let blank = self.decoder.token_set.blank_id;
        let silence = self.decoder.token_set.silence_id;

        let mut word: Vec<usize> = Vec::new();
        let mut i = word_start;
        while i < n {
            let top = self.argmax[i];
            if word.is_empty() && (top == blank || top == silence) {
                return word_start + 1;
            }
            if top == blank && i < n - 1 {
                i += 1;
                continue;
            }
            if top == silence || top == blank || i == n - 1 {
                if top != silence && top != blank && (word.is_empty() || top != self.argmax[i - 1])
                {
                    word.push(top);
                }
                let word_end = if top == silence || top == blank { i - 1 } else { i };
                match self.finalize_word(word, word_start, word_end, i) {
                    Finalized::Done => return i + 1,
                    Finalized::Resume { next_frame, word: continued } => {
                        word = continued;
                        i = next_frame;
                        continue;
                    }
                }
            }
            if word.is_empty() || top != self.argmax[i - 1] {
                word.push(top);
            }
            i += 1;
        }
        n
    }

    /// Decide what the collected letters become: accept, merge, continue via
    /// look-ahead, or repair.
    fn finalize_word(
        &mut self,
        mut word: Vec<usize>,
        word_start: usize,
        word_end: usize,
        boundary: usize,
    ) -> Finalized {
        if word.is_empty() {
            return Finalized::Done;
        }
        let n = self.argmax.len();
        let token_set = &self.decoder.token_set;
        let search = self.decoder.dictionary.search(&token_set.to_dictionary(&word));
        if search.exists {
            self.accept(&word);
            self.previous_word = Some(word);
            return Finalized::Done;
        }

        if let Some(previous) = &self.previous_word {
            let mut combined = previous.clone();
            combined.extend_from_slice(&word);
            if self.decoder.dictionary.has(&token_set.to_dictionary(&combined)) {
                // drop the separator emitted after the previous word
                self.predicted.pop();
                self.accept(&word);
                self.previous_word = Some(word);
                return Finalized::Done;
            }
        }

        // An unfinished dictionary prefix at a shaky boundary: look a few
        // frames ahead for a letter that keeps it inside the dictionary.
        let boundary_prob = self
            .probs
            .get(boundary)
            .map(|row| row[self.argmax[boundary]])
            .unwrap_or(1.0);
        if boundary < n - 1
            && boundary_prob < UNCERTAIN_BOUNDARY_PROB
            && search.prefix_len == word.len()
        {
            let continuations = self.decoder.dictionary.possible_next_tokens(search.last_node);
            if !continuations.is_empty() {
                for frame in boundary..(boundary + LOOK_AHEAD_FRAMES).min(n) {
                    let best = continuations
                        .iter()
                        .map(|&t| t + token_set.num_special)
                        .max_by(|&a, &b| {
                            self.probs[frame][a]
                                .partial_cmp(&self.probs[frame][b])
                                .unwrap_or(std::cmp::Ordering::Equal)
                        });
                    if let Some(token) = best {
                        if self.probs[frame][token] > CONTINUATION_PROB {
                            word.push(token);
                            return Finalized::Resume {
                                next_frame: frame + 1,
                                word,
                            };
                        }
                    }
                }
            }
        }

        let max_dist = if word.len() <= 3 { 1 } else { 2 };
        let whole = self.correct_word(&word, word_start, word_end, max_dist);
        let split = self.split_and_correct(&word, word_start, word_end);

        match (whole, split) {
            (None, None) => {
                // no viable repair, keep the raw letters
                self.accept(&word);
                self.previous_word = Some(word);
            }
            (whole, Some((first, second, split_lp)))
                if whole.as_ref().is_none_or(|&(_, lp)| split_lp > lp) =>
            {
                self.accept(&first);
                self.accept(&second);
                self.previous_word = Some(second);
            }
            (Some((tokens, _)), _) => {
                self.accept(&tokens);
                self.previous_word = Some(tokens);
            }
            (None, Some(_)) => unreachable!("split arm above covers whole == None"),
        }
        Finalized::Done
    }

    /// Emit a word followed by the silence separator, inserting blanks between
    /// equal consecutive letters so CTC collapse keeps both.
    fn accept(&mut self, tokens: &[usize]) {
        let blank = self.decoder.token_set.blank_id;
        for (index, &token) in tokens.iter().enumerate() {
            if index > 0 && tokens[index - 1] == token {
                self.predicted.push(blank);
            }
            self.predicted.push(token);
        }
        self.predicted.push(self.decoder.token_set.silence_id);
    }

    /// Best dictionary word within `max_dist` edits, scored by alignment.
    fn correct_word(
        &self,
        word: &[usize],
        start: usize,
        end: usize,
        max_dist: usize,
    ) -> Option<(Vec<usize>, f32)> {
        let token_set = &self.decoder.token_set;
        let word_str: String = word.iter().map(|&id| token_set.char_of(id)).collect();
        let mut best: Option<(Vec<usize>, f32)> = None;
        for (candidate, distance) in self.decoder.correction_tree.search(&word_str, max_dist) {
            if distance == 0 {
                continue;
            }
            let tokens: Option<Vec<usize>> =
                candidate.chars().map(|c| token_set.id_of(c)).collect();
            let Some(tokens) = tokens else { continue };
            let lp = self.best_alignment_log_prob(&tokens, start, end);
            if lp.is_finite() && best.as_ref().is_none_or(|&(_, best_lp)| lp > best_lp) {
                best = Some((tokens, lp));
            }
        }
        best
    }

    /// Try splitting into two words, repairing each side independently.
    fn split_and_correct(
        &self,
        word: &[usize],
        start: usize,
        end: usize,
    ) -> Option<(Vec<usize>, Vec<usize>, f32)> {
        if word.len() < 3 {
            return None;
        }
        let mut best: Option<(Vec<usize>, Vec<usize>, f32)> = None;
        for split_pos in 2..word.len().saturating_sub(2) {
            let (first_raw, second_raw) = word.split_at(split_pos);
            let first_frames = (start, start + split_pos - 1);
            let second_frames = (start + split_pos, end);

            let first = self.resolve_part(first_raw, first_frames);
            let second = self.resolve_part(second_raw, second_frames);
            let (Some((first, first_lp)), Some((second, second_lp))) = (first, second) else {
                continue;
            };
            let lp = first_lp + second_lp;
            if best.as_ref().is_none_or(|&(_, _, best_lp)| lp > best_lp) {
                best = Some((first, second, lp));
            }
        }
        best
    }

    /// A split part either already is a dictionary word (scored as-is) or
    /// must repair within one edit.
    fn resolve_part(
        &self,
        part: &[usize],
        frames: (usize, usize),
    ) -> Option<(Vec<usize>, f32)> {
        let token_set = &self.decoder.token_set;
        if self.decoder.dictionary.has(&token_set.to_dictionary(part)) {
            let lp = self.best_alignment_log_prob(part, frames.0, frames.1);
            if lp.is_finite() {
                return Some((part.to_vec(), lp));
            }
            return None;
        }
        self.correct_word(part, frames.0, frames.1, 1)
    }

    /// Log probability of the best monotone assignment of `tokens` to the
    /// frame range `[start, end]`, with blanks filling the gaps.
    fn best_alignment_log_prob(&self, tokens: &[usize], start: usize, end: usize) -> f32 {
        let frames = end + 1 - start;
        if tokens.len() > frames || tokens.is_empty() {
            return f32::NEG_INFINITY;
        }
        let blank = self.decoder.token_set.blank_id;
        let mut table = vec![vec![f32::NEG_INFINITY; frames + 1]; tokens.len() + 1];
        table[0][0] = 0.0;
        for j in 1..=frames {
            table[0][j] = table[0][j - 1] + self.log_probs[start + j - 1][blank];
        }
        for i in 1..=tokens.len() {
            for j in i..=frames {
                let take = self.log_probs[start + j - 1][tokens[i - 1]];
                let blank_lp = self.log_probs[start + j - 1][blank];
                table[i][j] = if i == j {
                    table[i - 1][j - 1] + take
                } else {
                    (table[i][j - 1] + blank_lp).max(table[i - 1][j - 1] + take)
                };
            }
        }
        table[tokens.len()][frames]
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|x| x / sum).collect()
}

fn argmax_index(values: &[f32]) -> usize {
    let mut best = 0;
    for (index, &value) in values.iter().enumerate() {
        if value > values[best] {
            best = index;
        }
    }
    best
}
