//! Token-id trie over the transcription dictionary.

use std::collections::HashMap;

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<usize, usize>,
    terminal: bool,
}

/// Outcome of walking a token sequence through the trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieSearch {
    /// The full sequence is a dictionary word.
    pub exists: bool,
    /// Length of the longest prefix present in the trie.
    pub prefix_len: usize,
    /// Node reached by the matched prefix.
    pub last_node: usize,
}

/// Prefix tree over dictionary-token sequences.
#[derive(Debug)]
pub struct Trie {
    nodes: Vec<TrieNode>,
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

impl Trie {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
        }
    }

    pub fn insert(&mut self, word: &[usize]) {
        let mut node = 0;
        for &token in word {
            node = match self.nodes[node].children.get(&token) {
                Some(&child) => child,
                None => {
                    self.nodes.push(TrieNode::default());
                    let child = self.nodes.len() - 1;
                    self.nodes[node].children.insert(token, child);
                    child
                }
            };
        }
        self.nodes[node].terminal = true;
    }

    pub fn has(&self, word: &[usize]) -> bool {
        self.search(word).exists
    }

    pub fn search(&self, word: &[usize]) -> TrieSearch {
        let mut node = 0;
        for (depth, token) in word.iter().enumerate() {
            match self.nodes[node].children.get(token) {
                Some(&child) => node = child,
                None => {
                    return TrieSearch {
                        exists: false,
                        prefix_len: depth,
                        last_node: node,
                    }
                }
            }
        }
        TrieSearch {
            exists: self.nodes[node].terminal,
            prefix_len: word.len(),
            last_node: node,
        }
    }

    /// Tokens that extend the prefix ending at `node`.
    pub fn possible_next_tokens(&self, node: usize) -> Vec<usize> {
        let mut tokens: Vec<usize> = self.nodes[node].children.keys().copied().collect();
        tokens.sort_unstable();
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_has() {
        let mut trie = Trie::new();
        trie.insert(&[2, 0, 19]);
        trie.insert(&[2, 0, 19, 18]);

        assert!(trie.has(&[2, 0, 19]));
        assert!(trie.has(&[2, 0, 19, 18]));
        assert!(!trie.has(&[2, 0]));
        assert!(!trie.has(&[3, 14, 6]));
    }

    #[test]
    fn test_search_reports_prefix() {
        let mut trie = Trie::new();
        trie.insert(&[2, 0, 19]);

        let search = trie.search(&[2, 0, 7]);
        assert!(!search.exists);
        assert_eq!(search.prefix_len, 2);

        let prefix = trie.search(&[2, 0]);
        assert!(!prefix.exists);
        assert_eq!(prefix.prefix_len, 2);
        assert_eq!(trie.possible_next_tokens(prefix.last_node), vec![19]);
    }

    #[test]
    fn test_possible_next_tokens_at_root() {
        let mut trie = Trie::new();
        trie.insert(&[1]);
        trie.insert(&[3]);
        assert_eq!(trie.possible_next_tokens(0), vec![1, 3]);
    }
}
