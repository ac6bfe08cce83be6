//! Aho-Corasick phrase matcher
//!
//! Finds every occurrence of any known bad phrase inside a text, including
//! overlapping suffix matches. Patterns are normalized at build time and
//! search input is normalized before traversal, so `"b4dw0rd"` matches a
//! `"badword"` pattern. Match positions are code point indices into the
//! normalized text.

use std::sync::Arc;

use aho_corasick::AhoCorasick;
use modgate_core::{normalize, Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A pattern with its moderation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternInfo {
    pub word: String,
    pub category: String,
    pub nsfw_score: f64,
}

/// A single match found in a text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseMatch {
    /// The normalized pattern that matched
    pub word: String,
    /// Start position in code points of the normalized text
    pub position: usize,
    pub category: String,
    pub nsfw_score: f64,
}

struct Automaton {
    /// `None` for the empty pattern set, which matches nothing
    ac: Option<AhoCorasick>,
    patterns: Vec<PatternInfo>,
}

/// Thread-safe phrase matcher with an atomically swappable automaton.
///
/// Readers clone the current automaton handle under a short read lock;
/// a rebuild swaps the handle under the write lock while in-flight
/// searches run to completion on the old automaton.
pub struct PhraseMatcher {
    inner: RwLock<Arc<Automaton>>,
}

impl PhraseMatcher {
    /// Create a matcher with an empty pattern set.
    pub fn new() -> Self {
        let empty = Automaton {
            ac: None,
            patterns: Vec::new(),
        };
        Self {
            inner: RwLock::new(Arc::new(empty)),
        }
    }

    /// Rebuild the automaton from scratch and swap it in.
    pub fn rebuild(&self, patterns: Vec<PatternInfo>) -> Result<()> {
        let normalized: Vec<PatternInfo> = patterns
            .into_iter()
            .map(|p| PatternInfo {
                word: normalize(&p.word),
                ..p
            })
            .filter(|p| !p.word.is_empty())
            .collect();

        let ac = if normalized.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::new(normalized.iter().map(|p| p.word.as_str())).map_err(|e| {
                    Error::config(format!("failed to build pattern automaton: {e}"))
                })?,
            )
        };

        let automaton = Arc::new(Automaton {
            ac,
            patterns: normalized,
        });
        *self.inner.write() = automaton;
        Ok(())
    }

    fn automaton(&self) -> Arc<Automaton> {
        self.inner.read().clone()
    }

    /// Find every pattern occurrence in the text, overlaps included.
    pub fn search(&self, text: &str) -> Vec<PhraseMatch> {
        let automaton = self.automaton();
        let Some(ac) = &automaton.ac else {
            return Vec::new();
        };

        let normalized = normalize(text);
        let char_starts: Vec<usize> = normalized.char_indices().map(|(i, _)| i).collect();

        ac.find_overlapping_iter(&normalized)
            .map(|m| {
                let info = &automaton.patterns[m.pattern().as_usize()];
                let position = char_starts
                    .binary_search(&m.start())
                    .unwrap_or_else(|insert| insert);
                PhraseMatch {
                    word: info.word.clone(),
                    position,
                    category: info.category.clone(),
                    nsfw_score: info.nsfw_score,
                }
            })
            .collect()
    }

    /// Whether any pattern occurs in the text; returns on the first match.
    pub fn has_match(&self, text: &str) -> bool {
        let automaton = self.automaton();
        match &automaton.ac {
            Some(ac) => ac.is_match(normalize(text).as_str()),
            None => false,
        }
    }

    /// Number of patterns in the current automaton.
    pub fn pattern_count(&self) -> usize {
        self.automaton().patterns.len()
    }
}

impl Default for PhraseMatcher {
    fn default() -> Self {
        Self::new()
    }
}
