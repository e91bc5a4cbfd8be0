//! Word list storage.
//!
//! Loads the ordered word list once at startup and answers bounded range
//! queries against it. The store is immutable after load and is owned by
//! the event loop, so no locking is needed.

use std::io;
use std::path::Path;
use tracing::info;

/// Immutable, ordered word list.
#[derive(Debug, Clone)]
pub struct WordStore {
    words: Vec<String>,
}

impl WordStore {
    /// Load a word list from a file.
    ///
    /// Tokens are split on line breaks and commas, trimmed, and empty
    /// tokens are discarded. Order is preserved.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let store = Self::parse(&contents);
        info!(path = %path.display(), words = store.len(), "Loaded word list");
        Ok(store)
    }

    /// Build a store from pre-tokenized words.
    pub fn from_words(words: Vec<String>) -> Self {
        Self { words }
    }

    fn parse(contents: &str) -> Self {
        let words = contents
            .lines()
            .flat_map(|line| line.split(','))
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(String::from)
            .collect();
        Self { words }
    }

    /// Number of words in the store.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if the store holds no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Look up a bounded range of words.
    ///
    /// Returns the slice `words[offset .. min(offset + count, len)]` and a
    /// flag that is true when the range reaches (or starts past) the end of
    /// the list. An offset at or past the end yields an empty slice.
    pub fn lookup(&self, offset: usize, count: usize) -> (&[String], bool) {
        let len = self.words.len();
        if offset >= len {
            return (&[], true);
        }
        let end = offset.saturating_add(count).min(len);
        (&self.words[offset..end], offset.saturating_add(count) >= len)
    }
}
