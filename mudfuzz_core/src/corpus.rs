use rand::Rng;
use rand_core::RngCore;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::LazyLock;

/// Default number of words kept by a [`MemoryCorpus`].
pub const DEFAULT_MEMORY_CAPACITY: usize = 300;

/// Returned by [`MemoryCorpus::random_word`] when nothing has been remembered yet.
pub const FALLBACK_WORD: &str = "memory";

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("ANSI escape pattern is valid")
});

/// Removes terminal control/escape sequences (CSI and two-byte `ESC x` forms).
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Splits server output into lowercase ASCII alphanumeric words.
///
/// Escape sequences are removed first, then every character that is neither
/// alphanumeric nor whitespace is dropped, so `"The Sword."` yields
/// `["the", "sword"]` and `"don't"` yields `["dont"]`.
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = strip_ansi(text)
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().map(str::to_owned).collect()
}

/// A bounded, insertion-ordered memory of words recently seen from the server.
///
/// Fuzz commands draw from it to produce input that refers to things the
/// server actually mentioned. When full, the oldest word is evicted first.
#[derive(Debug, Clone)]
pub struct MemoryCorpus {
    words: VecDeque<String>,
    capacity: usize,
}

impl MemoryCorpus {
    /// Creates an empty corpus. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            words: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Appends one word, evicting the oldest if the corpus is full.
    pub fn push(&mut self, word: String) {
        if self.words.len() == self.capacity {
            self.words.pop_front();
        }
        self.words.push_back(word);
    }

    /// Tokenizes `text` and appends every resulting word. Returns how many were added.
    pub fn remember(&mut self, text: &str) -> usize {
        let words = tokenize(text);
        let added = words.len();
        for word in words {
            self.push(word);
        }
        added
    }

    /// Uniformly picks a remembered word, or [`FALLBACK_WORD`] if the corpus is empty.
    pub fn random_word(&self, rng: &mut dyn RngCore) -> &str {
        if self.words.is_empty() {
            return FALLBACK_WORD;
        }
        let index = rng.random_range(0..self.words.len());
        &self.words[index]
    }

    /// Words from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }
}

impl Default for MemoryCorpus {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}
