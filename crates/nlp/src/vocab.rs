//! # Vocabulary
//!
//! Maps words to row indices of an embedding table. Index 0 is
//! conventionally the out-of-vocabulary sentinel [`OOV_SYM`].

use crate::NlpError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The out-of-vocabulary sentinel.
pub const OOV_SYM: &str = "<OOV>";

/// Occurrence counts keyed by word (or phrase).
pub type Counts = HashMap<String, usize>;

/// Count every word in `words`.
pub fn count_words<'a>(words: impl IntoIterator<Item = &'a str>) -> Counts {
    let mut counts = Counts::new();
    for w in words {
        *counts.entry(w.to_string()).or_insert(0) += 1;
    }
    counts
}

/// An ordered word list with a reverse index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    words: Vec<String>,
    index: HashMap<String, usize>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `word` unless already present; returns its index either way.
    pub fn push(&mut self, word: &str) -> usize {
        if let Some(&i) = self.index.get(word) {
            return i;
        }
        let i = self.words.len();
        self.words.push(word.to_string());
        self.index.insert(word.to_string(), i);
        i
    }

    pub fn get_index(&self, word: &str) -> Option<usize> {
        self.index.get(word).copied()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.index.contains_key(word)
    }

    pub fn word(&self, index: usize) -> Option<&str> {
        self.words.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    /// Index of [`OOV_SYM`], if the vocabulary has one.
    pub fn oov_index(&self) -> Option<usize> {
        self.get_index(OOV_SYM)
    }

    /// Map words to indices, sending unknown words to `<OOV>`.
    ///
    /// Fails with [`NlpError::UnknownWord`] only if a word is unknown and
    /// the vocabulary has no `<OOV>` entry.
    pub fn convert<S: AsRef<str>>(&self, words: &[S]) -> Result<Vec<usize>, NlpError> {
        words
            .iter()
            .map(|w| {
                let w = w.as_ref();
                self.get_index(w)
                    .or_else(|| self.oov_index())
                    .ok_or_else(|| NlpError::UnknownWord {
                        word: w.to_string(),
                    })
            })
            .collect()
    }
}

impl From<Vec<String>> for Vocabulary {
    fn from(words: Vec<String>) -> Self {
        let mut vocab = Vocabulary::new();
        for w in &words {
            vocab.push(w);
        }
        vocab
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.words
    }
}

impl<'a> FromIterator<&'a str> for Vocabulary {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut vocab = Vocabulary::new();
        for w in iter {
            vocab.push(w);
        }
        vocab
    }
}

impl PartialEq for Vocabulary {
    fn eq(&self, other: &Self) -> bool {
        self.words == other.words
    }
}
