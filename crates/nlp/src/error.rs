//! Error types for vocabulary, embedding and tree handling.

use thiserror::Error;

/// Errors that can occur while loading embeddings or validating trees.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NlpError {
    /// A tree node is neither a well-formed leaf nor a binary merge.
    #[error("Malformed tree: {reason}")]
    MalformedTree { reason: String },

    /// No tree was supplied.
    #[error("Cannot compose an empty tree")]
    EmptyTree,

    /// A leaf refers past the end of the embedding table.
    #[error("Word index {index} out of range for vocabulary of {vocab_size}")]
    IndexOutOfRange { index: usize, vocab_size: usize },

    /// Word not found and no `<OOV>` entry to fall back on.
    #[error("Unknown word: '{word}'")]
    UnknownWord { word: String },

    /// Embedding text file could not be parsed.
    #[error("Format error on line {line}: {message}")]
    Format { line: usize, message: String },

    /// Vocabulary and embedding matrix disagree on the number of rows.
    #[error("Embedding has {rows} rows for {words} words")]
    RowCountMismatch { rows: usize, words: usize },

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for NlpError {
    fn from(e: std::io::Error) -> Self {
        NlpError::Io(e.to_string())
    }
}
