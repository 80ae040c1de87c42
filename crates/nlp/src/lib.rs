//! # NLP - Vocabulary, Embeddings and Parse Trees
//!
//! The inputs of recursive composition:
//!
//! - [`Vocabulary`] maps words to row indices, with `<OOV>` fallback
//! - [`EmbeddingTable`] holds the `V × D` word vectors and their text format
//! - [`TreeNode`] is a validated binary parse tree over word indices
//! - [`stopwords`] lists common function words
//!
//! ## Example
//!
//! ```rust
//! use rootalign_nlp::{EmbeddingTable, TreeNode};
//!
//! let table = EmbeddingTable::from_rows(&[
//!     ("<OOV>", vec![0.0, 0.0, 0.0]),
//!     ("cat", vec![0.1, 0.2, 0.3]),
//!     ("sat", vec![0.4, 0.5, 0.6]),
//! ])
//! .unwrap();
//!
//! let words = table.convert(&["cat", "sat"]).unwrap();
//! let tree = TreeNode::internal(TreeNode::leaf(words[0]), TreeNode::leaf(words[1]));
//! assert!(tree.check_indices(table.vocab_size()).is_ok());
//! ```

pub mod embedding;
mod error;
pub mod stopwords;
pub mod tree;
pub mod vocab;

pub use embedding::EmbeddingTable;
pub use error::NlpError;
pub use stopwords::is_stop_word;
pub use tree::{RawNode, TreeNode};
pub use vocab::{count_words, Counts, Vocabulary, OOV_SYM};
