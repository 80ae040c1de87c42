//! # RootAlign - Recursive Tree Composition for Sentence Pairs
//!
//! Scores the relation between two sentences (premise and hypothesis) by
//! composing each sentence's binary parse tree into a single vector and
//! comparing the two roots.
//!
//! ## Pipeline
//!
//! ```text
//! premise tree ──► RecursiveComposer ──► root_p ─┐
//!                                                 ├─► AlignmentHead ──► p(relation)
//! hypothesis tree ► RecursiveComposer ──► root_h ─┘
//! ```
//!
//! Both trees share one composer and one embedding table.
//!
//! ## Modules
//!
//! - [`composer`]: bottom-up composition of one tree
//! - [`align`]: the alignment head and the [`RootAlign`] model
//! - [`config`]: hyperparameters and their JSON form
//! - [`tape`]: unrolling an example into a differentiable graph
//! - [`trainer`]: gradient descent over labelled pairs
//! - [`parallel`]: concurrent scoring of many pairs
//!
//! ## Example
//!
//! ```rust
//! use rootalign_model::{AlignConfig, RootAlign};
//! use rootalign_nlp::{EmbeddingTable, TreeNode};
//!
//! let table = EmbeddingTable::from_rows(&[
//!     ("<OOV>", vec![0.0, 0.0, 0.0]),
//!     ("cat", vec![0.1, 0.2, 0.3]),
//!     ("sat", vec![0.4, 0.5, 0.6]),
//! ])
//! .unwrap();
//! let config = AlignConfig { hidden_dim: 2, relation_num: 3, ..Default::default() };
//! let model = RootAlign::new(table, &config).unwrap();
//!
//! let premise = TreeNode::internal(TreeNode::leaf(1), TreeNode::leaf(2));
//! let hypothesis = TreeNode::leaf(1);
//! let out = model.forward(&premise, &hypothesis).unwrap();
//! assert_eq!(out.probabilities.shape, vec![1, 3]);
//! ```

pub mod align;
pub mod composer;
pub mod config;
mod error;
pub mod parallel;
pub mod tape;
pub mod trainer;

pub use align::{AlignOutput, AlignmentHead, RootAlign};
pub use composer::{Composition, RecursiveComposer};
pub use config::{AlignConfig, LeafActivation};
pub use error::ModelError;
pub use parallel::{ParallelScorer, TreePair};
pub use tape::{Tape, TapeGradients};
pub use trainer::{Example, Trainer};
