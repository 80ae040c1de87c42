//! # Parallel Scoring
//!
//! Forward passes only read the model, so independent pairs can be scored
//! at the same time. [`ParallelScorer`] splits a batch into contiguous
//! chunks, runs each chunk on tokio's blocking pool against a shared
//! `Arc<RootAlign>`, and returns results in input order.
//!
//! ```rust
//! use rootalign_model::{AlignConfig, ParallelScorer, RootAlign};
//! use rootalign_nlp::{EmbeddingTable, TreeNode};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let table = EmbeddingTable::from_rows(&[("<OOV>", vec![0.0]), ("hi", vec![1.0])]).unwrap();
//! let config = AlignConfig { hidden_dim: 2, ..Default::default() };
//! let model = Arc::new(RootAlign::new(table, &config).unwrap());
//!
//! let scorer = ParallelScorer::new(model).with_workers(2);
//! let pairs = vec![(TreeNode::leaf(1), TreeNode::leaf(0)); 4];
//! let labels = scorer.predict_pairs(pairs).await.unwrap();
//! assert_eq!(labels.len(), 4);
//! # }
//! ```

use crate::align::RootAlign;
use crate::ModelError;
use rootalign_diff::{Backend, Cpu, RTensor};
use rootalign_nlp::TreeNode;
use std::sync::Arc;
use tokio::task;
use tracing::debug;

/// A (premise, hypothesis) pair of trees.
pub type TreePair = (TreeNode, TreeNode);

/// Scores batches of tree pairs on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct ParallelScorer<B: Backend + 'static = Cpu> {
    model: Arc<RootAlign<B>>,
    workers: usize,
}

impl<B: Backend + 'static> ParallelScorer<B> {
    /// One worker per available core.
    pub fn new(model: Arc<RootAlign<B>>) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { model, workers }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn model(&self) -> &Arc<RootAlign<B>> {
        &self.model
    }

    /// Relation distribution for every pair, in input order.
    ///
    /// The first failing pair's error is returned.
    pub async fn score_pairs(&self, pairs: Vec<TreePair>) -> Result<Vec<RTensor>, ModelError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let total = pairs.len();
        let chunk_size = total.div_ceil(self.workers);

        let mut handles = Vec::with_capacity(self.workers);
        let mut pairs = pairs.into_iter();
        loop {
            let chunk: Vec<TreePair> = pairs.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let model = Arc::clone(&self.model);
            handles.push(task::spawn_blocking(move || {
                chunk
                    .iter()
                    .map(|(p, h)| model.forward(p, h).map(|out| out.probabilities))
                    .collect::<Result<Vec<_>, _>>()
            }));
        }
        debug!(pairs = total, chunks = handles.len(), "scoring in parallel");

        let mut scores = Vec::with_capacity(total);
        for handle in handles {
            let chunk = handle
                .await
                .map_err(|e| ModelError::Worker(e.to_string()))??;
            scores.extend(chunk);
        }
        Ok(scores)
    }

    /// Most probable label for every pair, in input order.
    pub async fn predict_pairs(&self, pairs: Vec<TreePair>) -> Result<Vec<usize>, ModelError> {
        let scores = self.score_pairs(pairs).await?;
        Ok(scores.iter().map(RTensor::argmax).collect())
    }
}
