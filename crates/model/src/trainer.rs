//! # Training
//!
//! Per-example gradient descent over (premise, hypothesis, label) triples.
//!
//! Each step records a [`Tape`], takes its gradients and hands them to an
//! [`Optimizer`]. Embedding gradients are sparse: only the rows an example
//! uses are updated.
//!
//! ## Example
//!
//! ```rust
//! use rootalign_model::{AlignConfig, Example, RootAlign, Trainer};
//! use rootalign_nlp::{EmbeddingTable, TreeNode};
//!
//! let table = EmbeddingTable::from_rows(&[
//!     ("<OOV>", vec![0.0, 0.0]),
//!     ("yes", vec![1.0, 0.0]),
//!     ("no", vec![0.0, 1.0]),
//! ])
//! .unwrap();
//! let config = AlignConfig { hidden_dim: 2, relation_num: 2, epochs: 5, ..Default::default() };
//! let mut model = RootAlign::new(table, &config).unwrap();
//!
//! let data = vec![
//!     Example::new(TreeNode::leaf(1), TreeNode::leaf(1), 0),
//!     Example::new(TreeNode::leaf(1), TreeNode::leaf(2), 1),
//! ];
//! let mut trainer = Trainer::new(config).unwrap();
//! let losses = trainer.fit(&mut model, &data).unwrap();
//! assert_eq!(losses.len(), 5);
//! ```

use crate::align::RootAlign;
use crate::config::AlignConfig;
use crate::tape::{Tape, DENSE_INPUTS};
use crate::ModelError;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rootalign_diff::{Backend, Optimizer, SGD};
use rootalign_nlp::TreeNode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One labelled sentence pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub premise: TreeNode,
    pub hypothesis: TreeNode,
    pub label: usize,
}

impl Example {
    pub fn new(premise: TreeNode, hypothesis: TreeNode, label: usize) -> Self {
        Self {
            premise,
            hypothesis,
            label,
        }
    }
}

/// Runs the optimisation loop for a [`RootAlign`] model.
#[derive(Debug)]
pub struct Trainer<O: Optimizer = SGD> {
    config: AlignConfig,
    optimizer: O,
}

impl Trainer<SGD> {
    /// Plain SGD at the configured learning rate, clipped if `max_grad` is set.
    pub fn new(config: AlignConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let mut optimizer = SGD::new(config.learning_rate);
        if let Some(max_grad) = config.max_grad {
            optimizer = optimizer.with_clip(max_grad);
        }
        Ok(Self { config, optimizer })
    }
}

impl<O: Optimizer> Trainer<O> {
    pub fn with_optimizer(config: AlignConfig, optimizer: O) -> Result<Self, ModelError> {
        config.validate()?;
        Ok(Self { config, optimizer })
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// One gradient step; returns the loss before the update.
    ///
    /// A non-finite loss leaves the parameters untouched.
    pub fn train_example<B: Backend>(
        &mut self,
        model: &mut RootAlign<B>,
        example: &Example,
    ) -> Result<f32, ModelError> {
        let tape = Tape::record(model, &example.premise, &example.hypothesis, example.label)?;
        let grads = tape.gradients()?;

        if !grads.loss.is_finite() {
            warn!(loss = grads.loss, "non-finite loss, skipping update");
            return Ok(grads.loss);
        }

        for (slot, (param, grad)) in model
            .dense_params_mut()
            .into_iter()
            .zip(&grads.dense)
            .enumerate()
        {
            self.optimizer.update(slot, &mut param.data, &grad.data);
        }
        // Embedding rows get their own slots after the dense parameters.
        for (word, grad) in &grads.rows {
            let row = model.embeddings_mut().row_mut(*word)?;
            self.optimizer.update(DENSE_INPUTS + word, row, &grad.data);
        }

        debug!(loss = grads.loss, grad_norm = grads.norm(), "train step");
        Ok(grads.loss)
    }

    /// One pass over `examples` in a seeded shuffled order; returns the
    /// mean loss.
    ///
    /// Examples that fail (bad tree, bad label) are logged and skipped.
    pub fn train_epoch<B: Backend>(
        &mut self,
        model: &mut RootAlign<B>,
        examples: &[Example],
        epoch: usize,
    ) -> Result<f32, ModelError> {
        let mut order: Vec<usize> = (0..examples.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64));
        order.shuffle(&mut rng);

        let mut total = 0.0;
        let mut trained = 0usize;
        let mut skipped = 0usize;
        for i in order {
            match self.train_example(model, &examples[i]) {
                Ok(loss) if loss.is_finite() => {
                    total += loss;
                    trained += 1;
                }
                Ok(_) => skipped += 1,
                Err(e) => {
                    warn!(example = i, error = %e, "skipping example");
                    skipped += 1;
                }
            }
        }

        let mean = if trained > 0 {
            total / trained as f32
        } else {
            0.0
        };
        info!(epoch, mean_loss = mean, trained, skipped, "epoch finished");
        Ok(mean)
    }

    /// Train for `config.epochs` epochs; returns each epoch's mean loss.
    pub fn fit<B: Backend>(
        &mut self,
        model: &mut RootAlign<B>,
        examples: &[Example],
    ) -> Result<Vec<f32>, ModelError> {
        let mut losses = Vec::with_capacity(self.config.epochs);
        for epoch in 0..self.config.epochs {
            losses.push(self.train_epoch(model, examples, epoch)?);
        }
        Ok(losses)
    }

    /// Fraction of `examples` whose predicted label matches.
    pub fn evaluate<B: Backend>(
        &self,
        model: &RootAlign<B>,
        examples: &[Example],
    ) -> Result<f32, ModelError> {
        if examples.is_empty() {
            return Ok(0.0);
        }
        let mut correct = 0usize;
        for ex in examples {
            if model.predict(&ex.premise, &ex.hypothesis)? == ex.label {
                correct += 1;
            }
        }
        let accuracy = correct as f32 / examples.len() as f32;
        info!(accuracy, total = examples.len(), "evaluated");
        Ok(accuracy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootalign_diff::SGDMomentum;
    use rootalign_nlp::EmbeddingTable;

    fn setup() -> (RootAlign, Vec<Example>, AlignConfig) {
        let table = EmbeddingTable::from_rows(&[
            ("<OOV>", vec![0.0, 0.0, 0.0]),
            ("big", vec![1.0, 0.2, -0.3]),
            ("small", vec![-0.8, 0.1, 0.4]),
            ("dog", vec![0.2, 0.9, 0.1]),
        ])
        .unwrap();
        let config = AlignConfig {
            hidden_dim: 4,
            relation_num: 2,
            learning_rate: 0.5,
            epochs: 30,
            ..AlignConfig::default()
        };
        let model = RootAlign::new(table, &config).unwrap();

        let phrase = |adj| TreeNode::internal(TreeNode::leaf(adj), TreeNode::leaf(3));
        // The label is decided by the hypothesis adjective alone.
        let data = vec![
            Example::new(phrase(1), phrase(1), 0),
            Example::new(phrase(2), phrase(1), 0),
            Example::new(phrase(1), phrase(2), 1),
            Example::new(phrase(2), phrase(2), 1),
        ];
        (model, data, config)
    }

    #[test]
    fn test_training_lowers_loss() {
        let (mut model, data, config) = setup();
        let mut trainer = Trainer::new(config).unwrap();

        let losses = trainer.fit(&mut model, &data).unwrap();
        assert_eq!(losses.len(), 30);
        assert!(losses[29] < losses[0], "losses: {:?}", losses);
    }

    #[test]
    fn test_train_example_updates_only_used_rows() {
        let (mut model, data, config) = setup();
        let before = model.embeddings().clone();
        let mut trainer = Trainer::new(config).unwrap();

        // Uses rows 1 and 3 only.
        trainer.train_example(&mut model, &data[0]).unwrap();

        let after = model.embeddings();
        assert_eq!(after.lookup(0).unwrap(), before.lookup(0).unwrap());
        assert_eq!(after.lookup(2).unwrap(), before.lookup(2).unwrap());
        assert_ne!(after.lookup(1).unwrap(), before.lookup(1).unwrap());
        assert_ne!(after.lookup(3).unwrap(), before.lookup(3).unwrap());
    }

    #[test]
    fn test_clipping_bounds_step() {
        let (mut model, data, mut config) = setup();
        config.max_grad = Some(1e-3);
        config.learning_rate = 1.0;
        let before = model.parameters();
        let mut trainer = Trainer::new(config).unwrap();
        trainer.train_example(&mut model, &data[2]).unwrap();

        for ((_, old), (_, new)) in before.iter().zip(model.parameters().iter()) {
            for (a, b) in old.data.iter().zip(&new.data) {
                assert!((a - b).abs() <= 1e-3 + 1e-7);
            }
        }
    }

    #[test]
    fn test_bad_examples_are_skipped() {
        let (mut model, mut data, config) = setup();
        data.push(Example::new(TreeNode::leaf(9), TreeNode::leaf(1), 0));
        data.push(Example::new(TreeNode::leaf(1), TreeNode::leaf(1), 5));
        let mut trainer = Trainer::new(config).unwrap();

        let loss = trainer.train_epoch(&mut model, &data, 0).unwrap();
        assert!(loss.is_finite() && loss > 0.0);
    }

    #[test]
    fn test_momentum_optimizer() {
        let (mut model, data, config) = setup();
        let mut trainer =
            Trainer::with_optimizer(config.clone(), SGDMomentum::new(0.1, 0.9)).unwrap();
        let losses = trainer.fit(&mut model, &data).unwrap();
        assert!(losses.iter().all(|l| l.is_finite()));

        let accuracy = trainer.evaluate(&model, &data).unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
    }
}
