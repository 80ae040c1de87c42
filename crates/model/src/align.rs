//! # Root Alignment
//!
//! The [`AlignmentHead`] turns two composed root vectors into a
//! distribution over relation labels:
//!
//! ```text
//! p = softmax(σ([premise | hypothesis]) @ W + b)
//! ```
//!
//! The head is not symmetric: swapping premise and hypothesis generally
//! changes the output.
//!
//! [`RootAlign`] ties the embedding table, the composer and the head
//! together. A forward pass composes both trees, then aligns their roots.

use crate::composer::{Composition, RecursiveComposer};
use crate::config::AlignConfig;
use crate::ModelError;
use rootalign_diff::{Backend, Cpu, Linear, Parameters, RTensor};
use rootalign_nlp::{EmbeddingTable, TreeNode};
use std::path::Path;
use tracing::info;

/// Names of the dense parameters, in the order used by tapes and optimizers.
pub const DENSE_PARAM_NAMES: [&str; 6] = [
    "word2hidden.weight",
    "word2hidden.bias",
    "hidden2hidden.weight",
    "hidden2hidden.bias",
    "align.weight",
    "align.bias",
];

/// Name of the embedding matrix in [`RootAlign::parameters`].
pub const EMBEDDING_PARAM_NAME: &str = "embedding";

/// Where a named tensor lands in [`RootAlign::load_parameters`].
#[derive(Debug, Clone, Copy)]
enum Target {
    Embedding,
    Dense(usize),
}

/// `2H → R` projection over the squashed concatenation of two roots.
#[derive(Debug, Clone)]
pub struct AlignmentHead<B: Backend = Cpu> {
    backend: B,
    linear: Linear,
}

impl AlignmentHead<Cpu> {
    pub fn new(hidden_dim: usize, relation_num: usize, seed: u64) -> Self {
        Self {
            backend: Cpu,
            linear: Linear::new(2 * hidden_dim, relation_num, seed),
        }
    }
}

impl<B: Backend> AlignmentHead<B> {
    pub fn from_linear(backend: B, linear: Linear) -> Self {
        Self { backend, linear }
    }

    pub fn hidden_dim(&self) -> usize {
        self.linear.in_dim() / 2
    }

    pub fn relation_num(&self) -> usize {
        self.linear.out_dim()
    }

    pub fn linear(&self) -> &Linear {
        &self.linear
    }

    pub fn linear_mut(&mut self) -> &mut Linear {
        &mut self.linear
    }

    /// Relation distribution for a (premise, hypothesis) pair of `1 × H` roots.
    pub fn align(&self, premise: &RTensor, hypothesis: &RTensor) -> Result<RTensor, ModelError> {
        let expected = vec![1, self.hidden_dim()];
        for root in [premise, hypothesis] {
            if root.shape != expected {
                return Err(ModelError::shape(
                    format!("{:?}", expected),
                    format!("{:?}", root.shape),
                ));
            }
        }
        let joint = self.backend.concat(premise, hypothesis);
        let squashed = self.backend.sigmoid(&joint);
        let logits = self.linear.forward(&self.backend, &squashed);
        Ok(self.backend.softmax(&logits))
    }
}

/// Everything a forward pass produced.
#[derive(Debug, Clone)]
pub struct AlignOutput {
    /// `1 × R` relation distribution
    pub probabilities: RTensor,
    pub premise: Composition,
    pub hypothesis: Composition,
}

impl AlignOutput {
    /// Most probable relation.
    pub fn label(&self) -> usize {
        self.probabilities.argmax()
    }
}

/// Sentence-pair relation model over binary parse trees.
#[derive(Debug, Clone)]
pub struct RootAlign<B: Backend = Cpu> {
    embeddings: EmbeddingTable,
    composer: RecursiveComposer<B>,
    head: AlignmentHead<B>,
}

impl RootAlign<Cpu> {
    /// Build a CPU model over `embeddings` from a validated config.
    pub fn new(embeddings: EmbeddingTable, config: &AlignConfig) -> Result<Self, ModelError> {
        Self::with_backend(embeddings, config, Cpu)
    }
}

impl<B: Backend + Clone> RootAlign<B> {
    /// Build a model whose composer and head both run on `backend`.
    pub fn with_backend(
        embeddings: EmbeddingTable,
        config: &AlignConfig,
        backend: B,
    ) -> Result<Self, ModelError> {
        config.validate()?;
        if embeddings.dim() == 0 || embeddings.vocab_size() == 0 {
            return Err(ModelError::InvalidConfig {
                reason: format!(
                    "embedding table is empty ({} x {})",
                    embeddings.vocab_size(),
                    embeddings.dim()
                ),
            });
        }

        let h = config.hidden_dim;
        let composer = RecursiveComposer::from_layers(
            backend.clone(),
            Linear::new(embeddings.dim(), h, config.seed),
            Linear::new(2 * h, h, config.seed.wrapping_add(1)),
            config.leaf_activation,
        )?;
        let head = AlignmentHead::from_linear(
            backend,
            Linear::new(2 * h, config.relation_num, config.seed.wrapping_add(2)),
        );

        info!(
            vocab = embeddings.vocab_size(),
            word_dim = embeddings.dim(),
            hidden_dim = h,
            relations = config.relation_num,
            "built root-align model"
        );
        Self::from_parts(embeddings, composer, head)
    }
}

impl<B: Backend> RootAlign<B> {
    /// Assemble from parts, checking that their widths line up.
    pub fn from_parts(
        embeddings: EmbeddingTable,
        composer: RecursiveComposer<B>,
        head: AlignmentHead<B>,
    ) -> Result<Self, ModelError> {
        if composer.word_dim() != embeddings.dim() {
            return Err(ModelError::shape(
                format!("word dim {}", embeddings.dim()),
                format!("word dim {}", composer.word_dim()),
            ));
        }
        if head.linear().in_dim() != 2 * composer.hidden_dim() {
            return Err(ModelError::shape(
                format!("head input {}", 2 * composer.hidden_dim()),
                format!("head input {}", head.linear().in_dim()),
            ));
        }
        Ok(Self {
            embeddings,
            composer,
            head,
        })
    }

    pub fn embeddings(&self) -> &EmbeddingTable {
        &self.embeddings
    }

    pub fn embeddings_mut(&mut self) -> &mut EmbeddingTable {
        &mut self.embeddings
    }

    pub fn composer(&self) -> &RecursiveComposer<B> {
        &self.composer
    }

    pub fn head(&self) -> &AlignmentHead<B> {
        &self.head
    }

    pub fn relation_num(&self) -> usize {
        self.head.relation_num()
    }

    /// Compose one tree with the shared composer.
    pub fn compose(&self, tree: &TreeNode) -> Result<Composition, ModelError> {
        self.composer.compose(&self.embeddings, tree)
    }

    /// Compose both trees, then align their roots.
    pub fn forward(
        &self,
        premise: &TreeNode,
        hypothesis: &TreeNode,
    ) -> Result<AlignOutput, ModelError> {
        let premise = self.compose(premise)?;
        let hypothesis = self.compose(hypothesis)?;
        let probabilities = self.head.align(premise.root(), hypothesis.root())?;
        Ok(AlignOutput {
            probabilities,
            premise,
            hypothesis,
        })
    }

    /// Most probable relation label.
    pub fn predict(&self, premise: &TreeNode, hypothesis: &TreeNode) -> Result<usize, ModelError> {
        self.forward(premise, hypothesis).map(|out| out.label())
    }

    /// Dense parameters in [`DENSE_PARAM_NAMES`] order.
    pub fn dense_params(&self) -> [&RTensor; 6] {
        let [w1, b1] = self.composer.word2hidden().params();
        let [w2, b2] = self.composer.hidden2hidden().params();
        let [wa, ba] = self.head.linear().params();
        [w1, b1, w2, b2, wa, ba]
    }

    /// Mutable dense parameters in [`DENSE_PARAM_NAMES`] order.
    pub fn dense_params_mut(&mut self) -> [&mut RTensor; 6] {
        let (leaf, merge) = self.composer.layers_mut();
        let [w1, b1] = leaf.params_mut();
        let [w2, b2] = merge.params_mut();
        let [wa, ba] = self.head.linear_mut().params_mut();
        [w1, b1, w2, b2, wa, ba]
    }

    /// Every trainable tensor, by name: the embedding matrix first, then
    /// the dense parameters.
    pub fn parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        params.register(EMBEDDING_PARAM_NAME, self.embeddings.weights().clone());
        for (name, tensor) in DENSE_PARAM_NAMES.iter().zip(self.dense_params()) {
            params.register(name, tensor.clone());
        }
        params
    }

    /// Overwrite parameters by name. Every tensor must keep its shape;
    /// names not present in `params` are left alone.
    ///
    /// All names and shapes are checked before anything is written, so a
    /// rejected set leaves the model unchanged.
    pub fn load_parameters(&mut self, params: &Parameters) -> Result<(), ModelError> {
        let mut checked: Vec<(Target, &RTensor)> = Vec::with_capacity(params.len());
        for (name, tensor) in params.iter() {
            let (target, current) = if name == EMBEDDING_PARAM_NAME {
                (Target::Embedding, self.embeddings.weights())
            } else {
                let slot = DENSE_PARAM_NAMES
                    .iter()
                    .position(|n| *n == name)
                    .ok_or_else(|| ModelError::InvalidConfig {
                        reason: format!("unknown parameter '{}'", name),
                    })?;
                (Target::Dense(slot), self.dense_params()[slot])
            };
            if current.shape != tensor.shape || !tensor.is_consistent() {
                return Err(ModelError::shape(
                    format!("{} {:?}", name, current.shape),
                    format!("{} {:?} with {} values", name, tensor.shape, tensor.data.len()),
                ));
            }
            checked.push((target, tensor));
        }

        for (target, tensor) in checked {
            match target {
                Target::Embedding => self.embeddings.set_weights(tensor.clone())?,
                Target::Dense(slot) => {
                    if let Some(param) = self.dense_params_mut().into_iter().nth(slot) {
                        param.data.clone_from(&tensor.data);
                    }
                }
            }
        }
        Ok(())
    }

    /// Write [`RootAlign::parameters`] as JSON.
    pub fn save_parameters(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let json = serde_json::to_string(&self.parameters())?;
        std::fs::write(path.as_ref(), json)?;
        info!(path = %path.as_ref().display(), "saved model parameters");
        Ok(())
    }

    /// Read parameters written by [`RootAlign::save_parameters`].
    pub fn restore_parameters(&mut self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let params: Parameters = serde_json::from_str(&text)?;
        self.load_parameters(&params)?;
        info!(path = %path.as_ref().display(), "restored model parameters");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_output_is_distribution() {
        let head = AlignmentHead::new(2, 3, 7);
        let p = head
            .align(&RTensor::row(vec![0.1, 0.2]), &RTensor::row(vec![0.3, -0.1]))
            .unwrap();
        assert_eq!(p.shape, vec![1, 3]);
        assert!(p.data.iter().all(|&x| x >= 0.0));
        assert!((p.data.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    fn tiny_model() -> RootAlign {
        let table = EmbeddingTable::from_rows(&[("<OOV>", vec![0.0, 0.0]), ("a", vec![1.0, -1.0])])
            .unwrap();
        let config = AlignConfig {
            hidden_dim: 2,
            ..AlignConfig::default()
        };
        RootAlign::new(table, &config).unwrap()
    }

    #[test]
    fn test_failed_load_leaves_model_untouched() {
        let mut model = tiny_model();
        let before = model.parameters();

        let mut params = Parameters::new();
        params.register(EMBEDDING_PARAM_NAME, RTensor::matrix(2, 2, vec![9.0; 4]));
        params.register("align.bias", RTensor::row(vec![1.0, 2.0, 3.0]));
        params.register("word2hidden.weight", RTensor::zeros(vec![5, 5]));

        let err = model.load_parameters(&params).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
        assert_eq!(model.parameters(), before);

        let mut unknown = Parameters::new();
        unknown.register(EMBEDDING_PARAM_NAME, RTensor::matrix(2, 2, vec![9.0; 4]));
        unknown.register("bogus", RTensor::scalar(1.0));
        assert!(matches!(
            model.load_parameters(&unknown),
            Err(ModelError::InvalidConfig { .. })
        ));
        assert_eq!(model.parameters(), before);
    }

    #[test]
    fn test_load_rejects_short_data() {
        let mut model = tiny_model();
        let before = model.parameters();

        let mut params = Parameters::new();
        params.register(
            "align.bias",
            RTensor {
                shape: vec![1, 3],
                data: vec![0.0],
            },
        );
        assert!(matches!(
            model.load_parameters(&params),
            Err(ModelError::ShapeMismatch { .. })
        ));
        assert_eq!(model.parameters(), before);
    }

    #[test]
    fn test_load_applies_valid_set() {
        let mut model = tiny_model();
        let mut params = Parameters::new();
        params.register(EMBEDDING_PARAM_NAME, RTensor::matrix(2, 2, vec![0.5; 4]));
        params.register("align.bias", RTensor::row(vec![1.0, 2.0, 3.0]));
        model.load_parameters(&params).unwrap();

        let loaded = model.parameters();
        assert_eq!(loaded.get(EMBEDDING_PARAM_NAME), params.get(EMBEDDING_PARAM_NAME));
        assert_eq!(loaded.get("align.bias"), params.get("align.bias"));
    }

    #[test]
    fn test_head_rejects_wrong_width() {
        let head = AlignmentHead::new(2, 3, 7);
        let err = head
            .align(&RTensor::row(vec![0.1, 0.2, 0.3]), &RTensor::row(vec![0.3, -0.1]))
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_head_matches_formula() {
        // W = 4x2 with a single nonzero entry; b = [0.5, 0].
        let mut w = RTensor::zeros(vec![4, 2]);
        w.data[0] = 2.0;
        let head = AlignmentHead::from_linear(
            Cpu,
            Linear::from_parts(w, RTensor::vector(vec![0.5, 0.0])),
        );
        let p = head
            .align(&RTensor::row(vec![0.0, 1.0]), &RTensor::row(vec![2.0, 3.0]))
            .unwrap();

        // σ(0) = 0.5, so logits = [0.5 * 2 + 0.5, 0] = [1.5, 0]
        let e = 1.5f32.exp();
        assert!((p.data[0] - e / (e + 1.0)).abs() < 1e-6);
    }
}
