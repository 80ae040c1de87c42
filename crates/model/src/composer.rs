//! # Recursive Composition
//!
//! Reduces a binary parse tree to one `1 × H` vector, bottom-up:
//!
//! ```text
//! leaf(i)          ↦  act(embedding[i] @ W_leaf + b_leaf)
//! internal(l, r)   ↦  [v(l) | v(r)] @ W_merge + b_merge
//! ```
//!
//! Every pass starts from scratch and returns its per-node vectors as a
//! [`Composition`]; the tree itself is never written to, so one tree can be
//! composed from several threads at once.

use crate::config::LeafActivation;
use crate::ModelError;
use rootalign_diff::{Backend, Cpu, Linear, RTensor};
use rootalign_nlp::{EmbeddingTable, TreeNode};
use tracing::debug;

/// Vectors computed during one composition pass.
///
/// Indexed by post-order node id; the root is last.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    vectors: Vec<RTensor>,
}

impl Composition {
    /// The root's vector.
    pub fn root(&self) -> &RTensor {
        // A pass always produces at least one vector.
        &self.vectors[self.vectors.len() - 1]
    }

    pub fn into_root(mut self) -> RTensor {
        let last = self.vectors.len() - 1;
        self.vectors.swap_remove(last)
    }

    /// Vector of the node with post-order id `id`.
    pub fn get(&self, id: usize) -> Option<&RTensor> {
        self.vectors.get(id)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RTensor> {
        self.vectors.iter()
    }
}

/// Leaf projection plus merge projection, shared by every node of every tree.
#[derive(Debug, Clone)]
pub struct RecursiveComposer<B: Backend = Cpu> {
    backend: B,
    word2hidden: Linear,
    hidden2hidden: Linear,
    leaf_activation: LeafActivation,
}

impl RecursiveComposer<Cpu> {
    /// Freshly initialised `D → H` and `2H → H` projections.
    pub fn new(word_dim: usize, hidden_dim: usize, seed: u64) -> Self {
        Self {
            backend: Cpu,
            word2hidden: Linear::new(word_dim, hidden_dim, seed),
            hidden2hidden: Linear::new(2 * hidden_dim, hidden_dim, seed.wrapping_add(1)),
            leaf_activation: LeafActivation::Identity,
        }
    }
}

impl<B: Backend> RecursiveComposer<B> {
    /// Assemble from explicit layers, checking that their widths line up.
    pub fn from_layers(
        backend: B,
        word2hidden: Linear,
        hidden2hidden: Linear,
        leaf_activation: LeafActivation,
    ) -> Result<Self, ModelError> {
        let h = word2hidden.out_dim();
        if hidden2hidden.in_dim() != 2 * h || hidden2hidden.out_dim() != h {
            return Err(ModelError::shape(
                format!("merge {:?}", Linear::zeros(2 * h, h)),
                format!("merge {:?}", hidden2hidden),
            ));
        }
        Ok(Self {
            backend,
            word2hidden,
            hidden2hidden,
            leaf_activation,
        })
    }

    pub fn with_leaf_activation(mut self, activation: LeafActivation) -> Self {
        self.leaf_activation = activation;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Embedding width D.
    pub fn word_dim(&self) -> usize {
        self.word2hidden.in_dim()
    }

    /// Composed vector width H.
    pub fn hidden_dim(&self) -> usize {
        self.word2hidden.out_dim()
    }

    pub fn leaf_activation(&self) -> LeafActivation {
        self.leaf_activation
    }

    pub fn word2hidden(&self) -> &Linear {
        &self.word2hidden
    }

    pub fn hidden2hidden(&self) -> &Linear {
        &self.hidden2hidden
    }

    /// Both projections at once: `(word2hidden, hidden2hidden)`.
    pub fn layers_mut(&mut self) -> (&mut Linear, &mut Linear) {
        (&mut self.word2hidden, &mut self.hidden2hidden)
    }

    /// Leaf step: `1 × D` embedding row to `1 × H`.
    pub fn project_leaf(&self, embedding: &RTensor) -> RTensor {
        let h = self.word2hidden.forward(&self.backend, embedding);
        match self.leaf_activation {
            LeafActivation::Identity => h,
            LeafActivation::Tanh => self.backend.tanh(&h),
        }
    }

    /// Merge step: two `1 × H` children to one `1 × H` parent.
    pub fn merge(&self, left: &RTensor, right: &RTensor) -> RTensor {
        let children = self.backend.concat(left, right);
        self.hidden2hidden.forward(&self.backend, &children)
    }

    /// Compose every node of `tree`.
    ///
    /// Word indices are checked against the table before any vector is
    /// computed, so a bad tree fails without touching the backend.
    pub fn compose(
        &self,
        embeddings: &EmbeddingTable,
        tree: &TreeNode,
    ) -> Result<Composition, ModelError> {
        if embeddings.dim() != self.word_dim() {
            return Err(ModelError::shape(
                format!("embedding width {}", self.word_dim()),
                format!("embedding width {}", embeddings.dim()),
            ));
        }
        tree.check_indices(embeddings.vocab_size())?;

        let mut vectors: Vec<RTensor> = Vec::new();
        // Post-order ids of subtrees whose parent has not been reached yet.
        let mut pending: Vec<usize> = Vec::new();

        for node in tree.post_order() {
            let v = match node {
                TreeNode::Leaf { word_index } => {
                    let row = self.backend.gather_row(embeddings.weights(), *word_index);
                    self.project_leaf(&row)
                }
                TreeNode::Internal { .. } => {
                    let (Some(right), Some(left)) = (pending.pop(), pending.pop()) else {
                        return Err(rootalign_nlp::NlpError::MalformedTree {
                            reason: "internal node visited before its children".to_string(),
                        }
                        .into());
                    };
                    self.merge(&vectors[left], &vectors[right])
                }
            };
            pending.push(vectors.len());
            vectors.push(v);
        }

        debug!(
            nodes = vectors.len(),
            leaves = tree.num_leaves(),
            backend = self.backend.name(),
            "composed tree"
        );
        Ok(Composition { vectors })
    }
}
