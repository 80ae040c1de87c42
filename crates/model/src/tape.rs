//! # Gradient Tapes
//!
//! A [`Tape`] unrolls one training example (premise tree, hypothesis tree,
//! gold label) into a [`DiffGraph`]. The graph's boundary inputs are the six
//! dense parameters followed by the embedding rows the example touches:
//!
//! ```text
//! input 0..6   word2hidden.{weight,bias} hidden2hidden.{weight,bias} align.{weight,bias}
//! input 6..    one 1 × D row per distinct word index, in first-use order
//! ```
//!
//! Output 0 is the cross-entropy loss, output 1 the `1 × R` distribution.
//! Because the tree's post-order is the graph's topological order, running
//! the tape computes exactly what [`RootAlign::forward`] computes.

use crate::align::{RootAlign, DENSE_PARAM_NAMES};
use crate::config::LeafActivation;
use crate::ModelError;
use petgraph::graph::NodeIndex;
use rootalign_diff::backward::value_and_grad;
use rootalign_diff::{Backend, DiffGraph, Parameters, RTensor};
use rootalign_nlp::TreeNode;
use std::collections::HashMap;
use tracing::debug;

/// Number of dense parameter inputs at the front of every tape.
pub const DENSE_INPUTS: usize = DENSE_PARAM_NAMES.len();

/// Parameter nodes shared by both trees.
struct Wires {
    w_leaf: NodeIndex,
    b_leaf: NodeIndex,
    w_merge: NodeIndex,
    b_merge: NodeIndex,
    activation: LeafActivation,
}

/// A recorded example, ready to be evaluated or differentiated.
pub struct Tape {
    graph: DiffGraph,
    inputs: Vec<RTensor>,
    rows: Vec<usize>,
    label: usize,
}

/// Loss, prediction and gradients of one example.
#[derive(Debug, Clone)]
pub struct TapeGradients {
    pub loss: f32,
    pub probabilities: RTensor,
    /// Gradients of the dense parameters, in [`DENSE_PARAM_NAMES`] order
    pub dense: Vec<RTensor>,
    /// `(word index, 1 × D gradient)` for each embedding row used
    pub rows: Vec<(usize, RTensor)>,
}

impl TapeGradients {
    /// Dense gradients by parameter name.
    pub fn named(&self) -> Parameters {
        let mut params = Parameters::new();
        for (name, g) in DENSE_PARAM_NAMES.iter().zip(&self.dense) {
            params.register(name, g.clone());
        }
        params
    }

    /// L2 norm over every gradient entry.
    pub fn norm(&self) -> f32 {
        let dense: f32 = self.dense.iter().map(|g| g.norm().powi(2)).sum();
        let rows: f32 = self.rows.iter().map(|(_, g)| g.norm().powi(2)).sum();
        (dense + rows).sqrt()
    }
}

impl Tape {
    /// Unroll `(premise, hypothesis) → label` against the model's current
    /// parameters.
    pub fn record<B: Backend>(
        model: &RootAlign<B>,
        premise: &TreeNode,
        hypothesis: &TreeNode,
        label: usize,
    ) -> Result<Self, ModelError> {
        let relation_num = model.relation_num();
        if label >= relation_num {
            return Err(ModelError::InvalidLabel {
                label,
                relation_num,
            });
        }
        let embeddings = model.embeddings();
        premise.check_indices(embeddings.vocab_size())?;
        hypothesis.check_indices(embeddings.vocab_size())?;

        let mut graph = DiffGraph::new();
        let mut inputs: Vec<RTensor> = Vec::new();

        let mut param_nodes = Vec::with_capacity(DENSE_INPUTS);
        for tensor in model.dense_params() {
            param_nodes.push(graph.input(inputs.len(), tensor.shape.clone()));
            inputs.push(tensor.clone());
        }
        let wires = Wires {
            w_leaf: param_nodes[0],
            b_leaf: param_nodes[1],
            w_merge: param_nodes[2],
            b_merge: param_nodes[3],
            activation: model.composer().leaf_activation(),
        };

        let mut rows: Vec<usize> = Vec::new();
        let mut row_nodes: HashMap<usize, NodeIndex> = HashMap::new();
        for tree in [premise, hypothesis] {
            for word in tree.leaves() {
                if !row_nodes.contains_key(&word) {
                    let row = embeddings.lookup(word)?;
                    row_nodes.insert(word, graph.input(inputs.len(), row.shape.clone()));
                    inputs.push(row);
                    rows.push(word);
                }
            }
        }

        let p_root = unroll(&mut graph, &wires, &row_nodes, premise)?;
        let h_root = unroll(&mut graph, &wires, &row_nodes, hypothesis)?;

        let joint = graph.concat(p_root, h_root)?;
        let squashed = graph.sigmoid(joint)?;
        let logits = graph.matmul(squashed, param_nodes[4])?;
        let logits = graph.add(logits, param_nodes[5])?;
        let probs = graph.softmax(logits)?;
        let loss = graph.cross_entropy(probs, label)?;
        graph.mark_output(loss);
        graph.mark_output(probs);

        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            rows = rows.len(),
            "recorded tape"
        );
        Ok(Self {
            graph,
            inputs,
            rows,
            label,
        })
    }

    pub fn graph(&self) -> &DiffGraph {
        &self.graph
    }

    /// Boundary inputs in tape order.
    pub fn inputs(&self) -> &[RTensor] {
        &self.inputs
    }

    /// Embedding rows used, in input order after the dense parameters.
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn label(&self) -> usize {
        self.label
    }

    /// Evaluate the recorded graph: `(loss, probabilities)`.
    pub fn forward(&self) -> Result<(f32, RTensor), ModelError> {
        let outputs = self.graph.forward(&self.inputs)?;
        split_outputs(outputs)
    }

    /// Loss, probabilities and every parameter gradient.
    pub fn gradients(&self) -> Result<TapeGradients, ModelError> {
        let (outputs, mut grads) = value_and_grad(&self.graph, &self.inputs)?;
        let (loss, probabilities) = split_outputs(outputs)?;

        let row_grads = grads.split_off(DENSE_INPUTS);
        let rows = self.rows.iter().copied().zip(row_grads).collect();
        Ok(TapeGradients {
            loss,
            probabilities,
            dense: grads,
            rows,
        })
    }
}

fn split_outputs(outputs: Vec<RTensor>) -> Result<(f32, RTensor), ModelError> {
    let mut outputs = outputs.into_iter();
    match (outputs.next(), outputs.next()) {
        (Some(loss), Some(probs)) => Ok((loss.as_scalar(), probs)),
        _ => Err(ModelError::shape("loss and probabilities", "fewer outputs")),
    }
}

/// Wire one tree into `graph`, children before parents. Returns the root node.
fn unroll(
    graph: &mut DiffGraph,
    wires: &Wires,
    row_nodes: &HashMap<usize, NodeIndex>,
    tree: &TreeNode,
) -> Result<NodeIndex, ModelError> {
    let mut pending: Vec<NodeIndex> = Vec::new();

    for node in tree.post_order() {
        let out = match node {
            TreeNode::Leaf { word_index } => {
                let row = row_nodes.get(word_index).copied().ok_or(
                    rootalign_nlp::NlpError::IndexOutOfRange {
                        index: *word_index,
                        vocab_size: row_nodes.len(),
                    },
                )?;
                let h = graph.matmul(row, wires.w_leaf)?;
                let h = graph.add(h, wires.b_leaf)?;
                match wires.activation {
                    LeafActivation::Identity => h,
                    LeafActivation::Tanh => graph.tanh(h)?,
                }
            }
            TreeNode::Internal { .. } => {
                let (Some(right), Some(left)) = (pending.pop(), pending.pop()) else {
                    return Err(rootalign_nlp::NlpError::MalformedTree {
                        reason: "internal node visited before its children".to_string(),
                    }
                    .into());
                };
                let children = graph.concat(left, right)?;
                let h = graph.matmul(children, wires.w_merge)?;
                graph.add(h, wires.b_merge)?
            }
        };
        pending.push(out);
    }

    pending.pop().ok_or_else(|| rootalign_nlp::NlpError::EmptyTree.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AlignConfig;
    use rootalign_diff::backward::grad_check;
    use rootalign_nlp::EmbeddingTable;

    fn model(activation: LeafActivation) -> RootAlign {
        let table = EmbeddingTable::from_rows(&[
            ("<OOV>", vec![0.0, 0.1, -0.1]),
            ("cat", vec![0.3, -0.2, 0.5]),
            ("sat", vec![-0.4, 0.6, 0.2]),
            ("mat", vec![0.1, 0.1, 0.9]),
        ])
        .unwrap();
        let config = AlignConfig {
            hidden_dim: 2,
            relation_num: 3,
            leaf_activation: activation,
            ..AlignConfig::default()
        };
        RootAlign::new(table, &config).unwrap()
    }

    fn trees() -> (TreeNode, TreeNode) {
        let premise = TreeNode::internal(
            TreeNode::leaf(1),
            TreeNode::internal(TreeNode::leaf(2), TreeNode::leaf(3)),
        );
        let hypothesis = TreeNode::internal(TreeNode::leaf(1), TreeNode::leaf(2));
        (premise, hypothesis)
    }

    #[test]
    fn test_tape_matches_direct_forward() {
        for activation in [LeafActivation::Identity, LeafActivation::Tanh] {
            let m = model(activation);
            let (p, h) = trees();
            let tape = Tape::record(&m, &p, &h, 2).unwrap();
            let (loss, probs) = tape.forward().unwrap();

            let direct = m.forward(&p, &h).unwrap().probabilities;
            assert!(probs.approx_eq(&direct, 1e-6));
            assert!((loss + direct.data[2].ln()).abs() < 1e-5);
        }
    }

    #[test]
    fn test_tape_shares_repeated_words() {
        let m = model(LeafActivation::Identity);
        let (p, h) = trees();
        let tape = Tape::record(&m, &p, &h, 0).unwrap();
        assert_eq!(tape.rows(), &[1, 2, 3]);
        assert_eq!(tape.inputs().len(), DENSE_INPUTS + 3);
    }

    #[test]
    fn test_tape_grad_check() {
        let m = model(LeafActivation::Tanh);
        let (p, h) = trees();
        let tape = Tape::record(&m, &p, &h, 1).unwrap();
        grad_check(tape.graph(), tape.inputs(), 1e-3, 1e-2).unwrap();
    }

    #[test]
    fn test_gradients_layout() {
        let m = model(LeafActivation::Identity);
        let (p, h) = trees();
        let grads = Tape::record(&m, &p, &h, 0).unwrap().gradients().unwrap();

        assert_eq!(grads.dense.len(), DENSE_INPUTS);
        for (g, param) in grads.dense.iter().zip(m.dense_params()) {
            assert_eq!(g.shape, param.shape);
        }
        assert_eq!(grads.rows.len(), 3);
        assert!(grads.rows.iter().all(|(_, g)| g.shape == vec![1, 3]));
        assert!(grads.norm() > 0.0);
        assert!(grads.named().get("align.bias").is_some());
    }

    #[test]
    fn test_invalid_label() {
        let m = model(LeafActivation::Identity);
        let (p, h) = trees();
        assert!(matches!(
            Tape::record(&m, &p, &h, 3),
            Err(ModelError::InvalidLabel {
                label: 3,
                relation_num: 3
            })
        ));
    }
}
