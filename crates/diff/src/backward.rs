//! # Backward Pass - Reverse-Mode Autodiff
//!
//! The backward pass is a functor to the opposite category:
//!
//! - Forward: morphisms go A → B
//! - Backward: morphisms go B → A (gradients flow backward)
//! - For composition f;g, the VJP is vjp(g);vjp(f) (reverse order)
//!
//! For an unrolled parse tree this is backpropagation through structure:
//! gradients enter at the loss, pass through the alignment head, split at
//! every merge into the two children, and accumulate on shared weights.
//!
//! ## Example
//!
//! ```rust
//! use rootalign_diff::forward::DiffGraph;
//! use rootalign_diff::backward::grad;
//! use rootalign_diff::ops::RTensor;
//!
//! // loss = sum(x @ w)
//! let mut graph = DiffGraph::new();
//! let x = graph.input(0, vec![1, 2]);
//! let w = graph.input(1, vec![2, 1]);
//! let y = graph.matmul(x, w).unwrap();
//! let loss = graph.sum_all(y).unwrap();
//! graph.mark_output(loss);
//!
//! let grads = grad(
//!     &graph,
//!     &[RTensor::row(vec![1.0, 2.0]), RTensor::matrix(2, 1, vec![3.0, 4.0])],
//! )
//! .unwrap();
//! assert_eq!(grads[0].data, vec![3.0, 4.0]);
//! assert_eq!(grads[1].data, vec![1.0, 2.0]);
//! ```

use crate::forward::DiffGraph;
use crate::ops::RTensor;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rootalign_core::CoreError;
use std::collections::HashMap;

/// Cache of forward pass values needed for backward pass.
pub type ForwardCache = HashMap<NodeIndex, ForwardValue>;

/// Cached values from forward pass for a single node.
#[derive(Clone)]
pub struct ForwardValue {
    /// Inputs to this node
    pub inputs: Vec<RTensor>,
    /// Outputs from this node
    pub outputs: Vec<RTensor>,
}

/// Propagate `seed_grad` from the first output back through the graph.
///
/// Returns the gradient of every node's outputs that the seed reaches.
pub fn backward(
    graph: &DiffGraph,
    forward_cache: &ForwardCache,
    seed_grad: RTensor,
) -> Result<HashMap<NodeIndex, Vec<RTensor>>, CoreError> {
    let dag = &graph.diagram.graph;
    let mut grads: HashMap<NodeIndex, Vec<RTensor>> = HashMap::new();

    if let Some(&output_node) = graph.output_nodes.first() {
        grads.insert(output_node, vec![seed_grad]);
    }

    for node_idx in graph.topological_order()?.into_iter().rev() {
        let Some(output_grads) = grads.get(&node_idx) else {
            continue;
        };
        let forward_val = forward_cache
            .get(&node_idx)
            .ok_or_else(|| CoreError::ValidationError {
                reason: format!("no forward value cached for {:?}", node_idx),
            })?;

        let input_grads =
            dag[node_idx]
                .op
                .vjp(&forward_val.inputs, &forward_val.outputs, output_grads);

        for edge in dag.edges_directed(node_idx, Direction::Incoming) {
            let source = edge.source();
            let edge_data = edge.weight();
            let Some(grad) = input_grads.get(edge_data.to_port) else {
                continue;
            };

            // Nodes with several consumers accumulate.
            let node_grads = match grads.entry(source) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    let outputs = &forward_cache
                        .get(&source)
                        .ok_or_else(|| CoreError::ValidationError {
                            reason: format!("no forward value cached for {:?}", source),
                        })?
                        .outputs;
                    e.insert(outputs.iter().map(RTensor::zeros_like).collect())
                }
            };
            if let Some(existing) = node_grads.get_mut(edge_data.from_port) {
                *existing = existing.add(grad);
            }
        }
    }

    Ok(grads)
}

/// Gradient of the scalar first output with respect to every input.
///
/// Inputs the loss does not depend on get a zero gradient.
pub fn grad(graph: &DiffGraph, inputs: &[RTensor]) -> Result<Vec<RTensor>, CoreError> {
    value_and_grad(graph, inputs).map(|(_, grads)| grads)
}

/// Forward outputs together with the input gradients of the first output.
pub fn value_and_grad(
    graph: &DiffGraph,
    inputs: &[RTensor],
) -> Result<(Vec<RTensor>, Vec<RTensor>), CoreError> {
    let (outputs, forward_cache) = graph.forward_with_cache(inputs)?;
    let grads = backward(graph, &forward_cache, RTensor::scalar(1.0))?;

    let input_grads = inputs
        .iter()
        .enumerate()
        .map(|(i, input)| {
            graph
                .input_nodes
                .get(&i)
                .and_then(|node| grads.get(node))
                .and_then(|g| g.first())
                .cloned()
                .unwrap_or_else(|| input.zeros_like())
        })
        .collect();

    Ok((outputs, input_grads))
}

/// Numerical gradient by central differences: (f(x+h) - f(x-h)) / 2h
pub fn numerical_gradient(
    graph: &DiffGraph,
    inputs: &[RTensor],
    input_idx: usize,
    elem_idx: usize,
    h: f32,
) -> Result<f32, CoreError> {
    let mut inputs_plus = inputs.to_vec();
    let mut inputs_minus = inputs.to_vec();

    inputs_plus[input_idx].data[elem_idx] += h;
    inputs_minus[input_idx].data[elem_idx] -= h;

    let f_plus = graph.forward(&inputs_plus)?[0].as_scalar();
    let f_minus = graph.forward(&inputs_minus)?[0].as_scalar();

    Ok((f_plus - f_minus) / (2.0 * h))
}

/// Check analytical gradients against numerical gradients.
pub fn grad_check(
    graph: &DiffGraph,
    inputs: &[RTensor],
    h: f32,
    tolerance: f32,
) -> Result<(), GradCheckError> {
    let analytical_grads = grad(graph, inputs).map_err(GradCheckError::Graph)?;

    for (input_idx, analytical) in analytical_grads.iter().enumerate() {
        for elem_idx in 0..analytical.data.len() {
            let numerical = numerical_gradient(graph, inputs, input_idx, elem_idx, h)
                .map_err(GradCheckError::Graph)?;
            let analytical_val = analytical.data[elem_idx];
            let diff = (numerical - analytical_val).abs();

            let scale = analytical_val.abs().max(numerical.abs()).max(1.0);
            if diff / scale > tolerance && diff > tolerance {
                return Err(GradCheckError::Mismatch {
                    input_idx,
                    elem_idx,
                    analytical: analytical_val,
                    numerical,
                    diff,
                });
            }
        }
    }

    Ok(())
}

/// Error from gradient checking.
#[derive(Debug)]
pub enum GradCheckError {
    /// The graph could not be evaluated.
    Graph(CoreError),
    /// Analytical and numerical gradients disagree.
    Mismatch {
        input_idx: usize,
        elem_idx: usize,
        analytical: f32,
        numerical: f32,
        diff: f32,
    },
}

impl std::fmt::Display for GradCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GradCheckError::Graph(e) => write!(f, "Gradient check could not run: {}", e),
            GradCheckError::Mismatch {
                input_idx,
                elem_idx,
                analytical,
                numerical,
                diff,
            } => write!(
                f,
                "Gradient mismatch at input[{}][{}]: analytical={}, numerical={}, diff={}",
                input_idx, elem_idx, analytical, numerical, diff
            ),
        }
    }
}

impl std::error::Error for GradCheckError {}

impl DiffGraph {
    /// Forward pass that also records every node's inputs and outputs.
    pub fn forward_with_cache(
        &self,
        inputs: &[RTensor],
    ) -> Result<(Vec<RTensor>, ForwardCache), CoreError> {
        let mut cache: ForwardCache = HashMap::new();

        for node_idx in self.topological_order()? {
            let node_inputs =
                self.gather_inputs(node_idx, inputs, |n| cache.get(&n).map(|v| &v.outputs))?;
            let outputs = self.diagram.graph[node_idx].op.forward(&node_inputs);
            cache.insert(
                node_idx,
                ForwardValue {
                    inputs: node_inputs,
                    outputs,
                },
            );
        }

        let result = self
            .output_nodes
            .iter()
            .map(|idx| {
                cache
                    .get(idx)
                    .and_then(|v| v.outputs.first())
                    .cloned()
                    .ok_or_else(|| CoreError::ValidationError {
                        reason: format!("output node {:?} was never evaluated", idx),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((result, cache))
    }

    /// Node index of boundary input `index`, if declared.
    pub fn input_node(&self, index: usize) -> Option<NodeIndex> {
        self.input_nodes.get(&index).copied()
    }

    /// Output nodes, in the order they were marked.
    pub fn output_nodes(&self) -> &[NodeIndex] {
        &self.output_nodes
    }
}
