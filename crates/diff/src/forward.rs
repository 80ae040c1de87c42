//! # Forward Evaluation
//!
//! This module implements forward evaluation of computation graphs, the
//! deterministic semantics that maps `(diagram, inputs) → outputs`.
//!
//! ## Key Concepts
//!
//! - **Topological order**: Process nodes so dependencies are computed first
//! - **Value cache**: Store intermediate results for each node
//! - **Edge routing**: Track which output port connects to which input port
//!
//! ## Example
//!
//! ```rust
//! use rootalign_diff::forward::DiffGraph;
//! use rootalign_diff::ops::RTensor;
//!
//! // y = sigmoid([a | b])
//! let mut graph = DiffGraph::new();
//! let a = graph.input(0, vec![1, 2]);
//! let b = graph.input(1, vec![1, 1]);
//! let ab = graph.concat(a, b).unwrap();
//! let y = graph.sigmoid(ab).unwrap();
//! graph.mark_output(y);
//!
//! let outputs = graph
//!     .forward(&[RTensor::row(vec![0.0, 0.0]), RTensor::row(vec![0.0])])
//!     .unwrap();
//! assert_eq!(outputs[0].data, vec![0.5, 0.5, 0.5]);
//! ```

use crate::ops::{DiffOp, RTensor};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rootalign_core::{CoreError, Diagram, Node, Port, Shape};
use std::collections::HashMap;

/// A computation graph for differentiable operations.
///
/// Wraps `Diagram<DiffOp>` with builder methods that infer and check
/// shapes, and with forward evaluation.
pub struct DiffGraph {
    /// The underlying diagram
    pub diagram: Diagram<DiffOp>,
    /// Maps input indices to their node indices
    pub(crate) input_nodes: HashMap<usize, NodeIndex>,
    /// Output node indices (in order)
    pub(crate) output_nodes: Vec<NodeIndex>,
}

impl DiffGraph {
    /// Create a new empty computation graph.
    pub fn new() -> Self {
        Self {
            diagram: Diagram::new(),
            input_nodes: HashMap::new(),
            output_nodes: Vec::new(),
        }
    }

    /// Add an input node for boundary input `index` with the given shape.
    pub fn input(&mut self, index: usize, shape: Vec<usize>) -> NodeIndex {
        let shape = Shape::f32_dims(&shape);
        let node = Node::new(
            DiffOp::Input { index },
            vec![Port::new(shape.clone())],
            vec![Port::new(shape)],
        );
        let idx = self.diagram.add_node(node);
        self.input_nodes.insert(index, idx);
        self.diagram.inputs.push((idx, 0));
        idx
    }

    /// Add a node fed by `args` (in port order) and wire it up.
    fn push(
        &mut self,
        op: DiffOp,
        args: &[NodeIndex],
        out_shape: Shape,
    ) -> Result<NodeIndex, CoreError> {
        let in_ports = args
            .iter()
            .map(|&a| self.output_shape(a).map(Port::new))
            .collect::<Result<Vec<_>, _>>()?;
        let idx = self
            .diagram
            .add_node(Node::new(op, in_ports, vec![Port::new(out_shape)]));
        for (port, &arg) in args.iter().enumerate() {
            self.diagram.connect(arg, 0, idx, port)?;
        }
        Ok(idx)
    }

    fn same_shape(&self, a: NodeIndex, b: NodeIndex) -> Result<Shape, CoreError> {
        let (sa, sb) = (self.output_shape(a)?, self.output_shape(b)?);
        if sa != sb {
            return Err(CoreError::ShapeMismatch {
                expected: sa,
                got: sb,
            });
        }
        Ok(sa)
    }

    /// Add an addition node: a + b
    pub fn add(&mut self, a: NodeIndex, b: NodeIndex) -> Result<NodeIndex, CoreError> {
        let shape = self.same_shape(a, b)?;
        self.push(DiffOp::Add, &[a, b], shape)
    }


    /// Add a matrix multiplication node: `(m, k) @ (k, n) → (m, n)`
    pub fn matmul(&mut self, a: NodeIndex, b: NodeIndex) -> Result<NodeIndex, CoreError> {
        let (sa, sb) = (self.output_shape(a)?, self.output_shape(b)?);
        if sa.rank() != 2 || sb.rank() != 2 || sa.dims[1] != sb.dims[0] {
            return Err(CoreError::ShapeMismatch {
                expected: Shape::f32_matrix(sa.dims.get(1).copied().unwrap_or(0), 0),
                got: sb,
            });
        }
        let out = Shape::f32_matrix(sa.dims[0], sb.dims[1]);
        self.push(DiffOp::MatMul, &[a, b], out)
    }

    /// Add a column concatenation node: `(m, p) ‖ (m, q) → (m, p + q)`
    pub fn concat(&mut self, a: NodeIndex, b: NodeIndex) -> Result<NodeIndex, CoreError> {
        let (sa, sb) = (self.output_shape(a)?, self.output_shape(b)?);
        if sa.rank() != 2 || sb.rank() != 2 || sa.dims[0] != sb.dims[0] {
            return Err(CoreError::ShapeMismatch {
                expected: sa,
                got: sb,
            });
        }
        let out = Shape::f32_matrix(sa.dims[0], sa.dims[1] + sb.dims[1]);
        self.push(DiffOp::Concat, &[a, b], out)
    }

    fn unary(&mut self, op: DiffOp, x: NodeIndex) -> Result<NodeIndex, CoreError> {
        let shape = self.output_shape(x)?;
        self.push(op, &[x], shape)
    }

    /// Add a sigmoid node.
    pub fn sigmoid(&mut self, x: NodeIndex) -> Result<NodeIndex, CoreError> {
        self.unary(DiffOp::Sigmoid, x)
    }

    /// Add a tanh node.
    pub fn tanh(&mut self, x: NodeIndex) -> Result<NodeIndex, CoreError> {
        self.unary(DiffOp::Tanh, x)
    }

    /// Add a row-wise softmax node.
    pub fn softmax(&mut self, x: NodeIndex) -> Result<NodeIndex, CoreError> {
        self.unary(DiffOp::Softmax, x)
    }

    /// Add a cross-entropy node over a `1 × R` probability row.
    pub fn cross_entropy(&mut self, probs: NodeIndex, target: usize) -> Result<NodeIndex, CoreError> {
        let shape = self.output_shape(probs)?;
        if target >= shape.numel() {
            return Err(CoreError::InvalidPort {
                index: target,
                count: shape.numel(),
            });
        }
        self.push(DiffOp::CrossEntropy { target }, &[probs], Shape::f32_scalar())
    }

    /// Add a sum-all node (reduce to scalar).
    pub fn sum_all(&mut self, x: NodeIndex) -> Result<NodeIndex, CoreError> {
        self.push(DiffOp::SumAll, &[x], Shape::f32_scalar())
    }

    /// Mark a node as an output of the graph.
    ///
    /// The first output is the one `backward` seeds.
    pub fn mark_output(&mut self, node: NodeIndex) {
        self.output_nodes.push(node);
        self.diagram.outputs.push((node, 0));
    }

    /// Output shape of a node.
    pub fn output_shape(&self, node: NodeIndex) -> Result<Shape, CoreError> {
        self.diagram
            .graph
            .node_weight(node)
            .and_then(|n| n.outputs.first())
            .map(|p| p.shape.clone())
            .ok_or_else(|| CoreError::ValidationError {
                reason: format!("node {:?} has no output", node),
            })
    }

    /// Nodes in an order where every producer precedes its consumers.
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>, CoreError> {
        self.diagram.topological_order()
    }

    /// Forward evaluation: compute outputs from inputs.
    pub fn forward(&self, inputs: &[RTensor]) -> Result<Vec<RTensor>, CoreError> {
        let mut values: HashMap<NodeIndex, Vec<RTensor>> = HashMap::new();

        for node_idx in self.topological_order()? {
            let node_inputs = self.gather_inputs(node_idx, inputs, |n| values.get(&n))?;
            let outputs = self.diagram.graph[node_idx].op.forward(&node_inputs);
            values.insert(node_idx, outputs);
        }

        self.output_nodes
            .iter()
            .map(|idx| {
                values
                    .get(idx)
                    .and_then(|v| v.first())
                    .cloned()
                    .ok_or_else(|| CoreError::ValidationError {
                        reason: format!("output node {:?} was never evaluated", idx),
                    })
            })
            .collect()
    }

    /// Gather input tensors for a node from its predecessors.
    ///
    /// `lookup` returns the already computed outputs of a node.
    pub(crate) fn gather_inputs<'a>(
        &self,
        node: NodeIndex,
        boundary_inputs: &[RTensor],
        lookup: impl Fn(NodeIndex) -> Option<&'a Vec<RTensor>>,
    ) -> Result<Vec<RTensor>, CoreError> {
        let graph = &self.diagram.graph;
        let node_data = &graph[node];

        match node_data.op {
            DiffOp::Input { index } => {
                let value = boundary_inputs
                    .get(index)
                    .ok_or_else(|| CoreError::ValidationError {
                        reason: format!(
                            "boundary input {} missing ({} supplied)",
                            index,
                            boundary_inputs.len()
                        ),
                    })?;
                return Ok(vec![value.clone()]);
            }
            _ => {}
        }

        let mut inputs: Vec<Option<RTensor>> = vec![None; node_data.inputs.len()];
        for edge in graph.edges_directed(node, Direction::Incoming) {
            let edge_data = edge.weight();
            let value = lookup(edge.source())
                .and_then(|outs| outs.get(edge_data.from_port))
                .cloned();
            inputs[edge_data.to_port] = value;
        }

        inputs
            .into_iter()
            .enumerate()
            .map(|(port, x)| {
                x.ok_or_else(|| CoreError::ValidationError {
                    reason: format!("node {:?} input port {} is unconnected", node, port),
                })
            })
            .collect()
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.diagram.node_count()
    }

    /// Number of edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.diagram.edge_count()
    }

    /// Render the graph as ASCII for debugging.
    pub fn render(&self) -> String {
        self.diagram.render_ascii()
    }
}

impl Default for DiffGraph {
    fn default() -> Self {
        Self::new()
    }
}
