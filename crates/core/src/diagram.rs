//! # Diagrams - The Wiring of a Composition Tape
//!
//! A diagram is a program: boxes (operations) connected by wires (data flow).
//! A recursive composition over a parse tree unrolls into exactly such a
//! program: one box per leaf projection, one per child merge, and the
//! alignment head on top.
//!
//! ## Key Concepts
//!
//! - **Node**: An operation with typed input/output ports
//! - **Edge**: A wire connecting an output port to an input port
//! - **Diagram**: A directed acyclic graph with boundary ports
//!
//! Evaluation order is a topological order of the graph, which for an
//! unrolled tree is a post-order of the tree.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::error::CoreError;
use crate::shape::Shape;

/// A typed connection point on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub shape: Shape,
}

impl Port {
    pub fn new(shape: Shape) -> Self {
        Self { shape }
    }
}

/// A node in the diagram, parameterized by operation type.
#[derive(Debug, Clone)]
pub struct Node<O> {
    /// The operation this node performs
    pub op: O,
    /// Input ports (data flows in)
    pub inputs: Vec<Port>,
    /// Output ports (data flows out)
    pub outputs: Vec<Port>,
}

impl<O> Node<O> {
    pub fn new(op: O, inputs: Vec<Port>, outputs: Vec<Port>) -> Self {
        Self {
            op,
            inputs,
            outputs,
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }
}

/// An edge connects an output port of one node to an input port of another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Index of the output port on the source node
    pub from_port: usize,
    /// Index of the input port on the target node
    pub to_port: usize,
}

impl Edge {
    pub fn new(from_port: usize, to_port: usize) -> Self {
        Self { from_port, to_port }
    }
}

/// A boundary port reference: (node index, port index)
pub type BoundaryPort = (NodeIndex, usize);

/// A directed graph of nodes with explicit input and output boundaries.
#[derive(Debug, Clone)]
pub struct Diagram<O> {
    /// The underlying graph structure
    pub graph: DiGraph<Node<O>, Edge>,
    /// Boundary input ports (where external data enters)
    pub inputs: Vec<BoundaryPort>,
    /// Boundary output ports (where results exit)
    pub outputs: Vec<BoundaryPort>,
}

impl<O: Clone> Diagram<O> {
    /// Create a new empty diagram.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Add a node to the diagram, returning its index.
    pub fn add_node(&mut self, node: Node<O>) -> NodeIndex {
        self.graph.add_node(node)
    }

    /// Connect an output port of one node to an input port of another.
    ///
    /// Fails if either port index is out of bounds or the shapes differ.
    pub fn connect(
        &mut self,
        from_node: NodeIndex,
        from_port: usize,
        to_node: NodeIndex,
        to_port: usize,
    ) -> Result<(), CoreError> {
        let from_shape = {
            let from = self.node(from_node)?;
            from.outputs
                .get(from_port)
                .ok_or(CoreError::InvalidPort {
                    index: from_port,
                    count: from.outputs.len(),
                })?
                .shape
                .clone()
        };

        let to = self.node(to_node)?;
        let to_shape = &to
            .inputs
            .get(to_port)
            .ok_or(CoreError::InvalidPort {
                index: to_port,
                count: to.inputs.len(),
            })?
            .shape;

        if !from_shape.is_compatible(to_shape) {
            return Err(CoreError::ShapeMismatch {
                expected: to_shape.clone(),
                got: from_shape,
            });
        }

        self.graph
            .add_edge(from_node, to_node, Edge::new(from_port, to_port));
        Ok(())
    }

    fn node(&self, idx: NodeIndex) -> Result<&Node<O>, CoreError> {
        self.graph
            .node_weight(idx)
            .ok_or_else(|| CoreError::ValidationError {
                reason: format!("node {:?} not found", idx),
            })
    }

    /// Kahn's algorithm: every node appears after all of its producers.
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>, CoreError> {
        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        let mut order = Vec::with_capacity(self.graph.node_count());

        for node in self.graph.node_indices() {
            let degree = self.graph.edges_directed(node, Direction::Incoming).count();
            in_degree.insert(node, degree);
            if degree == 0 {
                queue.push_back(node);
            }
        }

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for edge in self.graph.edges_directed(node, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&edge.target()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(edge.target());
                    }
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(CoreError::Cyclic {
                ordered: order.len(),
                total: self.graph.node_count(),
            });
        }
        Ok(order)
    }

    /// Check every edge and boundary against the node ports.
    pub fn validate(&self) -> Result<(), CoreError> {
        for edge_ref in self.graph.edge_references() {
            let from = self.node(edge_ref.source())?;
            let to = self.node(edge_ref.target())?;
            let edge = edge_ref.weight();

            let from_port = from.outputs.get(edge.from_port).ok_or(CoreError::InvalidPort {
                index: edge.from_port,
                count: from.outputs.len(),
            })?;
            let to_port = to.inputs.get(edge.to_port).ok_or(CoreError::InvalidPort {
                index: edge.to_port,
                count: to.inputs.len(),
            })?;

            if !from_port.shape.is_compatible(&to_port.shape) {
                return Err(CoreError::ShapeMismatch {
                    expected: to_port.shape.clone(),
                    got: from_port.shape.clone(),
                });
            }
        }

        for &(idx, port) in &self.outputs {
            let node = self.node(idx)?;
            if port >= node.outputs.len() {
                return Err(CoreError::InvalidPort {
                    index: port,
                    count: node.outputs.len(),
                });
            }
        }

        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

impl<O: Clone + fmt::Display> Diagram<O> {
    /// One line per node in evaluation order: `#id op <- [sources] : shape`.
    pub fn render_ascii(&self) -> String {
        let order = match self.topological_order() {
            Ok(order) => order,
            Err(e) => return format!("<unrenderable: {}>", e),
        };

        let mut out = String::new();
        for idx in order {
            let node = &self.graph[idx];
            let mut sources: Vec<(usize, usize)> = self
                .graph
                .edges_directed(idx, Direction::Incoming)
                .map(|e| (e.weight().to_port, e.source().index()))
                .collect();
            sources.sort_unstable();
            let sources = sources
                .iter()
                .map(|(_, s)| format!("#{}", s))
                .collect::<Vec<_>>()
                .join(", ");
            let shape = node
                .outputs
                .first()
                .map(|p| p.shape.to_string())
                .unwrap_or_default();
            out.push_str(&format!(
                "#{} {} <- [{}] : {}\n",
                idx.index(),
                node.op,
                sources,
                shape
            ));
        }
        out
    }
}

impl<O: Clone> Default for Diagram<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Clone + fmt::Debug> fmt::Display for Diagram<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Diagram({} nodes, {} edges)",
            self.node_count(),
            self.edge_count()
        )?;
        writeln!(f, "  Inputs: {:?}", self.inputs)?;
        writeln!(f, "  Outputs: {:?}", self.outputs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    enum TestOp {
        Leaf,
        Merge,
    }

    impl fmt::Display for TestOp {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TestOp::Leaf => write!(f, "Leaf"),
                TestOp::Merge => write!(f, "Merge"),
            }
        }
    }

    fn leaf(d: &mut Diagram<TestOp>) -> NodeIndex {
        d.add_node(Node::new(
            TestOp::Leaf,
            vec![],
            vec![Port::new(Shape::f32_row(2))],
        ))
    }

    fn merge(d: &mut Diagram<TestOp>) -> NodeIndex {
        d.add_node(Node::new(
            TestOp::Merge,
            vec![Port::new(Shape::f32_row(2)), Port::new(Shape::f32_row(2))],
            vec![Port::new(Shape::f32_row(2))],
        ))
    }

    #[test]
    fn test_connect_and_order() {
        let mut d = Diagram::new();
        let a = leaf(&mut d);
        let b = leaf(&mut d);
        let m = merge(&mut d);
        d.connect(a, 0, m, 0).unwrap();
        d.connect(b, 0, m, 1).unwrap();

        let order = d.topological_order().unwrap();
        let pos = |n| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(a) < pos(m));
        assert!(pos(b) < pos(m));
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_connect_shape_mismatch() {
        let mut d = Diagram::new();
        let a = leaf(&mut d);
        let wide = d.add_node(Node::new(
            TestOp::Merge,
            vec![Port::new(Shape::f32_row(3))],
            vec![Port::new(Shape::f32_row(3))],
        ));
        let err = d.connect(a, 0, wide, 0).unwrap_err();
        assert!(matches!(err, CoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_connect_invalid_port() {
        let mut d = Diagram::new();
        let a = leaf(&mut d);
        let m = merge(&mut d);
        let err = d.connect(a, 0, m, 5).unwrap_err();
        assert_eq!(err, CoreError::InvalidPort { index: 5, count: 2 });
    }

    #[test]
    fn test_cycle_detected() {
        let mut d = Diagram::new();
        let a = merge(&mut d);
        let b = merge(&mut d);
        d.connect(a, 0, b, 0).unwrap();
        d.connect(b, 0, a, 0).unwrap();
        assert!(matches!(
            d.topological_order(),
            Err(CoreError::Cyclic { ordered: 0, total: 2 })
        ));
    }

    #[test]
    fn test_render_ascii() {
        let mut d = Diagram::new();
        let a = leaf(&mut d);
        let b = leaf(&mut d);
        let m = merge(&mut d);
        d.connect(a, 0, m, 0).unwrap();
        d.connect(b, 0, m, 1).unwrap();

        let text = d.render_ascii();
        assert!(text.contains("#2 Merge <- [#0, #1] : f32[1, 2]"));
    }
}
