//! Smoke tests for the core crate.
//!
//! Diagrams are built through the public API only, the way the autodiff
//! crate builds composition tapes.

use rootalign_core::diagram::{Diagram, Node, Port};
use rootalign_core::{CoreError, Shape};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Leaf,
    Merge,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Leaf => write!(f, "leaf"),
            Op::Merge => write!(f, "merge"),
        }
    }
}

fn leaf(d: &mut Diagram<Op>, h: usize) -> petgraph::graph::NodeIndex {
    d.add_node(Node::new(Op::Leaf, vec![], vec![Port::new(Shape::f32_row(h))]))
}

fn merge(d: &mut Diagram<Op>, h: usize) -> petgraph::graph::NodeIndex {
    d.add_node(Node::new(
        Op::Merge,
        vec![Port::new(Shape::f32_row(h)), Port::new(Shape::f32_row(h))],
        vec![Port::new(Shape::f32_row(h))],
    ))
}

// ============================================================================
// Shape Tests
// ============================================================================

#[test]
fn smoke_shapes_exist() {
    assert_eq!(Shape::f32_scalar().rank(), 0);
    assert_eq!(Shape::f32_vector(128).rank(), 1);
    assert_eq!(Shape::f32_matrix(64, 128).rank(), 2);
    assert_eq!(Shape::f32_row(5).dims, vec![1, 5]);
}

#[test]
fn smoke_shape_compatibility() {
    assert!(Shape::f32_row(10).is_compatible(&Shape::f32_row(10)));
    assert!(!Shape::f32_row(10).is_compatible(&Shape::f32_vector(10)));
}

// ============================================================================
// Diagram Tests
// ============================================================================

#[test]
fn smoke_tree_diagram_orders_children_first() {
    // ((a b) c)
    let mut d = Diagram::new();
    let a = leaf(&mut d, 2);
    let b = leaf(&mut d, 2);
    let c = leaf(&mut d, 2);
    let ab = merge(&mut d, 2);
    let root = merge(&mut d, 2);

    d.connect(a, 0, ab, 0).unwrap();
    d.connect(b, 0, ab, 1).unwrap();
    d.connect(ab, 0, root, 0).unwrap();
    d.connect(c, 0, root, 1).unwrap();
    d.outputs.push((root, 0));

    assert!(d.validate().is_ok());
    assert_eq!(d.node_count(), 5);
    assert_eq!(d.edge_count(), 4);

    let order = d.topological_order().unwrap();
    let pos = |n| order.iter().position(|&x| x == n).unwrap();
    assert!(pos(a) < pos(ab) && pos(b) < pos(ab));
    assert!(pos(ab) < pos(root) && pos(c) < pos(root));
    assert_eq!(*order.last().unwrap(), root);
}

#[test]
fn smoke_connect_rejects_width_mismatch() {
    let mut d = Diagram::new();
    let a = leaf(&mut d, 3);
    let m = merge(&mut d, 2);

    let err = d.connect(a, 0, m, 0).unwrap_err();
    assert!(matches!(err, CoreError::ShapeMismatch { .. }));
    assert_eq!(d.edge_count(), 0);
}

#[test]
fn smoke_connect_rejects_missing_port() {
    let mut d = Diagram::new();
    let a = leaf(&mut d, 2);
    let m = merge(&mut d, 2);

    assert_eq!(
        d.connect(a, 0, m, 2).unwrap_err(),
        CoreError::InvalidPort { index: 2, count: 2 }
    );
}

#[test]
fn smoke_cycle_detected() {
    let mut d = Diagram::new();
    let x = merge(&mut d, 1);
    let y = merge(&mut d, 1);
    d.connect(x, 0, y, 0).unwrap();
    d.connect(y, 0, x, 0).unwrap();

    assert!(matches!(
        d.topological_order(),
        Err(CoreError::Cyclic { ordered: 0, total: 2 })
    ));
    assert!(d.render_ascii().starts_with("<unrenderable"));
}

#[test]
fn smoke_render_lists_sources() {
    let mut d = Diagram::new();
    let a = leaf(&mut d, 2);
    let b = leaf(&mut d, 2);
    let m = merge(&mut d, 2);
    d.connect(a, 0, m, 0).unwrap();
    d.connect(b, 0, m, 1).unwrap();

    let text = d.render_ascii();
    assert!(text.contains("#2 merge <- [#0, #1] : f32[1, 2]"));
}
