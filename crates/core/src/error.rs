//! # Error Types
//!
//! Wiring a composition tape can only fail in one way: two ports that do
//! not fit. These errors are raised while the tape is being built, before
//! any tensor flows through it.

use thiserror::Error;

use crate::shape::Shape;

/// Errors raised while wiring a diagram.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Shapes don't match at a connection.
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Attempted to connect ports that don't exist.
    #[error("Invalid port index: {index} (node has {count} ports)")]
    InvalidPort { index: usize, count: usize },

    /// A node referenced by an edge or boundary is missing.
    #[error("Diagram validation failed: {reason}")]
    ValidationError { reason: String },

    /// The diagram contains a cycle and has no evaluation order.
    #[error("Diagram is cyclic: ordered {ordered} of {total} nodes")]
    Cyclic { ordered: usize, total: usize },
}
