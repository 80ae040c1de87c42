//! # Shapes - Wire Types for Composition Tapes
//!
//! Every wire in a composition tape carries a tensor of a known shape.
//! Leaf projections, child merges and the alignment head all consume and
//! produce row vectors (`1 × n`), so the shape helpers here favour that case.
//!
//! ## Design Choices
//!
//! Shapes are checked at runtime (`Vec<usize>`) because tree topology, and
//! therefore the wiring of a tape, is only known once a sentence arrives.

use std::fmt;

/// A type identifier for the element type carried by a wire.
///
/// Examples: "f32", "index"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeId(pub &'static str);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dimensions of the tensor flowing along a wire.
///
/// Two ports may only be connected when their shapes are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    /// The element type
    pub ty: TypeId,
    /// Dimension sizes (empty = scalar, [n] = vector, [m, n] = matrix)
    pub dims: Vec<usize>,
}

impl Shape {
    /// Create a new shape with given type and dimensions.
    pub fn new(ty: TypeId, dims: Vec<usize>) -> Self {
        Self { ty, dims }
    }

    /// Scalar `f32` shape (the loss wire).
    pub fn f32_scalar() -> Self {
        Self::new(TypeId("f32"), vec![])
    }

    /// Plain `f32` vector.
    pub fn f32_vector(len: usize) -> Self {
        Self::new(TypeId("f32"), vec![len])
    }

    /// `f32` matrix.
    pub fn f32_matrix(rows: usize, cols: usize) -> Self {
        Self::new(TypeId("f32"), vec![rows, cols])
    }

    /// `1 × len` row vector: the shape of every composed node vector.
    pub fn f32_row(len: usize) -> Self {
        Self::f32_matrix(1, len)
    }

    /// Build an `f32` shape from raw dimensions.
    pub fn f32_dims(dims: &[usize]) -> Self {
        Self::new(TypeId("f32"), dims.to_vec())
    }

    /// Number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Whether a wire of this shape may feed a port of shape `other`.
    pub fn is_compatible(&self, other: &Shape) -> bool {
        self == other
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}[{}]", self.ty, dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::f32_scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.numel(), 1);
        assert_eq!(s.to_string(), "f32[]");
    }

    #[test]
    fn test_row_shape() {
        let r = Shape::f32_row(4);
        assert_eq!(r.dims, vec![1, 4]);
        assert_eq!(r.numel(), 4);
        assert_eq!(r.to_string(), "f32[1, 4]");
    }

    #[test]
    fn test_dims_roundtrip() {
        assert_eq!(Shape::f32_dims(&[3]), Shape::f32_vector(3));
        assert_eq!(Shape::f32_dims(&[2, 5]), Shape::f32_matrix(2, 5));
    }

    #[test]
    fn test_shape_compatibility() {
        let a = Shape::f32_row(10);
        let b = Shape::f32_row(10);
        let c = Shape::f32_vector(10);

        assert!(a.is_compatible(&b));
        assert!(!a.is_compatible(&c));
    }
}
