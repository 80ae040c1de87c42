//! # Differentiable Operations
//!
//! This module defines `RTensor`, the runtime tensor every layer of the
//! model works with, and `DiffOp`, the set of operations a composition tape
//! is built from. Each operation knows how to:
//!
//! - Execute forward (compute outputs from inputs)
//! - Compute its VJP (vector-Jacobian product) for backprop
//!
//! ## Operations
//!
//! | Op | Forward | Backward |
//! |----|---------|----------|
//! | Add | a + b | grad flows to both |
//! | MatMul | A @ B | ∂L/∂A = grad @ Bᵀ |
//! | Concat | [a \| b] | split grad by columns |
//! | Sigmoid | σ(x) | grad × σ(1 − σ) |
//! | Tanh | tanh(x) | grad × (1 − tanh²) |
//! | Softmax | row-wise softmax | s × (g − Σ g·s) |
//! | CrossEntropy | −ln p[target] | −1/p at target |
//! | SumAll | sum(x) | broadcast grad |

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Probabilities are clamped to this floor before taking a logarithm.
pub const LOG_EPS: f32 = 1e-12;

/// A runtime tensor for graph evaluation.
///
/// Dimensions are dynamic; composed node vectors are `1 × H` rows.
///
/// Deserialization rejects a `data` buffer whose length does not match
/// `shape`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TensorData")]
pub struct RTensor {
    /// Shape of the tensor
    pub shape: Vec<usize>,
    /// Flattened data in row-major order
    pub data: Vec<f32>,
}

/// Unchecked wire form of [`RTensor`].
#[derive(Deserialize)]
struct TensorData {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl TryFrom<TensorData> for RTensor {
    type Error = String;

    fn try_from(raw: TensorData) -> Result<Self, Self::Error> {
        let expected = element_count(&raw.shape)
            .ok_or_else(|| format!("shape {:?} has too many elements", raw.shape))?;
        if raw.data.len() != expected {
            return Err(format!(
                "shape {:?} needs {} values, got {}",
                raw.shape,
                expected,
                raw.data.len()
            ));
        }
        Ok(Self {
            shape: raw.shape,
            data: raw.data,
        })
    }
}

/// Product of `shape`, or `None` on overflow.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |n, &d| n.checked_mul(d))
}

impl RTensor {
    /// Create a tensor filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; size],
        }
    }

    /// Create a tensor from data with given shape.
    pub fn from_data(shape: Vec<usize>, data: Vec<f32>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length {} doesn't match shape {:?}",
            data.len(),
            shape
        );
        Self { shape, data }
    }

    /// Create a scalar tensor.
    pub fn scalar(value: f32) -> Self {
        Self {
            shape: vec![],
            data: vec![value],
        }
    }

    /// Create a 1D vector tensor.
    pub fn vector(data: Vec<f32>) -> Self {
        let len = data.len();
        Self {
            shape: vec![len],
            data,
        }
    }

    /// Create a 2D matrix tensor.
    pub fn matrix(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), rows * cols);
        Self {
            shape: vec![rows, cols],
            data,
        }
    }

    /// Create a `1 × n` row tensor.
    pub fn row(data: Vec<f32>) -> Self {
        let len = data.len();
        Self {
            shape: vec![1, len],
            data,
        }
    }

    /// Check if this is a scalar.
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty() || (self.shape.len() == 1 && self.shape[0] == 1)
    }

    /// Get the scalar value (panics if not a scalar).
    pub fn as_scalar(&self) -> f32 {
        assert!(self.is_scalar() || self.data.len() == 1);
        self.data[0]
    }

    /// True when `data` holds exactly as many values as `shape` describes.
    pub fn is_consistent(&self) -> bool {
        element_count(&self.shape) == Some(self.data.len())
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Rows of a 2D tensor.
    pub fn rows(&self) -> usize {
        assert_eq!(self.shape.len(), 2, "rows requires 2D tensor");
        self.shape[0]
    }

    /// Columns of a 2D tensor.
    pub fn cols(&self) -> usize {
        assert_eq!(self.shape.len(), 2, "cols requires 2D tensor");
        self.shape[1]
    }

    /// Copy row `i` of a 2D tensor out as a `1 × cols` tensor.
    pub fn get_row(&self, i: usize) -> RTensor {
        let cols = self.cols();
        assert!(i < self.rows(), "row {} out of range for {:?}", i, self.shape);
        RTensor::row(self.data[i * cols..(i + 1) * cols].to_vec())
    }

    /// Mutable view of row `i` of a 2D tensor.
    pub fn row_slice_mut(&mut self, i: usize) -> &mut [f32] {
        let cols = self.cols();
        assert!(i < self.rows(), "row {} out of range for {:?}", i, self.shape);
        &mut self.data[i * cols..(i + 1) * cols]
    }

    fn zip_with(&self, other: &RTensor, what: &str, f: impl Fn(f32, f32) -> f32) -> RTensor {
        assert_eq!(self.shape, other.shape, "Shape mismatch for {}", what);
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        RTensor {
            shape: self.shape.clone(),
            data,
        }
    }

    /// Element-wise addition.
    pub fn add(&self, other: &RTensor) -> RTensor {
        self.zip_with(other, "add", |a, b| a + b)
    }

    /// Element-wise multiplication.
    pub fn mul(&self, other: &RTensor) -> RTensor {
        self.zip_with(other, "mul", |a, b| a * b)
    }

    /// Apply a function to each element.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> RTensor {
        RTensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Element-wise logistic sigmoid; every output lies in (0, 1).
    pub fn sigmoid(&self) -> RTensor {
        self.map(|x| 1.0 / (1.0 + (-x).exp()))
    }

    /// Element-wise hyperbolic tangent.
    pub fn tanh(&self) -> RTensor {
        self.map(f32::tanh)
    }

    /// Sum all elements to a scalar.
    pub fn sum_all(&self) -> RTensor {
        RTensor::scalar(self.data.iter().sum())
    }

    /// Matrix multiplication (2D tensors only).
    pub fn matmul(&self, other: &RTensor) -> RTensor {
        assert_eq!(self.shape.len(), 2, "matmul requires 2D tensor");
        assert_eq!(other.shape.len(), 2, "matmul requires 2D tensor");

        let (m, k) = (self.shape[0], self.shape[1]);
        let (k2, n) = (other.shape[0], other.shape[1]);
        assert_eq!(k, k2, "Inner dimensions must match: {} vs {}", k, k2);

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for kk in 0..k {
                let a = self.data[i * k + kk];
                if a == 0.0 {
                    continue;
                }
                let row = &other.data[kk * n..(kk + 1) * n];
                for (out, &b) in result[i * n..(i + 1) * n].iter_mut().zip(row) {
                    *out += a * b;
                }
            }
        }

        RTensor {
            shape: vec![m, n],
            data: result,
        }
    }

    /// Transpose a 2D matrix.
    pub fn transpose(&self) -> RTensor {
        let (rows, cols) = (self.rows(), self.cols());
        let mut result = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }
        RTensor {
            shape: vec![cols, rows],
            data: result,
        }
    }

    /// Concatenate two 2D tensors with the same row count along columns.
    ///
    /// `(m × a) ‖ (m × b) → (m × (a + b))`
    pub fn concat_cols(&self, other: &RTensor) -> RTensor {
        let rows = self.rows();
        assert_eq!(rows, other.rows(), "concat requires equal row counts");
        let (a, b) = (self.cols(), other.cols());

        let mut data = Vec::with_capacity(rows * (a + b));
        for i in 0..rows {
            data.extend_from_slice(&self.data[i * a..(i + 1) * a]);
            data.extend_from_slice(&other.data[i * b..(i + 1) * b]);
        }
        RTensor {
            shape: vec![rows, a + b],
            data,
        }
    }

    /// Inverse of `concat_cols`: split a 2D tensor after column `at`.
    pub fn split_cols(&self, at: usize) -> (RTensor, RTensor) {
        let (rows, cols) = (self.rows(), self.cols());
        assert!(at <= cols, "split point {} beyond {} columns", at, cols);

        let mut left = Vec::with_capacity(rows * at);
        let mut right = Vec::with_capacity(rows * (cols - at));
        for i in 0..rows {
            let row = &self.data[i * cols..(i + 1) * cols];
            left.extend_from_slice(&row[..at]);
            right.extend_from_slice(&row[at..]);
        }
        (
            RTensor::matrix(rows, at, left),
            RTensor::matrix(rows, cols - at, right),
        )
    }

    /// Numerically stable softmax across the last dimension of each row.
    pub fn softmax_rows(&self) -> RTensor {
        let cols = *self.shape.last().unwrap_or(&1);
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.data.chunks(cols.max(1)) {
            let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = row.iter().map(|&x| (x - max).exp()).collect();
            let sum: f32 = exps.iter().sum();
            data.extend(exps.into_iter().map(|e| e / sum));
        }
        RTensor {
            shape: self.shape.clone(),
            data,
        }
    }

    /// Index of the largest element.
    pub fn argmax(&self) -> usize {
        self.data
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &x)| {
                if x > best.1 {
                    (i, x)
                } else {
                    best
                }
            })
            .0
    }

    /// Broadcast a scalar to match a given shape.
    pub fn broadcast_to(&self, shape: Vec<usize>) -> RTensor {
        if self.shape == shape {
            return self.clone();
        }
        if self.is_scalar() || self.data.len() == 1 {
            let size: usize = shape.iter().product();
            return RTensor {
                shape,
                data: vec![self.data[0]; size],
            };
        }
        panic!("Cannot broadcast shape {:?} to {:?}", self.shape, shape);
    }

    /// Create a tensor of zeros with the same shape.
    pub fn zeros_like(&self) -> RTensor {
        RTensor::zeros(self.shape.clone())
    }

    /// Values drawn from N(0, scale²), reproducible for a given seed.
    pub fn randn_seeded(shape: Vec<usize>, scale: f32, seed: u64) -> RTensor {
        let size: usize = shape.iter().product();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let data = match Normal::new(0.0f32, scale) {
            Ok(normal) => (0..size).map(|_| normal.sample(&mut rng)).collect(),
            Err(_) => vec![0.0; size],
        };
        RTensor { shape, data }
    }

    /// Values drawn uniformly from `[low, high)`, reproducible for a given seed.
    pub fn uniform_seeded(shape: Vec<usize>, low: f32, high: f32, seed: u64) -> RTensor {
        let size: usize = shape.iter().product();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let dist = Uniform::new(low, high);
        let data = (0..size).map(|_| dist.sample(&mut rng)).collect();
        RTensor { shape, data }
    }

    /// Compute L2 norm.
    pub fn norm(&self) -> f32 {
        self.data.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Same shape and every element within `tol`.
    pub fn approx_eq(&self, other: &RTensor, tol: f32) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| (a - b).abs() <= tol)
    }
}

impl fmt::Debug for RTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shape.is_empty() {
            write!(f, "RTensor(scalar={})", self.data[0])
        } else if self.shape.len() == 1 {
            write!(f, "RTensor(vec[{}]={:?})", self.shape[0], self.data)
        } else {
            write!(f, "RTensor(shape={:?}, data={:?})", self.shape, self.data)
        }
    }
}

/// Differentiable operations for composition tapes.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOp {
    /// Input placeholder - passes through the boundary input
    Input { index: usize },

    /// Element-wise addition: a + b
    Add,

    /// Matrix multiplication: A @ B
    MatMul,

    /// Column concatenation of two row blocks
    Concat,

    /// Element-wise logistic sigmoid
    Sigmoid,

    /// Element-wise tanh
    Tanh,

    /// Softmax across the last dimension
    Softmax,

    /// Negative log-probability of `target` in a `1 × R` distribution
    CrossEntropy { target: usize },

    /// Sum all elements to a scalar
    SumAll,
}

impl DiffOp {
    /// Execute the forward pass for this operation.
    pub fn forward(&self, inputs: &[RTensor]) -> Vec<RTensor> {
        assert_eq!(
            inputs.len(),
            self.num_inputs(),
            "{} requires {} inputs",
            self,
            self.num_inputs()
        );

        let out = match self {
            DiffOp::Input { .. } => inputs[0].clone(),
            DiffOp::Add => inputs[0].add(&inputs[1]),
            DiffOp::MatMul => inputs[0].matmul(&inputs[1]),
            DiffOp::Concat => inputs[0].concat_cols(&inputs[1]),
            DiffOp::Sigmoid => inputs[0].sigmoid(),
            DiffOp::Tanh => inputs[0].tanh(),
            DiffOp::Softmax => inputs[0].softmax_rows(),
            DiffOp::CrossEntropy { target } => {
                let p = inputs[0].data[*target].max(LOG_EPS);
                RTensor::scalar(-p.ln())
            }
            DiffOp::SumAll => inputs[0].sum_all(),
        };
        vec![out]
    }

    /// Number of inputs this operation expects.
    pub fn num_inputs(&self) -> usize {
        match self {
            DiffOp::Input { .. }
            | DiffOp::Sigmoid
            | DiffOp::Tanh
            | DiffOp::Softmax
            | DiffOp::CrossEntropy { .. }
            | DiffOp::SumAll => 1,
            DiffOp::Add | DiffOp::MatMul | DiffOp::Concat => 2,
        }
    }

    /// Compute the Vector-Jacobian Product (VJP) for reverse-mode autodiff.
    ///
    /// `inputs` are the values this op saw during forward, `outputs` what it
    /// produced, and `output_grads` the loss gradient w.r.t. those outputs.
    /// Returns one gradient per input.
    pub fn vjp(
        &self,
        inputs: &[RTensor],
        outputs: &[RTensor],
        output_grads: &[RTensor],
    ) -> Vec<RTensor> {
        let grad = &output_grads[0];
        match self {
            DiffOp::Input { .. } => vec![grad.clone()],

            DiffOp::Add => vec![grad.clone(), grad.clone()],

            DiffOp::MatMul => {
                // C = A @ B: ∂L/∂A = ∂L/∂C @ Bᵀ, ∂L/∂B = Aᵀ @ ∂L/∂C
                let (a, b) = (&inputs[0], &inputs[1]);
                vec![grad.matmul(&b.transpose()), a.transpose().matmul(grad)]
            }

            DiffOp::Concat => {
                let (left, right) = grad.split_cols(inputs[0].cols());
                vec![left, right]
            }

            DiffOp::Sigmoid => {
                let s = &outputs[0];
                vec![grad.mul(&s.map(|v| v * (1.0 - v)))]
            }

            DiffOp::Tanh => {
                let t = &outputs[0];
                vec![grad.mul(&t.map(|v| 1.0 - v * v))]
            }

            DiffOp::Softmax => {
                // ∂L/∂xᵢ = sᵢ (gᵢ − Σⱼ gⱼ sⱼ), per row
                let s = &outputs[0];
                let cols = *s.shape.last().unwrap_or(&1);
                let mut data = Vec::with_capacity(s.data.len());
                for (srow, grow) in s.data.chunks(cols).zip(grad.data.chunks(cols)) {
                    let dot: f32 = srow.iter().zip(grow).map(|(a, b)| a * b).sum();
                    data.extend(srow.iter().zip(grow).map(|(si, gi)| si * (gi - dot)));
                }
                vec![RTensor::from_data(s.shape.clone(), data)]
            }

            DiffOp::CrossEntropy { target } => {
                let p = &inputs[0];
                let mut g = p.zeros_like();
                g.data[*target] = -grad.as_scalar() / p.data[*target].max(LOG_EPS);
                vec![g]
            }

            DiffOp::SumAll => vec![grad.broadcast_to(inputs[0].shape.clone())],
        }
    }
}

impl fmt::Display for DiffOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffOp::Input { index } => write!(f, "Input[{}]", index),
            DiffOp::Add => write!(f, "Add"),
            DiffOp::MatMul => write!(f, "MatMul"),
            DiffOp::Concat => write!(f, "Concat"),
            DiffOp::Sigmoid => write!(f, "Sigmoid"),
            DiffOp::Tanh => write!(f, "Tanh"),
            DiffOp::Softmax => write!(f, "Softmax"),
            DiffOp::CrossEntropy { target } => write!(f, "CrossEntropy[{}]", target),
            DiffOp::SumAll => write!(f, "SumAll"),
        }
    }
}
