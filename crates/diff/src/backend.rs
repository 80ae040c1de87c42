//! # Numeric Backends
//!
//! Layers never call tensor kernels directly; they go through a [`Backend`]
//! chosen once when the model is built. Swapping the backend (a different
//! device, an instrumented one in tests) does not fork the layer code.
//!
//! ```rust
//! use rootalign_diff::backend::{Backend, Cpu};
//! use rootalign_diff::ops::RTensor;
//!
//! let cpu = Cpu;
//! let x = RTensor::row(vec![1.0, 2.0]);
//! let w = RTensor::matrix(2, 1, vec![0.5, 0.25]);
//! let b = RTensor::row(vec![1.0]);
//! assert_eq!(cpu.affine(&x, &w, &b).data, vec![2.0]);
//! ```

use crate::ops::RTensor;
use std::fmt;

/// The kernels a composition pass needs.
///
/// All operations take `1 × n` (or `m × n`) row-major tensors and must be
/// pure: same inputs, same outputs.
pub trait Backend: fmt::Debug + Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// `x @ weight + bias`, with `bias` broadcast over the rows of `x`.
    fn affine(&self, x: &RTensor, weight: &RTensor, bias: &RTensor) -> RTensor;

    /// Column concatenation `[a | b]`.
    fn concat(&self, a: &RTensor, b: &RTensor) -> RTensor;

    /// Element-wise logistic sigmoid.
    fn sigmoid(&self, x: &RTensor) -> RTensor;

    /// Element-wise tanh.
    fn tanh(&self, x: &RTensor) -> RTensor;

    /// Row-wise softmax.
    fn softmax(&self, x: &RTensor) -> RTensor;

    /// Row `index` of a 2D table as a `1 × cols` tensor.
    fn gather_row(&self, table: &RTensor, index: usize) -> RTensor;
}

/// Single-threaded host backend built on the `RTensor` kernels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cpu;

impl Backend for Cpu {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn affine(&self, x: &RTensor, weight: &RTensor, bias: &RTensor) -> RTensor {
        let mut out = x.matmul(weight);
        let cols = out.cols();
        assert_eq!(bias.size(), cols, "bias width {} vs {}", bias.size(), cols);
        for row in out.data.chunks_mut(cols) {
            for (o, b) in row.iter_mut().zip(bias.data.iter()) {
                *o += b;
            }
        }
        out
    }

    fn concat(&self, a: &RTensor, b: &RTensor) -> RTensor {
        a.concat_cols(b)
    }

    fn sigmoid(&self, x: &RTensor) -> RTensor {
        x.sigmoid()
    }

    fn tanh(&self, x: &RTensor) -> RTensor {
        x.tanh()
    }

    fn softmax(&self, x: &RTensor) -> RTensor {
        x.softmax_rows()
    }

    fn gather_row(&self, table: &RTensor, index: usize) -> RTensor {
        table.get_row(index)
    }
}

impl<B: Backend + ?Sized> Backend for &B {
    fn name(&self) -> &'static str {
        (**self).name()
    }
    fn affine(&self, x: &RTensor, weight: &RTensor, bias: &RTensor) -> RTensor {
        (**self).affine(x, weight, bias)
    }
    fn concat(&self, a: &RTensor, b: &RTensor) -> RTensor {
        (**self).concat(a, b)
    }
    fn sigmoid(&self, x: &RTensor) -> RTensor {
        (**self).sigmoid(x)
    }
    fn tanh(&self, x: &RTensor) -> RTensor {
        (**self).tanh(x)
    }
    fn softmax(&self, x: &RTensor) -> RTensor {
        (**self).softmax(x)
    }
    fn gather_row(&self, table: &RTensor, index: usize) -> RTensor {
        (**self).gather_row(table, index)
    }
}
