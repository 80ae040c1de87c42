//! # Layers
//!
//! A [`Linear`] layer maps `1 × IN` rows to `1 × OUT` rows:
//! `y = x @ W + b` with `W` stored as `IN × OUT` so that the tape needs no
//! transpose.

use crate::backend::Backend;
use crate::ops::RTensor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An affine layer: `y = x @ W + b`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    /// Weight matrix `(in_dim, out_dim)`
    pub weight: RTensor,
    /// Bias row `(1, out_dim)`
    pub bias: RTensor,
}

impl Linear {
    /// Xavier-initialised weights, zero bias.
    ///
    /// scale = sqrt(2 / (fan_in + fan_out))
    pub fn new(in_dim: usize, out_dim: usize, seed: u64) -> Self {
        let scale = (2.0 / (in_dim + out_dim) as f32).sqrt();
        Self {
            weight: RTensor::randn_seeded(vec![in_dim, out_dim], scale, seed),
            bias: RTensor::zeros(vec![1, out_dim]),
        }
    }

    /// All-zero layer.
    pub fn zeros(in_dim: usize, out_dim: usize) -> Self {
        Self {
            weight: RTensor::zeros(vec![in_dim, out_dim]),
            bias: RTensor::zeros(vec![1, out_dim]),
        }
    }

    /// Build from explicit weights; `weight` is `(in, out)`, `bias` has `out` entries.
    pub fn from_parts(weight: RTensor, bias: RTensor) -> Self {
        assert_eq!(weight.shape.len(), 2, "weight must be 2D");
        assert_eq!(
            bias.size(),
            weight.shape[1],
            "bias has {} entries for {} outputs",
            bias.size(),
            weight.shape[1]
        );
        let out = weight.shape[1];
        Self {
            weight,
            bias: RTensor::from_data(vec![1, out], bias.data),
        }
    }

    pub fn in_dim(&self) -> usize {
        self.weight.shape[0]
    }

    pub fn out_dim(&self) -> usize {
        self.weight.shape[1]
    }

    /// Forward pass through the given backend.
    pub fn forward<B: Backend>(&self, backend: &B, x: &RTensor) -> RTensor {
        backend.affine(x, &self.weight, &self.bias)
    }

    /// Parameters in a fixed order: weight, bias.
    pub fn params(&self) -> [&RTensor; 2] {
        [&self.weight, &self.bias]
    }

    /// Mutable parameters in the same order as [`Linear::params`].
    pub fn params_mut(&mut self) -> [&mut RTensor; 2] {
        [&mut self.weight, &mut self.bias]
    }
}

impl fmt::Debug for Linear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Linear<{}, {}>", self.in_dim(), self.out_dim())
    }
}
