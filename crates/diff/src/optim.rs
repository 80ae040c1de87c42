//! # Optimization
//!
//! Gradient-based parameter updates for the training loop.
//!
//! ## Optimizers
//!
//! - [`SGD`]: Stochastic Gradient Descent, with optional gradient clipping
//! - [`SGDMomentum`]: SGD with a velocity buffer per parameter slot
//!
//! Updates work on flat slices so that a single embedding row can be
//! updated without touching the rest of the table.
//!
//! ## Example
//!
//! ```rust
//! use rootalign_diff::optim::{Optimizer, SGD};
//! use rootalign_diff::ops::RTensor;
//!
//! let mut param = RTensor::vector(vec![1.0, 2.0]);
//! let grad = RTensor::vector(vec![0.5, 0.5]);
//!
//! let mut optimizer = SGD::new(0.1);
//! optimizer.update(0, &mut param.data, &grad.data);
//! assert!((param.data[0] - 0.95).abs() < 1e-6);
//! ```

use crate::ops::RTensor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A rule turning a gradient into a parameter update.
///
/// `slot` identifies the parameter (or parameter row) across steps so that
/// stateful optimizers can keep per-parameter buffers.
pub trait Optimizer {
    /// Update `param` in place from `grad`.
    fn update(&mut self, slot: usize, param: &mut [f32], grad: &[f32]);
}

fn clipped(g: f32, max_grad: Option<f32>) -> f32 {
    match max_grad {
        Some(m) => g.clamp(-m, m),
        None => g,
    }
}

/// Stochastic Gradient Descent optimizer.
///
/// Updates parameters using: `θ = θ - lr * clip(∇L)`
#[derive(Debug, Clone)]
pub struct SGD {
    /// Learning rate (step size)
    pub learning_rate: f32,
    /// Clip each gradient element to `[-max_grad, max_grad]`
    pub max_grad: Option<f32>,
}

impl SGD {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            max_grad: None,
        }
    }

    /// Enable element-wise gradient clipping.
    pub fn with_clip(mut self, max_grad: f32) -> Self {
        self.max_grad = Some(max_grad);
        self
    }
}

impl Optimizer for SGD {
    fn update(&mut self, _slot: usize, param: &mut [f32], grad: &[f32]) {
        for (p, &g) in param.iter_mut().zip(grad.iter()) {
            *p -= self.learning_rate * clipped(g, self.max_grad);
        }
    }
}

/// SGD with momentum.
///
/// - `v = momentum * v + grad`
/// - `θ = θ - lr * v`
#[derive(Debug, Clone)]
pub struct SGDMomentum {
    pub learning_rate: f32,
    /// Momentum coefficient (typically 0.9)
    pub momentum: f32,
    pub max_grad: Option<f32>,
    velocities: HashMap<usize, Vec<f32>>,
}

impl SGDMomentum {
    pub fn new(learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            max_grad: None,
            velocities: HashMap::new(),
        }
    }

    pub fn with_clip(mut self, max_grad: f32) -> Self {
        self.max_grad = Some(max_grad);
        self
    }
}

impl Optimizer for SGDMomentum {
    fn update(&mut self, slot: usize, param: &mut [f32], grad: &[f32]) {
        let velocity = self
            .velocities
            .entry(slot)
            .or_insert_with(|| vec![0.0; param.len()]);

        for ((p, v), &g) in param.iter_mut().zip(velocity.iter_mut()).zip(grad.iter()) {
            *v = self.momentum * *v + clipped(g, self.max_grad);
            *p -= self.learning_rate * *v;
        }
    }
}

/// An ordered collection of named tensors.
///
/// Used both for a model's parameters and for the matching gradients.
/// Deserialization rejects mismatched `names`/`tensors` lengths and
/// repeated names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NamedTensors")]
pub struct Parameters {
    names: Vec<String>,
    tensors: Vec<RTensor>,
}

#[derive(Deserialize)]
struct NamedTensors {
    names: Vec<String>,
    tensors: Vec<RTensor>,
}

impl TryFrom<NamedTensors> for Parameters {
    type Error = String;

    fn try_from(raw: NamedTensors) -> Result<Self, Self::Error> {
        if raw.names.len() != raw.tensors.len() {
            return Err(format!(
                "{} names for {} tensors",
                raw.names.len(),
                raw.tensors.len()
            ));
        }
        let mut params = Parameters::new();
        for (name, tensor) in raw.names.iter().zip(raw.tensors) {
            if params.get(name).is_some() {
                return Err(format!("parameter '{}' appears twice", name));
            }
            params.register(name, tensor);
        }
        Ok(params)
    }
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tensor under `name`; a repeated name replaces the old tensor.
    pub fn register(&mut self, name: &str, tensor: RTensor) {
        match self.names.iter().position(|n| n == name) {
            Some(i) => self.tensors[i] = tensor,
            None => {
                self.names.push(name.to_string());
                self.tensors.push(tensor);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&RTensor> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.tensors[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut RTensor> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &mut self.tensors[i])
    }

    pub fn as_slice(&self) -> &[RTensor] {
        &self.tensors
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Iterate over (name, tensor) pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RTensor)> {
        self.names
            .iter()
            .zip(self.tensors.iter())
            .map(|(n, t)| (n.as_str(), t))
    }

    /// Total number of scalar parameters.
    pub fn num_parameters(&self) -> usize {
        self.tensors.iter().map(|t| t.data.len()).sum()
    }

    /// Global L2 norm over every tensor.
    pub fn global_norm(&self) -> f32 {
        self.tensors
            .iter()
            .flat_map(|t| t.data.iter())
            .map(|x| x * x)
            .sum::<f32>()
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sgd_update() {
        let mut p = vec![1.0, 2.0, 3.0];
        let mut optimizer = SGD::new(1.0);
        optimizer.update(0, &mut p, &[0.1, 0.2, 0.3]);

        assert!((p[0] - 0.9).abs() < 1e-6);
        assert!((p[1] - 1.8).abs() < 1e-6);
        assert!((p[2] - 2.7).abs() < 1e-6);
    }

    #[test]
    fn test_sgd_with_clip() {
        let mut p = vec![1.0, 2.0, 3.0];
        let mut optimizer = SGD::new(1.0).with_clip(1.0);
        optimizer.update(0, &mut p, &[10.0, -10.0, 0.5]);

        // Clipped grads: [1.0, -1.0, 0.5]
        assert!((p[0] - 0.0).abs() < 1e-6);
        assert!((p[1] - 3.0).abs() < 1e-6);
        assert!((p[2] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_sgd_momentum() {
        let mut p = vec![1.0, 2.0];
        let mut optimizer = SGDMomentum::new(0.1, 0.9);

        // First step: v = grad
        optimizer.update(0, &mut p, &[0.1, 0.1]);
        assert!((p[0] - 0.99).abs() < 1e-6);

        // Second step: v = 1.9 * grad
        optimizer.update(0, &mut p, &[0.1, 0.1]);
        assert!((p[0] - 0.971).abs() < 1e-6);
    }

    #[test]
    fn test_momentum_slots_independent() {
        let mut a = vec![0.0];
        let mut b = vec![0.0];
        let mut optimizer = SGDMomentum::new(1.0, 0.5);

        optimizer.update(0, &mut a, &[1.0]);
        optimizer.update(0, &mut a, &[1.0]);
        optimizer.update(7, &mut b, &[1.0]);

        assert!((a[0] - -2.5).abs() < 1e-6);
        assert!((b[0] - -1.0).abs() < 1e-6);
    }

    #[test]
    fn test_parameters_collection() {
        let mut params = Parameters::new();
        params.register("weight", RTensor::matrix(2, 3, vec![1.0; 6]));
        params.register("bias", RTensor::row(vec![0.0, 0.0]));

        assert_eq!(params.len(), 2);
        assert_eq!(params.num_parameters(), 8);
        assert_eq!(params.names().collect::<Vec<_>>(), vec!["weight", "bias"]);
        assert!(params.get("nonexistent").is_none());

        params.register("bias", RTensor::row(vec![3.0, 4.0]));
        assert_eq!(params.len(), 2);
        assert!((params.global_norm() - (6.0f32 + 9.0 + 16.0).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_parameters_json_roundtrip() {
        let mut params = Parameters::new();
        params.register("w", RTensor::row(vec![0.25, -0.5]));
        let json = serde_json::to_string(&params).unwrap();
        let back: Parameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_parameters_json_rejects_malformed() {
        for bad in [
            r#"{"names":["a","b"],"tensors":[{"shape":[1],"data":[1.0]}]}"#,
            r#"{"names":["a","a"],"tensors":[{"shape":[1],"data":[1.0]},{"shape":[1],"data":[2.0]}]}"#,
            r#"{"names":["a"],"tensors":[{"shape":[2],"data":[1.0]}]}"#,
        ] {
            assert!(serde_json::from_str::<Parameters>(bad).is_err(), "{}", bad);
        }
    }
}
