//! # Model Configuration
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```rust
//! use rootalign_model::{AlignConfig, LeafActivation};
//!
//! let config = AlignConfig::from_json_str(r#"{ "hidden_dim": 8, "leaf_activation": "tanh" }"#).unwrap();
//! assert_eq!(config.hidden_dim, 8);
//! assert_eq!(config.relation_num, 3);
//! assert_eq!(config.leaf_activation, LeafActivation::Tanh);
//! ```

use crate::ModelError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Nonlinearity applied after the word-to-hidden projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafActivation {
    /// Plain affine projection.
    #[default]
    Identity,
    Tanh,
}

/// Hyperparameters for building and training a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// Width H of every composed vector
    pub hidden_dim: usize,
    /// Number of relation labels R
    pub relation_num: usize,
    pub leaf_activation: LeafActivation,
    pub learning_rate: f32,
    pub epochs: usize,
    /// Element-wise gradient clipping bound
    pub max_grad: Option<f32>,
    /// Seed for weight initialisation and example shuffling
    pub seed: u64,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 150,
            relation_num: 3,
            leaf_activation: LeafActivation::Identity,
            learning_rate: 0.05,
            epochs: 10,
            max_grad: None,
            seed: 42,
        }
    }
}

impl AlignConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ModelError> {
        let config: AlignConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |reason: &str| {
            Err(ModelError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.hidden_dim == 0 {
            return invalid("hidden_dim must be positive");
        }
        if self.relation_num < 2 {
            return invalid("relation_num must be at least 2");
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid("learning_rate must be a positive number");
        }
        if let Some(m) = self.max_grad {
            if !(m.is_finite() && m > 0.0) {
                return invalid("max_grad must be a positive number");
            }
        }
        Ok(())
    }
}
