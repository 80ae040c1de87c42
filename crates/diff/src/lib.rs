//! # Diff - Runtime Tensors and Reverse-Mode Autodiff
//!
//! Computation graphs are string diagrams: boxes are ops, wires are tensors.
//! The forward pass evaluates the diagram in topological order and the
//! backward pass walks it in reverse, applying each op's VJP.
//!
//! ## Modules
//!
//! - [`ops`]: `RTensor` and the differentiable operations
//! - [`forward`]: `DiffGraph` builder and forward evaluation
//! - [`backward`]: Reverse-mode autodiff and gradient checking
//! - [`backend`]: Kernels used by the direct (non-tape) forward pass
//! - [`layers`]: `Linear`
//! - [`optim`]: SGD, momentum, named parameter collections
//!
//! ## Example
//!
//! ```rust
//! use rootalign_diff::backward::grad;
//! use rootalign_diff::forward::DiffGraph;
//! use rootalign_diff::ops::RTensor;
//!
//! // loss = sum(x + x); x feeds both ports, so its gradient is 2 everywhere
//! let mut graph = DiffGraph::new();
//! let x = graph.input(0, vec![1, 2]);
//! let twice = graph.add(x, x).unwrap();
//! let loss = graph.sum_all(twice).unwrap();
//! graph.mark_output(loss);
//!
//! let grads = grad(&graph, &[RTensor::row(vec![1.0, -2.0])]).unwrap();
//! assert_eq!(grads[0].data, vec![2.0, 2.0]);
//! ```

pub mod backend;
pub mod backward;
pub mod forward;
pub mod layers;
pub mod ops;
pub mod optim;

pub use backend::{Backend, Cpu};
pub use backward::{grad, grad_check, value_and_grad, GradCheckError};
pub use forward::DiffGraph;
pub use layers::Linear;
pub use ops::{DiffOp, RTensor};
pub use optim::{Optimizer, Parameters, SGDMomentum, SGD};
