//! # Core - Wiring for Composition Tapes
//!
//! This crate provides the graph layer the autodiff engine is built on:
//!
//! - **Shapes**: runtime descriptions of the tensor carried by each wire
//! - **Diagrams**: string-diagram data structures (petgraph DAGs with typed ports)
//! - **Errors**: wiring failures, raised before anything is evaluated
//!
//! A recursive composition over a parse tree is unrolled into a `Diagram`
//! whose topological order is the tree's post-order.

pub mod diagram;
pub mod error;
pub mod shape;

pub use diagram::{BoundaryPort, Diagram, Edge, Node, Port};
pub use error::CoreError;
pub use shape::{Shape, TypeId};
