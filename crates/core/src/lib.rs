//! # Core - Symflow Foundations
//!
//! This crate provides the foundational abstractions shared by the symflow
//! crates:
//!
//! - **Shapes**: element types and dimensions carried by every wire
//! - **Errors**: structural wiring failures
//! - **Diagrams**: the append-only expression DAG that graphs are stored in
//! - **Config**: per-graph settings (test values, float type)
//!
//! ## Design Philosophy
//!
//! Expressions are values. A graph only ever grows; rewriting an expression
//! builds new nodes and leaves the old ones intact, so a node index is a
//! stable identity that caches and orderings can key on.

pub mod config;
pub mod diagram;
pub mod error;
pub mod shape;

// Re-export key types at crate root for convenience
pub use config::{GraphConfig, TestValueMode};
pub use diagram::{Diagram, Edge, Node, Port};
pub use error::CoreError;
pub use shape::{DType, Shape, CONTINUOUS_TYPES, DISCRETE_TYPES};
