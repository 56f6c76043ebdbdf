//! # Graph Errors
//!
//! Failures raised while building, evaluating, rewriting or differentiating
//! a [`DiffGraph`](crate::graph::DiffGraph).

use thiserror::Error;

use symflow_core::CoreError;

/// Errors from graph construction, evaluation and differentiation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    /// A structural error from the underlying diagram.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A variable needed by an evaluation was not given a value.
    #[error("Missing input value for variable '{name}' (node {index})")]
    MissingInput { name: String, index: usize },

    /// A variable needed by preview evaluation has no test value.
    #[error("Variable '{name}' (node {index}) has no test value")]
    MissingTestValue { name: String, index: usize },

    /// Gradients are only defined for single-element costs.
    #[error("Cost must be a scalar, got {numel} elements")]
    NonScalarCost { numel: usize },

    /// No reverse-mode rule exists for this operation.
    #[error("Operation {op} is not differentiable")]
    NotDifferentiable { op: String },

    /// The cost does not depend on a requested variable.
    #[error("Cost does not depend on node {index}")]
    Disconnected { index: usize },

    /// A partial application needs exactly one free variable.
    #[error("Expected exactly one free variable, found {found}")]
    FreeVariableCount { found: usize },

    /// A strict rewrite was asked to replace a node the expression never uses.
    #[error("Replacement target node {index} does not occur in the expression")]
    ReplacementNotFound { index: usize },

    /// A runtime index fell outside its array.
    #[error("Index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    /// An external source produced a value whose type differs from the one it declared.
    #[error("Source declared {expected} but produced {got}")]
    SourceDrift { expected: String, got: String },

    /// A loop index was evaluated outside of its map.
    #[error("Loop index node {index} evaluated outside its map")]
    UnboundLoopIndex { index: usize },

    /// An operation was applied to operands it does not accept.
    #[error("Invalid operation {op}: {reason}")]
    InvalidOp { op: String, reason: String },
}
