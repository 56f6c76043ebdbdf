//! # Error Types
//!
//! Structural errors: attempts to wire or substitute incompatible nodes.
//! Wiring `f` into `g` is only defined when `cod(f) = dom(g)`; a mismatch is
//! an undefined operation, not a recoverable condition.

use thiserror::Error;

use crate::shape::Shape;

/// Core errors for symflow graphs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Shapes don't match at a connection or substitution boundary.
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Attempted to connect a port that doesn't exist.
    #[error("Invalid port index: {index} (node has {count} ports)")]
    InvalidPort { index: usize, count: usize },

    /// A node index does not belong to the diagram.
    #[error("Node {index} not found")]
    NodeNotFound { index: usize },

    /// Diagram validation failed.
    #[error("Diagram validation failed: {reason}")]
    ValidationError { reason: String },

    /// Configuration could not be parsed.
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}
