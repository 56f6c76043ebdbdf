//! # Error Types

use thiserror::Error;

use symflow_core::Shape;
use symflow_diff::GraphError;

/// Errors from wrapping and binding data streams.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    /// A replacement stream declares a different output type.
    #[error("Stream type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: Shape, got: Shape },

    /// The stream produced no element to take a sample from.
    #[error("Stream is empty")]
    EmptySource,

    #[error(transparent)]
    Graph(#[from] GraphError),
}
