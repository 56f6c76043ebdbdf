//! # Error Types
//!
//! Failures of ordering, joining and point mapping.

use thiserror::Error;

use symflow_core::CoreError;
use symflow_diff::GraphError;

/// Errors from flattening variables into a single vector.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlatError {
    /// A variable being joined or frozen has no current value.
    #[error("Variable '{name}' has no test value")]
    MissingTestValue { name: String },

    /// A variable is both joined and replaced by a shared placeholder.
    #[error("Variable '{name}' is both joined and replaced by a shared placeholder")]
    SharedCollision { name: String },

    /// A variable was listed twice in an ordering.
    #[error("Variable '{name}' appears more than once in the ordering")]
    DuplicateVariable { name: String },

    /// A point lacks a value for one of the ordered variables.
    #[error("Point has no value for variable '{name}'")]
    MissingValue { name: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl From<CoreError> for FlatError {
    fn from(err: CoreError) -> Self {
        FlatError::Graph(GraphError::Core(err))
    }
}
