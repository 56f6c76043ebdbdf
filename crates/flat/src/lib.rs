//! # Flat - One Vector for Many Variables
//!
//! Numeric optimizers work on a single flat parameter vector, while models
//! are written in terms of many variables of different shapes and element
//! types. This crate bridges the two:
//!
//! - [`ordering`]: where each variable lives in the flat vector, and the
//!   point/vector bijection built on that layout
//! - [`join`]: rewriting expressions to read their variables from one flat
//!   input, and freezing the remaining variables as shared placeholders

pub mod error;
pub mod join;
pub mod ordering;

pub use error::FlatError;
pub use join::{join_nonshared_inputs, make_shared_replacements, reshape_t, ModelVars};
pub use ordering::{ArrayOrdering, DictToArrayBijection, Point, VarMap};
