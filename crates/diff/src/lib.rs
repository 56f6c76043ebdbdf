//! # Diff - Symbolic Differentiation over Expression Graphs
//!
//! This crate implements expression graphs and their derivatives, following
//! the categorical reading of "Backprop as Functor":
//!
//! - **Expressions are string diagrams**: boxes are ops, wires are arrays
//! - **Evaluation is a functor**: it preserves composition structure
//! - **Differentiation is a functor to the opposite category**: it reverses
//!   arrows, and here it emits the reversed diagram into the same graph
//!
//! ## Modules
//!
//! - [`tensor`]: runtime arrays and float-type conversion
//! - [`ops`]: the operation set, shape inference and forward rules
//! - [`graph`]: the append-only expression graph and its builders
//! - [`forward`]: evaluation, preview evaluation and compiled functions
//! - [`backward`]: symbolic reverse mode and gradient checking
//! - [`rewrite`]: substitution of nodes by other nodes
//! - [`vartypes`]: free-variable discovery and classification
//! - [`derivatives`]: gradient, Jacobian, Hessian and Hessian diagonal
//! - [`callable`]: partial application of one-variable expressions
//! - [`optimize`]: constant folding and duplicate merging
//! - [`source`]: externally owned values (shared storage, streams)
//!
//! ## Example
//!
//! ```rust
//! use symflow_core::Shape;
//! use symflow_diff::derivatives::{hessian, DerivativeCache};
//! use symflow_diff::forward::Givens;
//! use symflow_diff::graph::DiffGraph;
//! use symflow_diff::tensor::Array;
//!
//! // f(x) = sum(x * x * x), so -∇²f = diag(-6x)
//! let mut graph = DiffGraph::new();
//! let mut cache = DerivativeCache::new();
//! let x = graph.variable("x", Shape::f64_vector(2));
//! let x2 = graph.mul(x, x).unwrap();
//! let x3 = graph.mul(x2, x).unwrap();
//! let f = graph.sum_all(x3).unwrap();
//!
//! let h = hessian(&mut graph, &mut cache, f, None).unwrap();
//! let givens = Givens::from([(x, Array::vector(vec![1.0, 2.0]))]);
//! let value = &graph.eval(&[h], &givens).unwrap()[0];
//! assert_eq!(value.data, vec![-6.0, 0.0, 0.0, -12.0]);
//! ```

pub mod backward;
pub mod callable;
pub mod derivatives;
pub mod error;
pub mod forward;
pub mod graph;
pub mod ops;
pub mod optimize;
pub mod rewrite;
pub mod source;
pub mod tensor;
pub mod vartypes;

// Re-export key types
pub use callable::CallableTensor;
pub use derivatives::DerivativeCache;
pub use error::GraphError;
pub use forward::{EvalMode, Function, Givens};
pub use graph::{ConfigScope, DiffGraph, GraphId};
pub use ops::DiffOp;
pub use rewrite::Replacements;
pub use source::{ExternalSource, SharedValue, SourceHandle};
pub use tensor::Array;
