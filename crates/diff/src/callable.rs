//! # Partial Application
//!
//! [`CallableTensor`] turns an expression with exactly one free variable into
//! something that can be applied to another expression.

use petgraph::graph::NodeIndex;

use crate::error::GraphError;
use crate::graph::DiffGraph;
use crate::rewrite::{clone_replace, Replacements};
use crate::vartypes::input_vars;

/// An expression of one free variable, applied by substitution.
///
/// ```rust
/// use symflow_core::Shape;
/// use symflow_diff::callable::CallableTensor;
/// use symflow_diff::forward::Givens;
/// use symflow_diff::graph::DiffGraph;
///
/// let mut graph = DiffGraph::new();
/// let x = graph.variable("x", Shape::f64_scalar());
/// let square = graph.mul(x, x).unwrap();
///
/// let three = graph.scalar_constant(3.0);
/// let nine = CallableTensor::new(square).call(&mut graph, three).unwrap();
/// assert_eq!(graph.eval(&[nine], &Givens::new()).unwrap()[0].as_scalar(), Some(9.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallableTensor {
    expr: NodeIndex,
}

impl CallableTensor {
    pub fn new(expr: NodeIndex) -> Self {
        Self { expr }
    }

    pub fn expr(&self) -> NodeIndex {
        self.expr
    }

    /// Replace the expression's free variable with `input`.
    pub fn call(&self, graph: &mut DiffGraph, input: NodeIndex) -> Result<NodeIndex, GraphError> {
        let free = input_vars(graph, &[self.expr]);
        let [var] = free.as_slice() else {
            return Err(GraphError::FreeVariableCount { found: free.len() });
        };
        let replace = Replacements::from([(*var, input)]);
        let out = clone_replace(graph, &[self.expr], &replace, true)?;
        Ok(out[0])
    }
}
