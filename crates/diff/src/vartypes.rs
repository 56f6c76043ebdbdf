//! # Variable Classification
//!
//! Find the free variables an expression depends on, and filter them by
//! element type.
//!
//! ```rust
//! use symflow_core::{DType, Shape};
//! use symflow_diff::graph::DiffGraph;
//! use symflow_diff::vartypes::{cont_inputs, input_vars};
//!
//! let mut graph = DiffGraph::new();
//! let x = graph.variable("x", Shape::f64_vector(2));
//! let k = graph.variable("k", Shape::scalar(DType::Int64));
//! let kf = graph.cast(k, DType::Float64).unwrap();
//! let y = graph.mul(x, kf).unwrap();
//!
//! assert_eq!(input_vars(&graph, &[y]), vec![x, k]);
//! assert_eq!(cont_inputs(&graph, &[y]), vec![x]);
//! ```

use petgraph::graph::NodeIndex;
use symflow_core::{DType, Shape, CONTINUOUS_TYPES};

use crate::graph::DiffGraph;
use crate::ops::DiffOp;

fn is_variable(graph: &DiffGraph, node: NodeIndex) -> bool {
    matches!(graph.op(node), Ok(DiffOp::Variable { .. }))
}

/// Free variables feeding `exprs`, including those used inside `Map` bodies.
///
/// Each variable appears once, in the order a depth-first post-order walk
/// first reaches it.
pub fn input_vars(graph: &DiffGraph, exprs: &[NodeIndex]) -> Vec<NodeIndex> {
    graph
        .dependency_order(exprs, true)
        .into_iter()
        .filter(|&node| is_variable(graph, node))
        .collect()
}

/// Free variables of `exprs` whose type satisfies `predicate`.
pub fn classify(
    graph: &DiffGraph,
    exprs: &[NodeIndex],
    predicate: impl Fn(&Shape) -> bool,
) -> Vec<NodeIndex> {
    input_vars(graph, exprs)
        .into_iter()
        .filter(|&var| graph.shape(var).map(&predicate).unwrap_or(false))
        .collect()
}

/// Keep the nodes of `vars` whose element type is one of `types`.
pub fn type_filter(graph: &DiffGraph, vars: &[NodeIndex], types: &[DType]) -> Vec<NodeIndex> {
    vars.iter()
        .copied()
        .filter(|&var| {
            graph
                .shape(var)
                .map(|shape| types.contains(&shape.dtype))
                .unwrap_or(false)
        })
        .collect()
}

/// Continuous (floating-point) free variables of `exprs`.
pub fn cont_inputs(graph: &DiffGraph, exprs: &[NodeIndex]) -> Vec<NodeIndex> {
    classify(graph, exprs, |shape| CONTINUOUS_TYPES.contains(&shape.dtype))
}

#[cfg(test)]
mod tests {
    use super::*;
    use symflow_core::DISCRETE_TYPES;

    #[test]
    fn test_no_variables_is_empty() {
        let mut graph = DiffGraph::new();
        let c = graph.scalar_constant(1.0);
        let y = graph.exp(c).unwrap();
        assert!(input_vars(&graph, &[y]).is_empty());
        assert!(cont_inputs(&graph, &[y]).is_empty());
    }

    #[test]
    fn test_shared_and_constants_are_not_inputs() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_scalar());
        let s = graph.shared("s", crate::tensor::Array::scalar(2.0));
        let y = graph.mul(x, s).unwrap();
        assert_eq!(input_vars(&graph, &[y]), vec![x]);
    }

    #[test]
    fn test_duplicate_use_listed_once() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_scalar());
        let y = graph.variable("y", Shape::f64_scalar());
        let a = graph.mul(y, x).unwrap();
        let b = graph.add(a, x).unwrap();
        assert_eq!(input_vars(&graph, &[b, x]), vec![y, x]);
    }

    #[test]
    fn test_variables_inside_map_body() {
        let mut graph = DiffGraph::new();
        let v = graph.variable("v", Shape::f64_vector(3));
        let w = graph.variable("w", Shape::f64_vector(3));
        let i = graph.loop_index();
        let body = graph.take(w, i).unwrap();
        let m = graph.map(i, body, v).unwrap();
        assert_eq!(input_vars(&graph, &[m]), vec![v, w]);
    }

    #[test]
    fn test_type_filter_discrete() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_scalar());
        let n = graph.variable("n", Shape::scalar(DType::Int32));
        let b = graph.variable("b", Shape::scalar(DType::Bool));
        assert_eq!(type_filter(&graph, &[x, n, b], DISCRETE_TYPES), vec![n, b]);
        assert_eq!(type_filter(&graph, &[x, n, b], CONTINUOUS_TYPES), vec![x]);
    }
}
