//! # Substitution
//!
//! Rebuild expressions with some nodes replaced by others. Since graphs are
//! append-only, rewriting never changes an existing node: every node that
//! (transitively) depends on a replaced one is rebuilt, and sub-expressions
//! untouched by the replacement are shared with the original.

use std::collections::HashMap;

use petgraph::graph::NodeIndex;
use symflow_core::CoreError;
use tracing::debug;

use crate::error::GraphError;
use crate::graph::DiffGraph;
use crate::ops::DiffOp;

/// A mapping from replaced nodes to their replacements.
pub type Replacements = HashMap<NodeIndex, NodeIndex>;

/// Rebuild `outputs` with every occurrence of a key of `replace` swapped for
/// its value, including occurrences inside `Map` bodies.
///
/// Replacements must have exactly the type of the node they replace. In
/// strict mode every key must occur in the expression; otherwise absent keys
/// are ignored.
///
/// ```rust
/// use std::collections::HashMap;
/// use symflow_core::Shape;
/// use symflow_diff::graph::DiffGraph;
/// use symflow_diff::rewrite::clone_replace;
///
/// let mut graph = DiffGraph::new();
/// let x = graph.variable("x", Shape::f64_scalar());
/// let y = graph.exp(x).unwrap();
/// let two = graph.scalar_constant(2.0);
///
/// let out = clone_replace(&mut graph, &[y], &HashMap::from([(x, two)]), true).unwrap();
/// assert_ne!(out[0], y);
/// assert_eq!(graph.inputs_of(out[0]), vec![two]);
/// ```
pub fn clone_replace(
    graph: &mut DiffGraph,
    outputs: &[NodeIndex],
    replace: &Replacements,
    strict: bool,
) -> Result<Vec<NodeIndex>, GraphError> {
    for (&from, &to) in replace {
        let expected = graph.shape(from)?;
        let got = graph.shape(to)?;
        if expected != got {
            return Err(GraphError::Core(CoreError::ShapeMismatch {
                expected: expected.clone(),
                got: got.clone(),
            }));
        }
    }

    let order = graph.dependency_order(outputs, true);

    if strict {
        let mut missing: Vec<NodeIndex> = replace
            .keys()
            .copied()
            .filter(|key| !order.contains(key))
            .collect();
        missing.sort();
        if let Some(key) = missing.first() {
            return Err(GraphError::ReplacementNotFound { index: key.index() });
        }
    }

    let mut memo: HashMap<NodeIndex, NodeIndex> = replace.clone();
    let mut rebuilt = 0usize;

    for node in order {
        if memo.contains_key(&node) {
            continue;
        }
        let inputs = graph.inputs_of(node);
        let new_inputs: Vec<NodeIndex> = inputs
            .iter()
            .map(|input| memo.get(input).copied().unwrap_or(*input))
            .collect();

        let new_node = match graph.op(node)?.clone() {
            DiffOp::Map { index, body } => {
                let new_body = memo.get(&body).copied().unwrap_or(body);
                if new_body == body && new_inputs == inputs {
                    continue;
                }
                graph.map(index, new_body, new_inputs[0])?
            }
            op => {
                if new_inputs == inputs {
                    continue;
                }
                graph.apply(op, &new_inputs)?
            }
        };
        memo.insert(node, new_node);
        rebuilt += 1;
    }

    debug!(replaced = replace.len(), rebuilt, "rewrote expression");

    Ok(outputs
        .iter()
        .map(|output| memo.get(output).copied().unwrap_or(*output))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::Givens;
    use crate::tensor::Array;
    use symflow_core::Shape;

    #[test]
    fn test_unchanged_subgraphs_are_shared() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_scalar());
        let y = graph.variable("y", Shape::f64_scalar());
        let ey = graph.exp(y).unwrap();
        let z = graph.add(x, ey).unwrap();
        let c = graph.scalar_constant(1.0);

        let out = clone_replace(&mut graph, &[z], &Replacements::from([(x, c)]), true).unwrap();
        assert_eq!(graph.inputs_of(out[0]), vec![c, ey]);
    }

    #[test]
    fn test_no_occurrence_returns_original() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_scalar());
        let y = graph.neg(x).unwrap();
        let other = graph.variable("other", Shape::f64_scalar());
        let c = graph.scalar_constant(1.0);

        let before = graph.node_count();
        let out =
            clone_replace(&mut graph, &[y], &Replacements::from([(other, c)]), false).unwrap();
        assert_eq!(out, vec![y]);
        assert_eq!(graph.node_count(), before);
    }

    #[test]
    fn test_strict_reports_missing_target() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_scalar());
        let y = graph.neg(x).unwrap();
        let other = graph.variable("other", Shape::f64_scalar());
        let c = graph.scalar_constant(1.0);

        let result = clone_replace(&mut graph, &[y], &Replacements::from([(other, c)]), true);
        assert_eq!(
            result,
            Err(GraphError::ReplacementNotFound {
                index: other.index()
            })
        );
    }

    #[test]
    fn test_type_must_match() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_vector(2));
        let y = graph.neg(x).unwrap();
        let c = graph.scalar_constant(1.0);

        let result = clone_replace(&mut graph, &[y], &Replacements::from([(x, c)]), false);
        assert!(matches!(
            result,
            Err(GraphError::Core(CoreError::ShapeMismatch { .. }))
        ));
    }

    #[test]
    fn test_rewrites_inside_map_body() {
        let mut graph = DiffGraph::new();
        let v = graph.variable("v", Shape::f64_vector(2));
        let w = graph.variable("w", Shape::f64_vector(2));
        let i = graph.loop_index();
        let body = graph.take(w, i).unwrap();
        let m = graph.map(i, body, v).unwrap();
        let c = graph.constant(Array::vector(vec![7.0, 8.0]));

        let out = clone_replace(&mut graph, &[m], &Replacements::from([(w, c)]), true).unwrap();
        let givens = Givens::from([(v, Array::vector(vec![0.0, 0.0]))]);
        let values = graph.eval(&out, &givens).unwrap();
        assert_eq!(values[0].data, vec![7.0, 8.0]);
    }
}
