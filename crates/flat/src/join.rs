//! # Joining Variables into One Vector
//!
//! [`join_nonshared_inputs`] rewrites expressions of many variables into
//! expressions of a single flat vector: every occurrence of a joined variable
//! becomes a slice of the vector, reshaped and cast back to the variable's
//! type. Variables that should stay fixed can be frozen at the same time by
//! substituting shared placeholders, built with [`make_shared_replacements`].
//!
//! ## Example
//!
//! ```rust
//! use symflow_core::Shape;
//! use symflow_diff::{Array, DiffGraph, Givens, Replacements};
//! use symflow_flat::join_nonshared_inputs;
//!
//! let mut graph = DiffGraph::new();
//! let a = graph.variable("a", Shape::f64_scalar());
//! let b = graph.variable("b", Shape::f64_vector(2));
//! graph.set_test_value(a, Array::scalar(1.0)).unwrap();
//! graph.set_test_value(b, Array::vector(vec![2.0, 3.0])).unwrap();
//! let ab = graph.mul(a, b).unwrap();
//! let f = graph.sum_all(ab).unwrap();
//!
//! let (out, inarray) =
//!     join_nonshared_inputs(&mut graph, &[f], &[a, b], &Replacements::new(), false).unwrap();
//!
//! // a = 2, b = [3, 4]
//! let givens = Givens::from([(inarray, Array::vector(vec![2.0, 3.0, 4.0]))]);
//! assert_eq!(graph.eval(&out, &givens).unwrap()[0].as_scalar(), Some(14.0));
//! ```

use petgraph::graph::NodeIndex;
use symflow_core::Shape;
use symflow_diff::rewrite::clone_replace;
use symflow_diff::{Array, DiffGraph, GraphError, Replacements};
use tracing::debug;

use crate::error::FlatError;
use crate::ordering::ArrayOrdering;

/// The variables a model knows about.
pub trait ModelVars {
    fn vars(&self) -> Vec<NodeIndex>;
}

impl ModelVars for [NodeIndex] {
    fn vars(&self) -> Vec<NodeIndex> {
        self.to_vec()
    }
}

impl ModelVars for Vec<NodeIndex> {
    fn vars(&self) -> Vec<NodeIndex> {
        self.clone()
    }
}

fn var_name(graph: &DiffGraph, var: NodeIndex) -> String {
    graph.name(var).unwrap_or_default().to_string()
}

fn current_value(graph: &DiffGraph, var: NodeIndex) -> Result<Array, FlatError> {
    graph
        .test_value(var)
        .ok_or_else(|| FlatError::MissingTestValue {
            name: var_name(graph, var),
        })
}

/// Shared placeholders for every model variable not in `vars`, each named
/// `<name>_shared` and seeded with the variable's test value.
///
/// Every call creates fresh placeholders.
pub fn make_shared_replacements<M: ModelVars + ?Sized>(
    graph: &mut DiffGraph,
    vars: &[NodeIndex],
    model: &M,
) -> Result<Replacements, FlatError> {
    let mut replacements = Replacements::new();
    for var in model.vars() {
        if vars.contains(&var) {
            continue;
        }
        let value = current_value(graph, var)?;
        let name = format!("{}_shared", var_name(graph, var));
        let placeholder = graph.shared(&name, value);
        replacements.insert(var, placeholder);
    }
    Ok(replacements)
}

/// Reshape a flat slice to `dims`.
///
/// A rank-0 target takes element 0 instead of reshaping a length-1 vector to
/// no dimensions.
pub fn reshape_t(
    graph: &mut DiffGraph,
    x: NodeIndex,
    dims: &[usize],
) -> Result<NodeIndex, GraphError> {
    if dims.is_empty() {
        let zero = graph.index_constant(0);
        graph.take(x, zero)
    } else {
        graph.reshape(x, dims.to_vec())
    }
}

/// Rewrite `xs` so that `vars` are read from one flat vector.
///
/// Returns the rewritten expressions, in order, and the flat input node,
/// named `inarray`. The input is a variable whose test value is the
/// concatenation of the flattened test values of `vars`, or, with
/// `make_shared`, a shared placeholder holding that value. Replacements
/// from `shared` are applied in the same pass; their keys must not be among
/// `vars`.
pub fn join_nonshared_inputs(
    graph: &mut DiffGraph,
    xs: &[NodeIndex],
    vars: &[NodeIndex],
    shared: &Replacements,
    make_shared: bool,
) -> Result<(Vec<NodeIndex>, NodeIndex), FlatError> {
    if let Some(&collision) = vars.iter().find(|var| shared.contains_key(var)) {
        return Err(FlatError::SharedCollision {
            name: var_name(graph, collision),
        });
    }

    let ordering = ArrayOrdering::new(graph, vars)?;
    let dtype = ordering.dtype(graph.config());

    let mut flat_values = Vec::with_capacity(vars.len());
    for &var in vars {
        flat_values.push(current_value(graph, var)?.flatten());
    }
    let joined = if flat_values.is_empty() {
        Array::zeros(vec![0], dtype)
    } else {
        let parts: Vec<&Array> = flat_values.iter().collect();
        Array::concat(&parts, 0)?.astype(dtype)
    };

    let inarray = if make_shared {
        graph.shared("inarray", joined)
    } else {
        let node = graph.variable("inarray", Shape::vector(dtype, ordering.size));
        graph.set_test_value(node, joined)?;
        node
    };

    let mut replace = Replacements::new();
    for entry in ordering.iter() {
        let region = graph.slice(inarray, 0, entry.slice.start, entry.slice.end)?;
        let mut replacement = reshape_t(graph, region, &entry.dims)?;
        if graph.shape(replacement)?.dtype != entry.dtype {
            replacement = graph.cast(replacement, entry.dtype)?;
        }
        replace.insert(entry.var, replacement);
    }
    replace.extend(shared.iter().map(|(&from, &to)| (from, to)));

    let rewritten = clone_replace(graph, xs, &replace, false)?;
    debug!(
        joined = ordering.len(),
        frozen = shared.len(),
        size = ordering.size,
        "joined inputs"
    );
    Ok((rewritten, inarray))
}

#[cfg(test)]
mod tests {
    use super::*;
    use symflow_core::DType;
    use symflow_diff::vartypes::input_vars;
    use symflow_diff::{DiffOp, Givens};

    #[test]
    fn test_scalar_variable_uses_take() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_scalar());
        graph.set_test_value(x, Array::scalar(2.0)).unwrap();
        let y = graph.exp(x).unwrap();

        let (out, inarray) =
            join_nonshared_inputs(&mut graph, &[y], &[x], &Replacements::new(), false).unwrap();
        let replacement = graph.inputs_of(out[0])[0];
        assert_eq!(graph.op(replacement).unwrap(), &DiffOp::Take);
        assert_eq!(input_vars(&graph, &out), vec![inarray]);
    }

    #[test]
    fn test_cast_back_to_variable_dtype() {
        let mut graph = DiffGraph::new();
        let n = graph.variable("n", Shape::vector(DType::Int32, 2));
        let x = graph.variable("x", Shape::f64_vector(2));
        graph
            .set_test_value(n, Array::vector(vec![1.0, 2.0]).astype(DType::Int32))
            .unwrap();
        graph.set_test_value(x, Array::vector(vec![0.5, 0.5])).unwrap();
        let nf = graph.cast(n, DType::Float64).unwrap();
        let y = graph.mul(nf, x).unwrap();

        let (out, inarray) =
            join_nonshared_inputs(&mut graph, &[y], &[n, x], &Replacements::new(), false)
                .unwrap();
        assert_eq!(graph.shape(inarray).unwrap(), &Shape::f64_vector(4));
        assert_eq!(
            graph.test_value(inarray).unwrap().data,
            vec![1.0, 2.0, 0.5, 0.5]
        );

        // Integer regions round-trip through a cast; the float region is not cast
        let givens = Givens::from([(inarray, Array::vector(vec![3.7, 1.0, 2.0, 4.0]))]);
        assert_eq!(graph.eval(&out, &givens).unwrap()[0].data, vec![6.0, 4.0]);
    }

    #[test]
    fn test_missing_test_value() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_scalar());
        let result = join_nonshared_inputs(&mut graph, &[x], &[x], &Replacements::new(), false);
        assert_eq!(
            result,
            Err(FlatError::MissingTestValue {
                name: "x".to_string()
            })
        );
    }

    #[test]
    fn test_shared_collision() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_scalar());
        let c = graph.scalar_constant(1.0);
        let result =
            join_nonshared_inputs(&mut graph, &[x], &[x], &Replacements::from([(x, c)]), false);
        assert!(matches!(result, Err(FlatError::SharedCollision { .. })));
    }

    #[test]
    fn test_make_shared_input() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_vector(2));
        graph.set_test_value(x, Array::vector(vec![1.0, 2.0])).unwrap();
        let y = graph.sum_all(x).unwrap();

        let (out, inarray) =
            join_nonshared_inputs(&mut graph, &[y], &[x], &Replacements::new(), true).unwrap();
        let DiffOp::Shared { name, value } = graph.op(inarray).unwrap().clone() else {
            panic!("expected a shared input");
        };
        assert_eq!(name, "inarray");
        assert_eq!(graph.eval(&out, &Givens::new()).unwrap()[0].as_scalar(), Some(3.0));

        value.set(Array::vector(vec![10.0, 20.0])).unwrap();
        assert_eq!(graph.eval(&out, &Givens::new()).unwrap()[0].as_scalar(), Some(30.0));
    }

    #[test]
    fn test_make_shared_replacements_are_fresh() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_scalar());
        let sigma = graph.variable("sigma", Shape::f64_scalar());
        graph.set_test_value(sigma, Array::scalar(0.5)).unwrap();
        let model = vec![x, sigma];

        let first = make_shared_replacements(&mut graph, &[x], &model).unwrap();
        let second = make_shared_replacements(&mut graph, &[x], &model).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(graph.name(first[&sigma]), Some("sigma_shared"));
        assert_ne!(first[&sigma], second[&sigma]);
        assert_eq!(graph.test_value(first[&sigma]).unwrap().as_scalar(), Some(0.5));
    }
}
