//! # Backward Pass - Symbolic Reverse-Mode Autodiff
//!
//! This module implements reverse-mode differentiation as a graph
//! transformation. The key insight is that the backward pass is a **functor
//! to the opposite category**:
//!
//! - Forward: morphisms go A → B
//! - Backward: morphisms go B → A (gradients flow backward)
//! - For composition f;g, the VJP is vjp(g);vjp(f) (reverse order)
//!
//! Rather than computing numbers, each VJP rule emits new nodes into the
//! same graph. Gradients are therefore expressions themselves, and can be
//! differentiated again.
//!
//! ## Example
//!
//! ```rust
//! use symflow_core::Shape;
//! use symflow_diff::backward::{grad, Disconnected};
//! use symflow_diff::forward::Givens;
//! use symflow_diff::graph::DiffGraph;
//! use symflow_diff::tensor::Array;
//!
//! // Build: loss = sum(x * x)
//! let mut graph = DiffGraph::new();
//! let x = graph.variable("x", Shape::f64_vector(3));
//! let sq = graph.mul(x, x).unwrap();
//! let loss = graph.sum_all(sq).unwrap();
//!
//! let dx = grad(&mut graph, loss, &[x], Disconnected::Raise).unwrap();
//!
//! let givens = Givens::from([(x, Array::vector(vec![1.0, -2.0, 3.0]))]);
//! let value = graph.eval(&dx, &givens).unwrap();
//! assert_eq!(value[0].data, vec![2.0, -4.0, 6.0]);
//! ```

use std::collections::{HashMap, HashSet};

use petgraph::graph::NodeIndex;
use thiserror::Error;
use tracing::warn;

use crate::error::GraphError;
use crate::forward::Givens;
use crate::graph::DiffGraph;
use crate::ops::DiffOp;
use crate::tensor::Array;

/// What to do when the cost does not depend on a requested node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnected {
    /// Return a zero gradient silently.
    Ignore,
    /// Return a zero gradient and log a warning.
    Warn,
    /// Fail with [`GraphError::Disconnected`].
    Raise,
}

/// Symbolic gradient of a single-element `cost` with respect to each of `wrt`.
///
/// The returned nodes have the dimensions of the corresponding `wrt` node.
pub fn grad(
    graph: &mut DiffGraph,
    cost: NodeIndex,
    wrt: &[NodeIndex],
    disconnected: Disconnected,
) -> Result<Vec<NodeIndex>, GraphError> {
    let cost_shape = graph.shape(cost)?.clone();
    if cost_shape.numel() != 1 {
        return Err(GraphError::NonScalarCost {
            numel: cost_shape.numel(),
        });
    }

    let needed = leads_to(graph, cost, wrt);

    let seed_dtype = if cost_shape.dtype.is_float() {
        cost_shape.dtype
    } else {
        graph.config().float_x
    };
    let seed = graph.constant(Array::full(cost_shape.dims.clone(), seed_dtype, 1.0));

    // Gradient contributions for each node, summed once all consumers are done
    let mut pending: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    let mut totals: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    pending.insert(cost, vec![seed]);

    // Process in REVERSE dependency order
    for node in graph.dependency_order(&[cost], false).into_iter().rev() {
        if !needed.contains(&node) {
            continue;
        }
        let Some(contributions) = pending.remove(&node) else {
            continue;
        };
        let total = sum_contributions(graph, &contributions)?;
        totals.insert(node, total);

        let inputs = graph.inputs_of(node);
        let is_map = matches!(graph.op(node)?, DiffOp::Map { .. });
        if !is_map && inputs.iter().all(|input| !needed.contains(input)) {
            continue;
        }
        let input_grads = vjp(graph, node, &inputs, total)?;
        for (input, input_grad) in inputs.iter().zip(input_grads) {
            if let (true, Some(g)) = (needed.contains(input), input_grad) {
                pending.entry(*input).or_default().push(g);
            }
        }
    }

    wrt.iter()
        .map(|&target| match totals.get(&target) {
            Some(&g) => Ok(g),
            None => disconnected_gradient(graph, target, disconnected),
        })
        .collect()
}

/// Nodes under `cost` from which some node of `wrt` is reachable.
fn leads_to(graph: &DiffGraph, cost: NodeIndex, wrt: &[NodeIndex]) -> HashSet<NodeIndex> {
    let mut needed: HashSet<NodeIndex> = HashSet::new();
    for node in graph.dependency_order(&[cost], true) {
        let inner = graph
            .op(node)
            .map(|op| op.inner_nodes())
            .unwrap_or_default();
        let reaches = wrt.contains(&node)
            || graph
                .inputs_of(node)
                .iter()
                .chain(inner.iter())
                .any(|child| needed.contains(child));
        if reaches {
            needed.insert(node);
        }
    }
    needed
}

fn sum_contributions(graph: &mut DiffGraph, parts: &[NodeIndex]) -> Result<NodeIndex, GraphError> {
    let mut total = parts[0];
    for &part in &parts[1..] {
        total = graph.add(total, part)?;
    }
    Ok(total)
}

fn disconnected_gradient(
    graph: &mut DiffGraph,
    target: NodeIndex,
    policy: Disconnected,
) -> Result<NodeIndex, GraphError> {
    if policy == Disconnected::Raise {
        return Err(GraphError::Disconnected {
            index: target.index(),
        });
    }
    if policy == Disconnected::Warn {
        warn!(
            node = target.index(),
            name = graph.name(target).unwrap_or_default(),
            "cost does not depend on variable; using a zero gradient"
        );
    }
    let shape = graph.shape(target)?.clone();
    let dtype = if shape.dtype.is_float() {
        shape.dtype
    } else {
        graph.config().float_x
    };
    Ok(graph.constant(Array::zeros(shape.dims, dtype)))
}

/// Sum a gradient down to a rank-0 operand that was broadcast in the forward pass.
fn unbroadcast(
    graph: &mut DiffGraph,
    g: NodeIndex,
    operand: NodeIndex,
) -> Result<NodeIndex, GraphError> {
    if graph.shape(operand)?.is_scalar() && !graph.shape(g)?.is_scalar() {
        graph.sum_all(g)
    } else {
        Ok(g)
    }
}

/// Reshape `g` to the dimensions of `like` if they differ.
fn reshape_like(
    graph: &mut DiffGraph,
    g: NodeIndex,
    like: NodeIndex,
) -> Result<NodeIndex, GraphError> {
    let dims = graph.shape(like)?.dims.clone();
    if graph.shape(g)?.dims == dims {
        Ok(g)
    } else {
        graph.reshape(g, dims)
    }
}

/// Emit the Vector-Jacobian Product of `node` for upstream gradient `g`.
///
/// Returns one entry per input; `None` for inputs that carry no gradient
/// (such as runtime indices).
fn vjp(
    graph: &mut DiffGraph,
    node: NodeIndex,
    inputs: &[NodeIndex],
    g: NodeIndex,
) -> Result<Vec<Option<NodeIndex>>, GraphError> {
    let op = graph.op(node)?.clone();
    let grads = match op {
        DiffOp::Add => {
            // z = x + y
            // ∂L/∂x = ∂L/∂z, ∂L/∂y = ∂L/∂z
            let (x, y) = (inputs[0], inputs[1]);
            vec![Some(unbroadcast(graph, g, x)?), Some(unbroadcast(graph, g, y)?)]
        }

        DiffOp::Sub => {
            // z = x - y
            // ∂L/∂x = ∂L/∂z, ∂L/∂y = -∂L/∂z
            let (x, y) = (inputs[0], inputs[1]);
            let neg = graph.neg(g)?;
            vec![Some(unbroadcast(graph, g, x)?), Some(unbroadcast(graph, neg, y)?)]
        }

        DiffOp::Mul => {
            // z = x * y
            // ∂L/∂x = ∂L/∂z * y, ∂L/∂y = ∂L/∂z * x
            let (x, y) = (inputs[0], inputs[1]);
            let gx = graph.mul(g, y)?;
            let gy = graph.mul(g, x)?;
            vec![Some(unbroadcast(graph, gx, x)?), Some(unbroadcast(graph, gy, y)?)]
        }

        DiffOp::Div => {
            // z = x / y
            // ∂L/∂x = ∂L/∂z / y, ∂L/∂y = -∂L/∂z * z / y
            let (x, y) = (inputs[0], inputs[1]);
            let gx = graph.div(g, y)?;
            let gz = graph.mul(g, node)?;
            let gz_y = graph.div(gz, y)?;
            let gy = graph.neg(gz_y)?;
            vec![Some(unbroadcast(graph, gx, x)?), Some(unbroadcast(graph, gy, y)?)]
        }

        DiffOp::Neg => vec![Some(graph.neg(g)?)],

        // ∂exp(x)/∂x = exp(x), which is this node's own output
        DiffOp::Exp => vec![Some(graph.mul(g, node)?)],

        DiffOp::Log => vec![Some(graph.div(g, inputs[0])?)],

        DiffOp::Identity => vec![Some(g)],

        DiffOp::MatMul => {
            // C = A @ B where A is (m,k), B is (k,n), C is (m,n)
            // ∂L/∂A = (∂L/∂C) @ Bᵀ, ∂L/∂B = Aᵀ @ (∂L/∂C)
            let (a, b) = (inputs[0], inputs[1]);
            let bt = graph.transpose(b)?;
            let ga = graph.matmul(g, bt)?;
            let at = graph.transpose(a)?;
            let gb = graph.matmul(at, g)?;
            vec![Some(ga), Some(gb)]
        }

        DiffOp::Transpose => vec![Some(graph.transpose(g)?)],

        DiffOp::SumAll => {
            let dims = graph.shape(inputs[0])?.dims.clone();
            vec![Some(graph.fill(g, dims)?)]
        }

        DiffOp::Fill { .. } => {
            let total = graph.sum_all(g)?;
            vec![Some(reshape_like(graph, total, inputs[0])?)]
        }

        DiffOp::Reshape { .. } => vec![Some(reshape_like(graph, g, inputs[0])?)],

        DiffOp::Cast { .. } => {
            let source = graph.shape(inputs[0])?.dtype;
            if source.is_float() {
                vec![Some(graph.cast(g, source)?)]
            } else {
                vec![None]
            }
        }

        DiffOp::Slice { axis, start, .. } => {
            let len = graph.shape(inputs[0])?.dims[axis];
            vec![Some(graph.pad(g, axis, start, len)?)]
        }

        DiffOp::Pad { axis, start, .. } => {
            let own = graph.shape(inputs[0])?.dims[axis];
            vec![Some(graph.slice(g, axis, start, start + own)?)]
        }

        DiffOp::Concat { axis } => {
            let mut offset = 0;
            let mut grads = Vec::with_capacity(inputs.len());
            for &input in inputs {
                let len = graph.shape(input)?.dims[axis];
                grads.push(Some(graph.slice(g, axis, offset, offset + len)?));
                offset += len;
            }
            grads
        }

        DiffOp::Take => {
            let (x, i) = (inputs[0], inputs[1]);
            let numel = graph.shape(x)?.numel();
            let scattered = graph.scatter(g, i, numel)?;
            vec![Some(reshape_like(graph, scattered, x)?), None]
        }

        DiffOp::Scatter { .. } => {
            let (v, i) = (inputs[0], inputs[1]);
            let taken = graph.take(g, i)?;
            vec![Some(reshape_like(graph, taken, v)?), None]
        }

        op @ DiffOp::Map { .. } => {
            return Err(GraphError::NotDifferentiable { op: op.to_string() })
        }

        // Leaves have no inputs to propagate to
        _ => vec![],
    };
    Ok(grads)
}

// ============================================================================
// Gradient checking
// ============================================================================

/// Numerical derivative of `cost` with respect to one element of `var`.
///
/// Uses central differences: (f(x+h) - f(x-h)) / 2h
pub fn numerical_gradient(
    graph: &DiffGraph,
    cost: NodeIndex,
    point: &Givens,
    var: NodeIndex,
    elem_idx: usize,
    h: f64,
) -> Result<f64, GraphError> {
    let mut plus = point.clone();
    let mut minus = point.clone();
    if let Some(value) = plus.get_mut(&var) {
        value.data[elem_idx] += h;
    }
    if let Some(value) = minus.get_mut(&var) {
        value.data[elem_idx] -= h;
    }

    let scalar = |givens: &Givens| -> Result<f64, GraphError> {
        let out = graph.eval(&[cost], givens)?;
        Ok(out[0].as_scalar().unwrap_or(f64::NAN))
    };

    Ok((scalar(&plus)? - scalar(&minus)?) / (2.0 * h))
}

/// Check symbolic gradients against numerical gradients at `point`.
///
/// # Arguments
///
/// * `graph` - The graph; gradient nodes are added to it
/// * `cost` - A single-element expression
/// * `wrt` - Variables to check, each bound in `point`
/// * `h` - Step size for numerical differentiation (e.g., 1e-5)
/// * `tolerance` - Maximum allowed difference (e.g., 1e-4)
pub fn grad_check(
    graph: &mut DiffGraph,
    cost: NodeIndex,
    wrt: &[NodeIndex],
    point: &Givens,
    h: f64,
    tolerance: f64,
) -> Result<(), GradCheckError> {
    let grads = grad(graph, cost, wrt, Disconnected::Ignore)?;
    let analytical = graph.eval(&grads, point)?;

    for (input_idx, (&var, values)) in wrt.iter().zip(&analytical).enumerate() {
        for (elem_idx, &analytical) in values.data.iter().enumerate() {
            let numerical = numerical_gradient(graph, cost, point, var, elem_idx, h)?;
            let diff = (numerical - analytical).abs();

            // Use relative error for large values
            let scale = analytical.abs().max(numerical.abs()).max(1.0);
            let rel_diff = diff / scale;

            if rel_diff > tolerance && diff > tolerance {
                return Err(GradCheckError::Mismatch {
                    input_idx,
                    elem_idx,
                    analytical,
                    numerical,
                    diff,
                });
            }
        }
    }

    Ok(())
}

/// Error from gradient checking.
#[derive(Debug, Error)]
pub enum GradCheckError {
    #[error("Gradient mismatch at input[{input_idx}][{elem_idx}]: analytical={analytical}, numerical={numerical}, diff={diff}")]
    Mismatch {
        input_idx: usize,
        elem_idx: usize,
        analytical: f64,
        numerical: f64,
        diff: f64,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}
