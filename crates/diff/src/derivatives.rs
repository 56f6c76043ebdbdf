//! # Derivatives
//!
//! Flat gradients, Jacobians, Hessians and Hessian diagonals of graph
//! expressions with respect to a list of variables.
//!
//! All results are graph nodes. Per-index constructions (Jacobian rows,
//! Hessian-diagonal entries) use the in-graph `Map` loop, so they are
//! built once whatever the output length.
//!
//! ## Sign convention
//!
//! [`hessian`] and [`hessian_diag`] return the **negated** second
//! derivatives. They are meant for expressions that are log-densities,
//! where `-∇²f` is the observed information and is positive semi-definite.
//!
//! ## Memoization
//!
//! Results are memoized in an explicit [`DerivativeCache`] keyed by graph,
//! derivative kind, expression and variable list. Graphs are append-only,
//! so a cached node stays valid for as long as its graph lives;
//! [`DerivativeCache::invalidate`] drops the entries of a graph that is
//! being torn down.
//!
//! ```rust
//! use symflow_core::Shape;
//! use symflow_diff::derivatives::{gradient, DerivativeCache};
//! use symflow_diff::forward::Givens;
//! use symflow_diff::graph::DiffGraph;
//! use symflow_diff::tensor::Array;
//!
//! let mut graph = DiffGraph::new();
//! let mut cache = DerivativeCache::new();
//! let a = graph.variable("a", Shape::f64_scalar());
//! let b = graph.variable("b", Shape::f64_vector(2));
//! let ab = graph.mul(a, b).unwrap();
//! let f = graph.sum_all(ab).unwrap();
//!
//! // ∂f/∂a = b_0 + b_1, ∂f/∂b = [a, a]
//! let g = gradient(&mut graph, &mut cache, f, None).unwrap();
//! let givens = Givens::from([(a, Array::scalar(2.0)), (b, Array::vector(vec![3.0, 4.0]))]);
//! assert_eq!(graph.eval(&[g], &givens).unwrap()[0].data, vec![7.0, 2.0, 2.0]);
//! ```

use std::collections::HashMap;

use petgraph::graph::NodeIndex;
use symflow_core::DType;
use tracing::debug;

use crate::backward::{grad, Disconnected};
use crate::error::GraphError;
use crate::graph::{DiffGraph, GraphId};
use crate::tensor::Array;
use crate::vartypes::cont_inputs;

/// The kind of derivative a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Derivative {
    Gradient,
    Jacobian,
    Hessian,
    HessianDiag,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    graph: GraphId,
    kind: Derivative,
    expr: NodeIndex,
    vars: Option<Vec<NodeIndex>>,
}

/// Memoized derivative nodes.
#[derive(Debug, Default)]
pub struct DerivativeCache {
    entries: HashMap<CacheKey, NodeIndex>,
    hits: usize,
}

impl DerivativeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of lookups answered from the cache.
    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every entry that belongs to `graph`.
    pub fn invalidate(&mut self, graph: GraphId) {
        self.entries.retain(|key, _| key.graph != graph);
    }
}

fn memoized(
    graph: &mut DiffGraph,
    cache: &mut DerivativeCache,
    kind: Derivative,
    expr: NodeIndex,
    vars: Option<&[NodeIndex]>,
    build: impl FnOnce(&mut DiffGraph, &mut DerivativeCache) -> Result<NodeIndex, GraphError>,
) -> Result<NodeIndex, GraphError> {
    let key = CacheKey {
        graph: graph.id(),
        kind,
        expr,
        vars: vars.map(<[NodeIndex]>::to_vec),
    };
    if let Some(&node) = cache.entries.get(&key) {
        cache.hits += 1;
        debug!(?kind, expr = expr.index(), "derivative cache hit");
        return Ok(node);
    }
    let node = build(graph, cache)?;
    cache.entries.insert(key, node);
    Ok(node)
}

fn resolve_vars(graph: &DiffGraph, f: NodeIndex, vars: Option<&[NodeIndex]>) -> Vec<NodeIndex> {
    match vars {
        Some(vars) => vars.to_vec(),
        None => cont_inputs(graph, &[f]),
    }
}

/// The gradient of an expression with respect to no variables: a length-0
/// float32 vector.
pub fn empty_gradient(graph: &mut DiffGraph) -> NodeIndex {
    graph.constant(Array::zeros(vec![0], DType::Float32))
}

/// Flattened gradient of the single-element `f` with respect to `v`.
///
/// If `f` does not depend on `v` the gradient is zero and a warning is
/// logged.
pub fn gradient1(
    graph: &mut DiffGraph,
    f: NodeIndex,
    v: NodeIndex,
) -> Result<NodeIndex, GraphError> {
    let g = grad(graph, f, &[v], Disconnected::Warn)?;
    graph.flatten(g[0])
}

/// Flat gradient of the single-element `f`: the per-variable flattened
/// gradients concatenated in `vars` order.
///
/// With `vars` omitted, the continuous free variables of `f` are used.
pub fn gradient(
    graph: &mut DiffGraph,
    cache: &mut DerivativeCache,
    f: NodeIndex,
    vars: Option<&[NodeIndex]>,
) -> Result<NodeIndex, GraphError> {
    memoized(graph, cache, Derivative::Gradient, f, vars, |graph, _| {
        let vars = resolve_vars(graph, f, vars);
        if vars.is_empty() {
            return Ok(empty_gradient(graph));
        }
        let parts = vars
            .iter()
            .map(|&v| gradient1(graph, f, v))
            .collect::<Result<Vec<_>, _>>()?;
        graph.concat(&parts, 0)
    })
}

/// Jacobian of `f`, flattened to `m` elements, with respect to `vars`:
/// an `m × n` matrix where `n` is the total element count of `vars`.
pub fn jacobian(
    graph: &mut DiffGraph,
    cache: &mut DerivativeCache,
    f: NodeIndex,
    vars: Option<&[NodeIndex]>,
) -> Result<NodeIndex, GraphError> {
    memoized(graph, cache, Derivative::Jacobian, f, vars, |graph, _| {
        let vars = resolve_vars(graph, f, vars);
        if vars.is_empty() {
            return Ok(empty_gradient(graph));
        }
        let flat = graph.flatten(f)?;
        let i = graph.loop_index();
        let fi = graph.take(flat, i)?;
        let row_parts = vars
            .iter()
            .map(|&v| gradient1(graph, fi, v))
            .collect::<Result<Vec<_>, _>>()?;
        let row = graph.concat(&row_parts, 0)?;
        graph.map(i, row, flat)
    })
}

/// Negated Hessian of the single-element `f` with respect to `vars`:
/// `-jacobian(gradient(f, vars), vars)`.
///
/// With no variables the result is a `0 × 0` float32 matrix.
pub fn hessian(
    graph: &mut DiffGraph,
    cache: &mut DerivativeCache,
    f: NodeIndex,
    vars: Option<&[NodeIndex]>,
) -> Result<NodeIndex, GraphError> {
    memoized(graph, cache, Derivative::Hessian, f, vars, |graph, cache| {
        let vars = resolve_vars(graph, f, vars);
        if vars.is_empty() {
            return Ok(graph.constant(Array::zeros(vec![0, 0], DType::Float32)));
        }
        let g = gradient(graph, cache, f, Some(&vars))?;
        let j = jacobian(graph, cache, g, Some(&vars))?;
        graph.neg(j)
    })
}

/// Negated diagonal of the Hessian of the single-element `f`.
///
/// Each entry `i` is `∂g_i/∂x_i` of the gradient `g`, so only the diagonal
/// is ever built.
pub fn hessian_diag(
    graph: &mut DiffGraph,
    cache: &mut DerivativeCache,
    f: NodeIndex,
    vars: Option<&[NodeIndex]>,
) -> Result<NodeIndex, GraphError> {
    memoized(graph, cache, Derivative::HessianDiag, f, vars, |graph, _| {
        let vars = resolve_vars(graph, f, vars);
        if vars.is_empty() {
            return Ok(empty_gradient(graph));
        }
        let mut parts = Vec::with_capacity(vars.len());
        for &v in &vars {
            let g = gradient1(graph, f, v)?;
            let i = graph.loop_index();
            let gi = graph.take(g, i)?;
            let row = gradient1(graph, gi, v)?;
            let entry = graph.take(row, i)?;
            parts.push(graph.map(i, entry, g)?);
        }
        let diag = graph.concat(&parts, 0)?;
        graph.neg(diag)
    })
}
