//! # Expression Graphs
//!
//! `DiffGraph` wraps `Diagram<DiffOp>` with builder methods, per-graph
//! configuration and test-value storage.
//!
//! Graphs are append-only: builders add nodes and never touch existing ones,
//! so a [`NodeIndex`] is a stable identity for the expression rooted there.
//!
//! ## Example
//!
//! ```rust
//! use symflow_core::Shape;
//! use symflow_diff::graph::DiffGraph;
//!
//! // Build: y = sum(x * x)
//! let mut graph = DiffGraph::new();
//! let x = graph.variable("x", Shape::f64_vector(3));
//! let sq = graph.mul(x, x).unwrap();
//! let y = graph.sum_all(sq).unwrap();
//!
//! assert!(graph.shape(y).unwrap().is_scalar());
//! assert_eq!(graph.inputs_of(sq), vec![x, x]);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use petgraph::graph::NodeIndex;
use symflow_core::{DType, Diagram, GraphConfig, Node, Port, Shape, TestValueMode};

use crate::error::GraphError;
use crate::ops::DiffOp;
use crate::source::{SharedValue, SourceHandle};
use crate::tensor::Array;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    fn fresh() -> Self {
        GraphId(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph#{}", self.0)
    }
}

/// A computation graph for differentiable operations.
#[derive(Debug)]
pub struct DiffGraph {
    /// The underlying diagram
    pub diagram: Diagram<DiffOp>,
    config: GraphConfig,
    id: GraphId,
    test_values: HashMap<NodeIndex, Array>,
}

impl DiffGraph {
    /// Create a new empty graph with the default configuration.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            diagram: Diagram::new(),
            config,
            id: GraphId::fresh(),
            test_values: HashMap::new(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut GraphConfig {
        &mut self.config
    }

    /// Temporarily override the configuration.
    ///
    /// The returned guard dereferences to the graph; the previous
    /// configuration is restored when it is dropped, including on early
    /// return through `?`.
    ///
    /// ```rust
    /// use symflow_core::TestValueMode;
    /// use symflow_diff::graph::DiffGraph;
    ///
    /// let mut graph = DiffGraph::new();
    /// {
    ///     let scope = graph.scoped(|c| c.compute_test_value = TestValueMode::Eager);
    ///     assert_eq!(scope.config().compute_test_value, TestValueMode::Eager);
    /// }
    /// assert_eq!(graph.config().compute_test_value, TestValueMode::Off);
    /// ```
    pub fn scoped(&mut self, update: impl FnOnce(&mut GraphConfig)) -> ConfigScope<'_> {
        let saved = self.config.clone();
        update(&mut self.config);
        ConfigScope { graph: self, saved }
    }

    // ========================================================================
    // Leaves
    // ========================================================================

    fn leaf(&mut self, op: DiffOp, shape: Shape, name: Option<&str>) -> NodeIndex {
        let mut node = Node::new(op, vec![], Port::new(shape));
        if let Some(name) = name {
            node = node.named(name);
        }
        self.diagram.add_node(node)
    }

    /// Add a free variable.
    pub fn variable(&mut self, name: &str, shape: Shape) -> NodeIndex {
        let op = DiffOp::Variable {
            name: name.to_string(),
        };
        self.leaf(op, shape, Some(name))
    }

    /// Add a shared placeholder seeded with `value`.
    pub fn shared(&mut self, name: &str, value: Array) -> NodeIndex {
        self.shared_from(name, SharedValue::new(value))
    }

    /// Add a shared placeholder over existing storage.
    pub fn shared_from(&mut self, name: &str, value: SharedValue) -> NodeIndex {
        let shape = value.shape();
        let op = DiffOp::Shared {
            name: name.to_string(),
            value,
        };
        self.leaf(op, shape, Some(name))
    }

    /// Add a literal.
    pub fn constant(&mut self, value: Array) -> NodeIndex {
        let shape = value.type_shape();
        self.leaf(DiffOp::Const { value }, shape, None)
    }

    pub fn scalar_constant(&mut self, value: f64) -> NodeIndex {
        self.constant(Array::scalar(value))
    }

    /// An int64 scalar literal, for `take` and `scatter`.
    pub fn index_constant(&mut self, index: usize) -> NodeIndex {
        self.constant(Array::index(index))
    }

    /// Add a zero-input node fed by an external source.
    ///
    /// With eager test values enabled, the node's test value is computed by
    /// evaluating it, which consumes one element of the source.
    pub fn add_source(&mut self, source: SourceHandle) -> NodeIndex {
        let shape = source.source().output_shape();
        let eager = self.config.compute_test_value == TestValueMode::Eager;
        let test_value = eager.then(|| source.source().advance());
        let idx = self.leaf(DiffOp::Source { source }, shape, None);
        if let Some(value) = test_value {
            self.test_values.insert(idx, value);
        }
        idx
    }

    /// A fresh loop index for use in a `map` body.
    pub fn loop_index(&mut self) -> NodeIndex {
        self.leaf(DiffOp::LoopIndex, Shape::scalar(DType::Int64), None)
    }

    // ========================================================================
    // Interior operations
    // ========================================================================

    /// Add a node applying `op` to `inputs`, inferring its type.
    pub fn apply(&mut self, op: DiffOp, inputs: &[NodeIndex]) -> Result<NodeIndex, GraphError> {
        let shapes = inputs
            .iter()
            .map(|&input| self.shape(input).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        let output = op.infer_shape(&shapes)?;
        self.insert(op, inputs, shapes, output)
    }

    fn insert(
        &mut self,
        op: DiffOp,
        inputs: &[NodeIndex],
        shapes: Vec<Shape>,
        output: Shape,
    ) -> Result<NodeIndex, GraphError> {
        let test_value = if self.config.compute_test_value == TestValueMode::Eager
            && !op.is_leaf()
            && !matches!(op, DiffOp::Map { .. })
        {
            self.eager_test_value(&op, inputs, &output)?
        } else {
            None
        };

        let ports = shapes.into_iter().map(Port::new).collect();
        let idx = self.diagram.add_node(Node::new(op, ports, Port::new(output)));
        for (port, &input) in inputs.iter().enumerate() {
            self.diagram.connect(input, idx, port)?;
        }
        if let Some(value) = test_value {
            self.test_values.insert(idx, value);
        }
        Ok(idx)
    }

    fn eager_test_value(
        &self,
        op: &DiffOp,
        inputs: &[NodeIndex],
        output: &Shape,
    ) -> Result<Option<Array>, GraphError> {
        let mut values = Vec::with_capacity(inputs.len());
        for &input in inputs {
            match self.test_value(input) {
                Some(value) => values.push(value),
                None => return Ok(None),
            }
        }
        let value = op.forward(&values)?;
        Ok(Some(if value.dtype == output.dtype {
            value
        } else {
            value.astype(output.dtype)
        }))
    }

    pub fn add(&mut self, a: NodeIndex, b: NodeIndex) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Add, &[a, b])
    }

    pub fn sub(&mut self, a: NodeIndex, b: NodeIndex) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Sub, &[a, b])
    }

    pub fn mul(&mut self, a: NodeIndex, b: NodeIndex) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Mul, &[a, b])
    }

    pub fn div(&mut self, a: NodeIndex, b: NodeIndex) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Div, &[a, b])
    }

    pub fn neg(&mut self, x: NodeIndex) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Neg, &[x])
    }

    pub fn exp(&mut self, x: NodeIndex) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Exp, &[x])
    }

    pub fn log(&mut self, x: NodeIndex) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Log, &[x])
    }

    /// A pass-through node with the same type as `x`.
    pub fn identity(&mut self, x: NodeIndex) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Identity, &[x])
    }

    pub fn matmul(&mut self, a: NodeIndex, b: NodeIndex) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::MatMul, &[a, b])
    }

    pub fn transpose(&mut self, x: NodeIndex) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Transpose, &[x])
    }

    pub fn sum_all(&mut self, x: NodeIndex) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::SumAll, &[x])
    }

    pub fn fill(&mut self, x: NodeIndex, shape: Vec<usize>) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Fill { shape }, &[x])
    }

    pub fn reshape(&mut self, x: NodeIndex, dims: Vec<usize>) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Reshape { dims }, &[x])
    }

    /// Rank-1 view of `x`. Vectors are returned unchanged.
    pub fn flatten(&mut self, x: NodeIndex) -> Result<NodeIndex, GraphError> {
        let shape = self.shape(x)?;
        if shape.rank() == 1 {
            return Ok(x);
        }
        let numel = shape.numel();
        self.reshape(x, vec![numel])
    }

    pub fn cast(&mut self, x: NodeIndex, dtype: DType) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Cast { dtype }, &[x])
    }

    pub fn slice(
        &mut self,
        x: NodeIndex,
        axis: usize,
        start: usize,
        end: usize,
    ) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Slice { axis, start, end }, &[x])
    }

    pub fn pad(
        &mut self,
        x: NodeIndex,
        axis: usize,
        start: usize,
        len: usize,
    ) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Pad { axis, start, len }, &[x])
    }

    pub fn concat(&mut self, parts: &[NodeIndex], axis: usize) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Concat { axis }, parts)
    }

    /// Flat element of `x` at the runtime index `index`.
    pub fn take(&mut self, x: NodeIndex, index: NodeIndex) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Take, &[x, index])
    }

    /// A length-`len` zero vector holding `g` at the runtime index `index`.
    pub fn scatter(
        &mut self,
        g: NodeIndex,
        index: NodeIndex,
        len: usize,
    ) -> Result<NodeIndex, GraphError> {
        self.apply(DiffOp::Scatter { len }, &[g, index])
    }

    /// Evaluate `body` for each leading element of `over`, with `index`
    /// bound to the element number, stacking the results.
    ///
    /// `body` may use any node of the graph; only nodes that depend on
    /// `index` are re-evaluated per iteration.
    pub fn map(
        &mut self,
        index: NodeIndex,
        body: NodeIndex,
        over: NodeIndex,
    ) -> Result<NodeIndex, GraphError> {
        let op = DiffOp::Map { index, body };
        if !matches!(self.op(index)?, DiffOp::LoopIndex) {
            return Err(GraphError::InvalidOp {
                op: op.to_string(),
                reason: format!("node {} is not a loop index", index.index()),
            });
        }
        let over_shape = self.shape(over)?.clone();
        let body_shape = self.shape(body)?;
        let len = *over_shape.dims.first().ok_or_else(|| GraphError::InvalidOp {
            op: op.to_string(),
            reason: format!("cannot iterate over {}", over_shape),
        })?;
        let mut dims = vec![len];
        dims.extend_from_slice(&body_shape.dims);
        let output = Shape::new(body_shape.dtype, dims);
        self.insert(op, &[over], vec![over_shape], output)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn node(&self, index: NodeIndex) -> Result<&Node<DiffOp>, GraphError> {
        Ok(self.diagram.node(index)?)
    }

    pub fn op(&self, index: NodeIndex) -> Result<&DiffOp, GraphError> {
        Ok(&self.node(index)?.op)
    }

    pub fn shape(&self, index: NodeIndex) -> Result<&Shape, GraphError> {
        Ok(self.node(index)?.shape())
    }

    pub fn name(&self, index: NodeIndex) -> Option<&str> {
        self.diagram
            .graph
            .node_weight(index)
            .and_then(|node| node.name.as_deref())
    }

    /// Input wires of `index`, in port order.
    pub fn inputs_of(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.diagram.inputs_of(index)
    }

    pub fn node_count(&self) -> usize {
        self.diagram.node_count()
    }

    fn children(&self, index: NodeIndex, include_inner: bool) -> Vec<NodeIndex> {
        let mut children = self.inputs_of(index);
        if include_inner {
            if let Some(node) = self.diagram.graph.node_weight(index) {
                children.extend(node.op.inner_nodes());
            }
        }
        children
    }

    /// All nodes the targets depend on, dependencies first.
    ///
    /// The order is a depth-first post-order: inputs are visited in port
    /// order and each node appears once, at its first discovery. With
    /// `include_inner`, the bodies of `Map` nodes are traversed as well.
    pub fn dependency_order(&self, targets: &[NodeIndex], include_inner: bool) -> Vec<NodeIndex> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();

        for &target in targets {
            let mut stack = vec![(target, false)];
            while let Some((node, expanded)) = stack.pop() {
                if expanded {
                    order.push(node);
                    continue;
                }
                if !visited.insert(node) {
                    continue;
                }
                stack.push((node, true));
                for child in self.children(node, include_inner).into_iter().rev() {
                    if !visited.contains(&child) {
                        stack.push((child, false));
                    }
                }
            }
        }

        order
    }

    // ========================================================================
    // Test values
    // ========================================================================

    /// Attach a representative value to a node.
    pub fn set_test_value(&mut self, index: NodeIndex, value: Array) -> Result<(), GraphError> {
        let shape = self.shape(index)?;
        if value.shape != shape.dims {
            return Err(GraphError::Core(symflow_core::CoreError::ShapeMismatch {
                expected: shape.clone(),
                got: value.type_shape(),
            }));
        }
        let value = if value.dtype == shape.dtype {
            value
        } else {
            value.astype(shape.dtype)
        };
        self.test_values.insert(index, value);
        Ok(())
    }

    /// The test value of a node, if any.
    ///
    /// Constants and shared placeholders always have one: their current value.
    pub fn test_value(&self, index: NodeIndex) -> Option<Array> {
        if let Some(value) = self.test_values.get(&index) {
            return Some(value.clone());
        }
        match self.diagram.graph.node_weight(index).map(|node| &node.op) {
            Some(DiffOp::Const { value }) => Some(value.clone()),
            Some(DiffOp::Shared { value, .. }) => Some(value.get()),
            _ => None,
        }
    }
}

impl Default for DiffGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DiffGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.id)?;
        fmt::Display::fmt(&self.diagram, f)
    }
}

/// A graph with a temporarily overridden configuration.
///
/// Created by [`DiffGraph::scoped`].
pub struct ConfigScope<'g> {
    graph: &'g mut DiffGraph,
    saved: GraphConfig,
}

impl Deref for ConfigScope<'_> {
    type Target = DiffGraph;

    fn deref(&self) -> &DiffGraph {
        self.graph
    }
}

impl DerefMut for ConfigScope<'_> {
    fn deref_mut(&mut self) -> &mut DiffGraph {
        self.graph
    }
}

impl Drop for ConfigScope<'_> {
    fn drop(&mut self) {
        self.graph.config = std::mem::take(&mut self.saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symflow_core::CoreError;

    #[test]
    fn test_graph_ids_are_unique() {
        assert_ne!(DiffGraph::new().id(), DiffGraph::new().id());
    }

    #[test]
    fn test_builder_infers_shapes() {
        let mut graph = DiffGraph::new();
        let a = graph.variable("a", Shape::f64_matrix(2, 3));
        let b = graph.variable("b", Shape::f64_matrix(3, 4));
        let c = graph.matmul(a, b).unwrap();
        assert_eq!(graph.shape(c).unwrap(), &Shape::f64_matrix(2, 4));

        let result = graph.matmul(b, b);
        assert!(matches!(
            result,
            Err(GraphError::Core(CoreError::ShapeMismatch { .. }))
        ));
    }

    #[test]
    fn test_dependency_order_post_order() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_scalar());
        let y = graph.variable("y", Shape::f64_scalar());
        let s = graph.add(y, x).unwrap();
        let p = graph.mul(s, x).unwrap();

        assert_eq!(graph.dependency_order(&[p], false), vec![y, x, s, p]);
    }

    #[test]
    fn test_dependency_order_includes_map_body() {
        let mut graph = DiffGraph::new();
        let v = graph.variable("v", Shape::f64_vector(3));
        let i = graph.loop_index();
        let body = graph.take(v, i).unwrap();
        let other = graph.variable("w", Shape::f64_vector(3));
        let m = graph.map(i, body, other).unwrap();

        assert_eq!(graph.shape(m).unwrap(), &Shape::f64_vector(3));
        assert!(!graph.dependency_order(&[m], false).contains(&v));
        assert!(graph.dependency_order(&[m], true).contains(&v));
    }

    #[test]
    fn test_map_requires_loop_index() {
        let mut graph = DiffGraph::new();
        let v = graph.variable("v", Shape::f64_vector(3));
        let result = graph.map(v, v, v);
        assert!(matches!(result, Err(GraphError::InvalidOp { .. })));
    }

    #[test]
    fn test_eager_test_values() {
        let config = GraphConfig::default().with_test_values(TestValueMode::Eager);
        let mut graph = DiffGraph::with_config(config);
        let x = graph.variable("x", Shape::f64_vector(2));
        graph
            .set_test_value(x, Array::vector(vec![1.0, 2.0]))
            .unwrap();
        let two = graph.scalar_constant(2.0);
        let y = graph.mul(x, two).unwrap();
        assert_eq!(graph.test_value(y).unwrap().data, vec![2.0, 4.0]);

        // An input without a test value leaves the result without one
        let z = graph.variable("z", Shape::f64_vector(2));
        let w = graph.add(y, z).unwrap();
        assert!(graph.test_value(w).is_none());
    }

    #[test]
    fn test_eager_failure_is_a_construction_error() {
        let config = GraphConfig::default().with_test_values(TestValueMode::Eager);
        let mut graph = DiffGraph::with_config(config);
        let x = graph.constant(Array::vector(vec![1.0, 2.0]));
        let i = graph.index_constant(5);
        let before = graph.node_count();
        let result = graph.take(x, i);
        assert_eq!(result, Err(GraphError::IndexOutOfBounds { index: 5, len: 2 }));
        assert_eq!(graph.node_count(), before);
    }

    #[test]
    fn test_scoped_restores_config() {
        let mut graph = DiffGraph::new();
        let attempt = |graph: &mut DiffGraph| -> Result<NodeIndex, GraphError> {
            let mut scope = graph.scoped(|c| c.compute_test_value = TestValueMode::Eager);
            let x = scope.variable("x", Shape::f64_vector(2));
            let y = scope.variable("y", Shape::f64_vector(3));
            scope.add(x, y)
        };
        assert!(attempt(&mut graph).is_err());
        assert_eq!(graph.config().compute_test_value, TestValueMode::Off);
    }

    #[test]
    fn test_set_test_value_checks_shape() {
        let mut graph = DiffGraph::new();
        let x = graph.variable("x", Shape::f64_vector(2));
        assert!(graph.set_test_value(x, Array::scalar(1.0)).is_err());
    }
}
