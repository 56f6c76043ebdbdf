//! # Forward Evaluation
//!
//! This module implements evaluation of expression graphs: the deterministic
//! semantics that maps `(graph, givens) → values`.
//!
//! ## Key Concepts
//!
//! - **Ancestors only**: only nodes the requested outputs depend on are computed
//! - **Once per call**: every node is computed at most once per evaluation,
//!   so a stream source advances at most once
//! - **Scopes**: a `Map` evaluates the loop-invariant part of its body once and
//!   the index-dependent part once per iteration, in a child scope
//! - **Preview**: evaluation from test values that never advances a source
//!
//! ## Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use symflow_core::Shape;
//! use symflow_diff::graph::DiffGraph;
//! use symflow_diff::tensor::Array;
//!
//! // Build: y = exp(a) * b
//! let mut graph = DiffGraph::new();
//! let a = graph.variable("a", Shape::f64_vector(2));
//! let b = graph.variable("b", Shape::f64_vector(2));
//! let e = graph.exp(a).unwrap();
//! let y = graph.mul(e, b).unwrap();
//!
//! let givens = HashMap::from([
//!     (a, Array::vector(vec![0.0, 0.0])),
//!     (b, Array::vector(vec![2.0, 3.0])),
//! ]);
//! let out = graph.eval(&[y], &givens).unwrap();
//! assert_eq!(out[0].data, vec![2.0, 3.0]);
//! ```

use std::collections::{HashMap, HashSet};

use petgraph::graph::NodeIndex;
use symflow_core::{CoreError, Shape};

use crate::error::GraphError;
use crate::graph::DiffGraph;
use crate::ops::DiffOp;
use crate::tensor::Array;
use crate::vartypes::input_vars;

/// Values bound to nodes for one evaluation, usually variables.
pub type Givens = HashMap<NodeIndex, Array>;

/// How leaves without a given value are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Variables must be given; sources advance.
    Run,
    /// Variables fall back to their test values; sources yield their sample.
    Preview,
}

/// Computed values, chained to the enclosing scope of a `Map`.
struct Scope<'p> {
    values: HashMap<NodeIndex, Array>,
    parent: Option<&'p Scope<'p>>,
}

impl<'p> Scope<'p> {
    fn root() -> Self {
        Self {
            values: HashMap::new(),
            parent: None,
        }
    }

    fn child(parent: &'p Scope<'p>) -> Self {
        Self {
            values: HashMap::new(),
            parent: Some(parent),
        }
    }

    fn lookup(&self, node: NodeIndex) -> Option<&Array> {
        match self.values.get(&node) {
            Some(value) => Some(value),
            None => self.parent.and_then(|parent| parent.lookup(node)),
        }
    }
}

struct Evaluator<'a> {
    graph: &'a DiffGraph,
    givens: &'a Givens,
    mode: EvalMode,
}

impl Evaluator<'_> {
    /// Compute every node of `order` missing from the scope chain.
    fn run(&self, order: &[NodeIndex], scope: &mut Scope<'_>) -> Result<(), GraphError> {
        for &node in order {
            if scope.lookup(node).is_none() {
                let value = self.compute(node, scope)?;
                scope.values.insert(node, value);
            }
        }
        Ok(())
    }

    fn compute(&self, node: NodeIndex, scope: &mut Scope<'_>) -> Result<Array, GraphError> {
        let data = self.graph.node(node)?;
        let declared = data.shape();

        if let Some(value) = self.givens.get(&node) {
            return conform(value.clone(), declared);
        }

        let value = match &data.op {
            DiffOp::Variable { name } => match self.mode {
                EvalMode::Run => {
                    return Err(GraphError::MissingInput {
                        name: name.clone(),
                        index: node.index(),
                    })
                }
                EvalMode::Preview => {
                    self.graph
                        .test_value(node)
                        .ok_or_else(|| GraphError::MissingTestValue {
                            name: name.clone(),
                            index: node.index(),
                        })?
                }
            },

            DiffOp::LoopIndex => {
                return Err(GraphError::UnboundLoopIndex {
                    index: node.index(),
                })
            }

            DiffOp::Source { source } => {
                let value = match self.mode {
                    EvalMode::Run => source.source().advance(),
                    EvalMode::Preview => self
                        .graph
                        .test_value(node)
                        .unwrap_or_else(|| source.source().sample()),
                };
                if value.shape != declared.dims {
                    return Err(GraphError::SourceDrift {
                        expected: declared.to_string(),
                        got: value.type_shape().to_string(),
                    });
                }
                value
            }

            DiffOp::Map { index, body } => self.eval_map(node, *index, *body, scope)?,

            op => {
                let inputs = self
                    .graph
                    .inputs_of(node)
                    .into_iter()
                    .map(|input| {
                        scope
                            .lookup(input)
                            .cloned()
                            .ok_or(GraphError::Core(CoreError::NodeNotFound {
                                index: input.index(),
                            }))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                op.forward(&inputs)?
            }
        };

        conform(value, declared)
    }

    fn eval_map(
        &self,
        node: NodeIndex,
        index: NodeIndex,
        body: NodeIndex,
        scope: &mut Scope<'_>,
    ) -> Result<Array, GraphError> {
        let over = self
            .graph
            .inputs_of(node)
            .first()
            .copied()
            .ok_or(GraphError::Core(CoreError::NodeNotFound {
                index: node.index(),
            }))?;
        let len = scope
            .lookup(over)
            .and_then(|seq| seq.shape.first().copied())
            .ok_or(GraphError::Core(CoreError::NodeNotFound {
                index: over.index(),
            }))?;

        let variant = self.index_dependent(body, index);
        let (per_iteration, invariant): (Vec<NodeIndex>, Vec<NodeIndex>) = self
            .graph
            .dependency_order(&[body], false)
            .into_iter()
            .partition(|n| variant.contains(n));

        self.run(&invariant, scope)?;

        let mut rows = Vec::with_capacity(len);
        for i in 0..len {
            let mut inner = Scope::child(&*scope);
            inner.values.insert(index, Array::index(i));
            self.run(&per_iteration, &mut inner)?;
            let row = inner
                .lookup(body)
                .cloned()
                .ok_or(GraphError::Core(CoreError::NodeNotFound {
                    index: body.index(),
                }))?;
            rows.push(row);
        }

        let row_shape = self.graph.shape(body)?;
        Ok(Array::stack(&rows, row_shape)?)
    }

    /// Nodes under `body` that reach `index`, looking through nested maps.
    fn index_dependent(&self, body: NodeIndex, index: NodeIndex) -> HashSet<NodeIndex> {
        let mut variant = HashSet::new();
        for node in self.graph.dependency_order(&[body], true) {
            let depends = node == index
                || self.graph.inputs_of(node).iter().any(|n| variant.contains(n))
                || self
                    .graph
                    .op(node)
                    .map(|op| op.inner_nodes().iter().any(|n| variant.contains(n)))
                    .unwrap_or(false);
            if depends {
                variant.insert(node);
            }
        }
        variant
    }
}

/// Check a value against its declared type, converting the element type.
fn conform(value: Array, declared: &Shape) -> Result<Array, GraphError> {
    if value.shape != declared.dims {
        return Err(GraphError::Core(CoreError::ShapeMismatch {
            expected: declared.clone(),
            got: value.type_shape(),
        }));
    }
    Ok(if value.dtype == declared.dtype {
        value
    } else {
        value.astype(declared.dtype)
    })
}

impl DiffGraph {
    /// Evaluate `outputs`, binding variables from `givens`.
    pub fn eval(&self, outputs: &[NodeIndex], givens: &Givens) -> Result<Vec<Array>, GraphError> {
        self.eval_with(outputs, givens, EvalMode::Run)
    }

    /// Evaluate `outputs` in the given mode.
    pub fn eval_with(
        &self,
        outputs: &[NodeIndex],
        givens: &Givens,
        mode: EvalMode,
    ) -> Result<Vec<Array>, GraphError> {
        let evaluator = Evaluator {
            graph: self,
            givens,
            mode,
        };
        let mut scope = Scope::root();
        evaluator.run(&self.dependency_order(outputs, false), &mut scope)?;

        outputs
            .iter()
            .map(|&output| {
                scope
                    .lookup(output)
                    .cloned()
                    .ok_or(GraphError::Core(CoreError::NodeNotFound {
                        index: output.index(),
                    }))
            })
            .collect()
    }

    /// Evaluate a node from test values without consuming any source.
    pub fn preview(&self, node: NodeIndex) -> Result<Array, GraphError> {
        let mut values = self.eval_with(&[node], &Givens::new(), EvalMode::Preview)?;
        values.pop().ok_or(GraphError::Core(CoreError::NodeNotFound {
            index: node.index(),
        }))
    }

    /// Package `outputs` as a positional function of `inputs`.
    ///
    /// Every variable the outputs depend on must be listed in `inputs`.
    pub fn function(
        &self,
        inputs: &[NodeIndex],
        outputs: &[NodeIndex],
    ) -> Result<Function<'_>, GraphError> {
        for var in input_vars(self, outputs) {
            if !inputs.contains(&var) {
                return Err(GraphError::MissingInput {
                    name: self.name(var).unwrap_or_default().to_string(),
                    index: var.index(),
                });
            }
        }
        Ok(Function {
            graph: self,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
        })
    }
}

/// A compiled positional callable over a graph.
#[derive(Debug, Clone)]
pub struct Function<'g> {
    graph: &'g DiffGraph,
    inputs: Vec<NodeIndex>,
    outputs: Vec<NodeIndex>,
}

impl Function<'_> {
    /// Evaluate the outputs with `args` bound to the inputs, in order.
    pub fn call(&self, args: &[Array]) -> Result<Vec<Array>, GraphError> {
        if args.len() != self.inputs.len() {
            return Err(GraphError::InvalidOp {
                op: "call".to_string(),
                reason: format!("expected {} arguments, got {}", self.inputs.len(), args.len()),
            });
        }
        let givens: Givens = self.inputs.iter().copied().zip(args.iter().cloned()).collect();
        self.graph.eval(&self.outputs, &givens)
    }

    pub fn inputs(&self) -> &[NodeIndex] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeIndex] {
        &self.outputs
    }
}
