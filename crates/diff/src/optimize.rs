//! # Graph Optimization
//!
//! Rewrites that produce smaller equivalent expressions:
//!
//! - [`fold_constants`]: evaluate operations whose inputs are all constants
//! - [`merge_duplicates`]: share structurally identical sub-expressions
//!
//! Both return new output nodes and leave the originals intact.

use std::collections::HashMap;

use petgraph::graph::NodeIndex;
use tracing::debug;

use crate::error::GraphError;
use crate::graph::DiffGraph;
use crate::ops::DiffOp;

fn remap(memo: &HashMap<NodeIndex, NodeIndex>, nodes: &[NodeIndex]) -> Vec<NodeIndex> {
    nodes
        .iter()
        .map(|node| memo.get(node).copied().unwrap_or(*node))
        .collect()
}

/// Replace every foldable operation over constant inputs by its value.
///
/// An operation is folded only if [`DiffOp::do_constant_folding`] allows it,
/// so stream sources are never evaluated here unless they opt in.
pub fn fold_constants(
    graph: &mut DiffGraph,
    outputs: &[NodeIndex],
) -> Result<Vec<NodeIndex>, GraphError> {
    let mut memo: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut folded = 0usize;

    for node in graph.dependency_order(outputs, false) {
        let op = graph.op(node)?.clone();
        if matches!(op, DiffOp::Const { .. }) {
            continue;
        }
        let inputs = graph.inputs_of(node);
        let new_inputs = remap(&memo, &inputs);

        let constants: Option<Vec<_>> = new_inputs
            .iter()
            .map(|&input| match graph.op(input) {
                Ok(DiffOp::Const { value }) => Some(value.clone()),
                _ => None,
            })
            .collect();

        let replacement = match (op.do_constant_folding(), constants) {
            (true, Some(values)) => {
                let dtype = graph.shape(node)?.dtype;
                let mut value = op.forward(&values)?;
                if value.dtype != dtype {
                    value = value.astype(dtype);
                }
                folded += 1;
                graph.constant(value)
            }
            _ if new_inputs == inputs => continue,
            _ => match op {
                DiffOp::Map { index, body } => graph.map(index, body, new_inputs[0])?,
                op => graph.apply(op, &new_inputs)?,
            },
        };
        memo.insert(node, replacement);
    }

    debug!(folded, "folded constants");
    Ok(remap(&memo, outputs))
}

/// Merge structurally identical nodes, including inside `Map` bodies.
///
/// Two nodes are identical when their operations are equal and they have the
/// same inputs. Constants are merged by value; other leaves are distinct
/// identities and never merged.
pub fn merge_duplicates(
    graph: &mut DiffGraph,
    outputs: &[NodeIndex],
) -> Result<Vec<NodeIndex>, GraphError> {
    let mut memo: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut seen: HashMap<(DiffOp, Vec<NodeIndex>), NodeIndex> = HashMap::new();

    for node in graph.dependency_order(outputs, true) {
        let original = graph.op(node)?.clone();
        if original.is_leaf() && !matches!(original, DiffOp::Const { .. }) {
            continue;
        }
        let inputs = graph.inputs_of(node);
        let new_inputs = remap(&memo, &inputs);
        let op = match original {
            DiffOp::Map { index, body } => DiffOp::Map {
                index,
                body: memo.get(&body).copied().unwrap_or(body),
            },
            ref op => op.clone(),
        };

        let key = (op, new_inputs);
        if let Some(&existing) = seen.get(&key) {
            memo.insert(node, existing);
            continue;
        }
        let (op, new_inputs) = key;
        let canonical = if op == original && new_inputs == inputs {
            node
        } else {
            match &op {
                DiffOp::Map { index, body } => graph.map(*index, *body, new_inputs[0])?,
                _ => graph.apply(op.clone(), &new_inputs)?,
            }
        };
        if canonical != node {
            memo.insert(node, canonical);
        }
        seen.insert((op, new_inputs), canonical);
    }

    debug!(merged = memo.len(), "merged duplicate nodes");
    Ok(remap(&memo, outputs))
}
