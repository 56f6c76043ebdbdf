//! # Diagrams - Expression DAG Data Model
//!
//! A diagram is a program: boxes (operations) connected by wires (data flow).
//! Symflow diagrams are append-only expression arenas: each node produces a
//! single output wire, and a node's identity is its [`NodeIndex`].
//!
//! ## Key Concepts
//!
//! - **Node**: an operation with typed input ports and one typed output port
//! - **Edge**: a wire from a node's output into an input port of another node
//! - **Sharing**: a node may feed any number of consumers, so a diagram is a
//!   DAG rather than a tree

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::fmt;

use crate::error::CoreError;
use crate::shape::Shape;

/// A port is a typed connection point on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub shape: Shape,
}

impl Port {
    pub fn new(shape: Shape) -> Self {
        Self { shape }
    }
}

/// A node in the diagram, parameterized by operation type.
///
/// The generic `O` lets a domain define its own operation set; the
/// differentiation crate uses `DiffOp`.
#[derive(Debug, Clone)]
pub struct Node<O> {
    /// The operation this node performs
    pub op: O,
    /// Optional human-readable name (not an identity)
    pub name: Option<String>,
    /// Input ports (data flows in)
    pub inputs: Vec<Port>,
    /// The single output port
    pub output: Port,
}

impl<O> Node<O> {
    pub fn new(op: O, inputs: Vec<Port>, output: Port) -> Self {
        Self {
            op,
            name: None,
            inputs,
            output,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Number of input ports
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Shape of the output wire.
    pub fn shape(&self) -> &Shape {
        &self.output.shape
    }
}

/// An edge connects a node's output to an input port of another node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Index of the input port on the target node
    pub to_port: usize,
}

impl Edge {
    pub fn new(to_port: usize) -> Self {
        Self { to_port }
    }
}

/// A directed acyclic graph of nodes connected by edges.
#[derive(Debug, Clone)]
pub struct Diagram<O> {
    /// The underlying graph structure
    pub graph: DiGraph<Node<O>, Edge>,
}

impl<O> Diagram<O> {
    /// Create a new empty diagram.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
        }
    }

    /// Add a node to the diagram, returning its index.
    pub fn add_node(&mut self, node: Node<O>) -> NodeIndex {
        self.graph.add_node(node)
    }

    /// Look up a node.
    pub fn node(&self, index: NodeIndex) -> Result<&Node<O>, CoreError> {
        self.graph
            .node_weight(index)
            .ok_or(CoreError::NodeNotFound {
                index: index.index(),
            })
    }

    /// Connect the output of `from` to input port `to_port` of `to`.
    ///
    /// Returns an error if:
    /// - Either node is missing
    /// - The port index is out of bounds
    /// - Shapes don't match
    pub fn connect(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        to_port: usize,
    ) -> Result<(), CoreError> {
        let from_shape = self.node(from)?.output.shape.clone();
        let to_node = self.node(to)?;

        let to_shape = &to_node
            .inputs
            .get(to_port)
            .ok_or(CoreError::InvalidPort {
                index: to_port,
                count: to_node.inputs.len(),
            })?
            .shape;

        if !from_shape.is_compatible(to_shape) {
            return Err(CoreError::ShapeMismatch {
                expected: to_shape.clone(),
                got: from_shape,
            });
        }

        self.graph.add_edge(from, to, Edge::new(to_port));
        Ok(())
    }

    /// Producers of `node`'s input ports, in port order.
    ///
    /// Ports with no incoming wire are skipped; [`Diagram::validate`] reports them.
    pub fn inputs_of(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut wired: Vec<(usize, NodeIndex)> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|edge| (edge.weight().to_port, edge.source()))
            .collect();
        wired.sort_by_key(|(port, _)| *port);
        wired.into_iter().map(|(_, source)| source).collect()
    }

    /// Validate the diagram's internal consistency.
    ///
    /// Checks:
    /// - All edges connect compatible shapes
    /// - Every input port is fed by exactly one wire
    pub fn validate(&self) -> Result<(), CoreError> {
        for edge_ref in self.graph.edge_references() {
            let from = self.node(edge_ref.source())?;
            let to = self.node(edge_ref.target())?;
            let port = edge_ref.weight().to_port;

            let to_port = to.inputs.get(port).ok_or(CoreError::InvalidPort {
                index: port,
                count: to.inputs.len(),
            })?;

            if !from.output.shape.is_compatible(&to_port.shape) {
                return Err(CoreError::ShapeMismatch {
                    expected: to_port.shape.clone(),
                    got: from.output.shape.clone(),
                });
            }
        }

        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let mut fed = vec![0usize; node.inputs.len()];
            for edge in self.graph.edges_directed(index, Direction::Incoming) {
                if let Some(count) = fed.get_mut(edge.weight().to_port) {
                    *count += 1;
                }
            }
            if let Some(port) = fed.iter().position(|&count| count != 1) {
                return Err(CoreError::ValidationError {
                    reason: format!(
                        "node {} input port {} has {} wires",
                        index.index(),
                        port,
                        fed[port]
                    ),
                });
            }
        }

        Ok(())
    }

    /// Number of nodes in the diagram.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges in the diagram.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

impl<O> Default for Diagram<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: fmt::Debug> fmt::Display for Diagram<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Diagram({} nodes, {} edges)",
            self.node_count(),
            self.edge_count()
        )?;
        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let inputs: Vec<usize> = self.inputs_of(index).iter().map(|n| n.index()).collect();
            writeln!(
                f,
                "  %{} = {:?}{:?} : {}",
                index.index(),
                node.op,
                inputs,
                node.output.shape
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::DType;

    #[derive(Debug, Clone)]
    enum TestOp {
        Leaf,
        Add,
    }

    fn leaf(shape: Shape) -> Node<TestOp> {
        Node::new(TestOp::Leaf, vec![], Port::new(shape))
    }

    #[test]
    fn test_create_diagram() {
        let diagram: Diagram<TestOp> = Diagram::new();
        assert_eq!(diagram.node_count(), 0);
        assert_eq!(diagram.edge_count(), 0);
    }

    #[test]
    fn test_connect_matching_shapes() {
        let mut diagram: Diagram<TestOp> = Diagram::new();
        let a = diagram.add_node(leaf(Shape::f64_scalar()));
        let b = diagram.add_node(leaf(Shape::f64_scalar()));
        let add = diagram.add_node(Node::new(
            TestOp::Add,
            vec![Port::new(Shape::f64_scalar()), Port::new(Shape::f64_scalar())],
            Port::new(Shape::f64_scalar()),
        ));

        // Wire in reverse port order; inputs_of must still follow port order
        assert!(diagram.connect(b, add, 1).is_ok());
        assert!(diagram.connect(a, add, 0).is_ok());
        assert_eq!(diagram.inputs_of(add), vec![a, b]);
        assert!(diagram.validate().is_ok());
    }

    #[test]
    fn test_connect_mismatched_shapes() {
        let mut diagram: Diagram<TestOp> = Diagram::new();
        let a = diagram.add_node(leaf(Shape::f64_scalar()));
        let add = diagram.add_node(Node::new(
            TestOp::Add,
            vec![Port::new(Shape::vector(DType::Float64, 10))],
            Port::new(Shape::f64_scalar()),
        ));

        let result = diagram.connect(a, add, 0);
        assert!(matches!(result, Err(CoreError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_connect_invalid_port() {
        let mut diagram: Diagram<TestOp> = Diagram::new();
        let a = diagram.add_node(leaf(Shape::f64_scalar()));
        let b = diagram.add_node(leaf(Shape::f64_scalar()));
        let result = diagram.connect(a, b, 0);
        assert_eq!(result, Err(CoreError::InvalidPort { index: 0, count: 0 }));
    }

    #[test]
    fn test_validate_reports_unfed_port() {
        let mut diagram: Diagram<TestOp> = Diagram::new();
        diagram.add_node(Node::new(
            TestOp::Add,
            vec![Port::new(Shape::f64_scalar())],
            Port::new(Shape::f64_scalar()),
        ));
        assert!(matches!(
            diagram.validate(),
            Err(CoreError::ValidationError { .. })
        ));
    }
}
