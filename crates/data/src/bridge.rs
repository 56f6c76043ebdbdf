//! # Stream-to-Node Bridge
//!
//! [`GeneratorOp`] turns a [`DataGenerator`] into an [`ExternalSource`], so a
//! stream of arrays can feed a zero-input graph node. Every full evaluation
//! of the graph takes the next element.
//!
//! When the stream runs out, the node keeps producing an array of the last
//! produced shape filled with NaN. Consumers detect the end of the stream by
//! inspecting values:
//!
//! ```text
//! stream:   a     b     (end)
//! advance:  a  →  b  →  NaN  →  NaN  → ...
//! ```
//!
//! ## Example
//!
//! ```rust
//! use symflow_data::{generator, DataGenerator};
//! use symflow_diff::{Array, DiffGraph, Givens};
//!
//! let mut graph = DiffGraph::new();
//! let gen = DataGenerator::new(
//!     vec![Array::scalar(1.0), Array::scalar(2.0)],
//!     graph.config(),
//! )
//! .unwrap();
//! let data = generator(&mut graph, gen).unwrap();
//! let doubled = graph.add(data.node(), data.node()).unwrap();
//!
//! assert_eq!(graph.eval(&[doubled], &Givens::new()).unwrap()[0].as_scalar(), Some(2.0));
//! assert_eq!(graph.eval(&[doubled], &Givens::new()).unwrap()[0].as_scalar(), Some(4.0));
//! assert!(graph.eval(&[doubled], &Givens::new()).unwrap()[0].is_all_nan());
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use petgraph::graph::NodeIndex;
use symflow_core::{Shape, TestValueMode};
use symflow_diff::{Array, DiffGraph, ExternalSource, SourceHandle};
use tracing::debug;

use crate::error::DataError;
use crate::generator::DataGenerator;

#[derive(Debug)]
struct Cursor {
    generator: DataGenerator,
    last_dims: Vec<usize>,
    exhausted: bool,
}

impl Cursor {
    fn new(generator: DataGenerator) -> Self {
        let last_dims = generator.tensor_type().dims.clone();
        Self {
            generator,
            last_dims,
            exhausted: false,
        }
    }
}

/// A graph source reading from a [`DataGenerator`].
#[derive(Debug)]
pub struct GeneratorOp {
    cursor: Mutex<Cursor>,
}

impl GeneratorOp {
    pub fn new(generator: DataGenerator) -> Self {
        Self {
            cursor: Mutex::new(Cursor::new(generator)),
        }
    }

    /// Replace the underlying stream.
    ///
    /// The new stream must declare the same type as the current one;
    /// otherwise the current stream is kept and an error is returned.
    pub fn set_gen(&self, generator: DataGenerator) -> Result<(), DataError> {
        let mut cursor = self.cursor.lock();
        let expected = cursor.generator.tensor_type();
        if generator.tensor_type() != expected {
            return Err(DataError::TypeMismatch {
                expected: expected.clone(),
                got: generator.tensor_type().clone(),
            });
        }
        *cursor = Cursor::new(generator);
        debug!(tensor_type = %cursor.generator.tensor_type(), "rebound stream");
        Ok(())
    }
}

impl ExternalSource for GeneratorOp {
    fn output_shape(&self) -> Shape {
        self.cursor.lock().generator.tensor_type().clone()
    }

    fn advance(&self) -> Array {
        let mut cursor = self.cursor.lock();
        match cursor.generator.next() {
            Some(value) => {
                cursor.last_dims = value.shape.clone();
                value
            }
            None => {
                if !cursor.exhausted {
                    debug!(dims = ?cursor.last_dims, "stream exhausted");
                    cursor.exhausted = true;
                }
                let dtype = cursor.generator.tensor_type().dtype;
                Array::full(cursor.last_dims.clone(), dtype, f64::NAN)
            }
        }
    }

    fn sample(&self) -> Array {
        self.cursor.lock().generator.test_value().clone()
    }
}

/// A graph node fed by a stream, with a handle to rebind the stream.
#[derive(Debug, Clone)]
pub struct GeneratorNode {
    node: NodeIndex,
    op: Arc<GeneratorOp>,
}

impl GeneratorNode {
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    pub fn op(&self) -> &GeneratorOp {
        &self.op
    }

    /// Replace the stream feeding this node; see [`GeneratorOp::set_gen`].
    pub fn set_gen(&self, generator: DataGenerator) -> Result<(), DataError> {
        self.op.set_gen(generator)
    }
}

/// Add a node to `graph` that reads from `generator`.
///
/// Building the node never consumes from the stream: eager test values are
/// switched off while the node is added, and its test value is the
/// generator's sample.
pub fn generator(graph: &mut DiffGraph, generator: DataGenerator) -> Result<GeneratorNode, DataError> {
    let op = Arc::new(GeneratorOp::new(generator));
    let sample = op.sample();

    let mut scope = graph.scoped(|config| config.compute_test_value = TestValueMode::Off);
    let node = scope.add_source(SourceHandle::new(op.clone()));
    scope.set_test_value(node, sample)?;
    drop(scope);

    debug!(node = node.index(), tensor_type = %op.output_shape(), "added stream node");
    Ok(GeneratorNode { node, op })
}
