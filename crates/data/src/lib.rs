//! # Data - Streams as Graph Inputs
//!
//! Feeds external data into a [`DiffGraph`](symflow_diff::DiffGraph):
//!
//! - [`generator`](mod@generator): [`DataGenerator`], an iterator of arrays with a fixed
//!   element type and a sample value
//! - [`bridge`]: [`GeneratorOp`], the stream source behind a graph node, and
//!   the [`generator()`] builder
//!
//! A stream node takes one element per full evaluation. Preview evaluation
//! and constant folding never consume from it.

pub mod bridge;
pub mod error;
pub mod generator;

pub use bridge::{generator, GeneratorNode, GeneratorOp};
pub use error::DataError;
pub use generator::DataGenerator;
