//! Feeding a stream of batches into a graph
//!
//! Run with: cargo run -p symflow-data --example streaming
//!
//! This example demonstrates:
//! - Wrapping an iterator as a graph node
//! - One element per evaluation, NaN once the stream is exhausted
//! - Rebinding the node to a new stream of the same type

use symflow_data::{generator, DataGenerator};
use symflow_diff::{Array, DiffGraph, Givens};

fn batches(offset: f64) -> Vec<Array> {
    (0..3)
        .map(|i| Array::vector(vec![offset + i as f64, offset + i as f64 + 0.5]))
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Streaming ===\n");

    let mut graph = DiffGraph::new();
    let stream = DataGenerator::new(batches(0.0), graph.config())?;
    let data = generator(&mut graph, stream)?;
    let total = graph.sum_all(data.node())?;

    println!("preview: {:?}", graph.preview(total)?.data);
    for step in 0..5 {
        let value = &graph.eval(&[total], &Givens::new())?[0];
        let note = if value.is_all_nan() { "  (exhausted)" } else { "" };
        println!("step {step}: {:?}{note}", value.data);
    }

    data.set_gen(DataGenerator::new(batches(10.0), graph.config())?)?;
    println!("\nrebound");
    let value = &graph.eval(&[total], &Givens::new())?[0];
    println!("step 0: {:?}", value.data);

    Ok(())
}
