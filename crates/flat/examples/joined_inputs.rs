//! Reading many variables from one flat vector
//!
//! Run with: cargo run -p symflow-flat --example joined_inputs
//!
//! This example demonstrates:
//! - Laying out variables of different shapes in one vector
//! - Rewriting a cost so it reads from that vector
//! - Freezing a variable as a shared placeholder

use symflow_core::Shape;
use symflow_diff::derivatives::gradient;
use symflow_diff::{Array, DerivativeCache, DiffGraph, Givens};
use symflow_flat::{join_nonshared_inputs, make_shared_replacements, ArrayOrdering};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Joined Inputs ===\n");

    let mut graph = DiffGraph::new();
    let w = graph.variable("w", Shape::f64_matrix(2, 2));
    let b = graph.variable("b", Shape::f64_scalar());
    let scale = graph.variable("scale", Shape::f64_scalar());
    graph.set_test_value(w, Array::matrix(2, 2, vec![1.0, 0.0, 0.0, 1.0]))?;
    graph.set_test_value(b, Array::scalar(0.5))?;
    graph.set_test_value(scale, Array::scalar(2.0))?;

    // cost = scale * (sum(w) + b)
    let sw = graph.sum_all(w)?;
    let inner = graph.add(sw, b)?;
    let cost = graph.mul(scale, inner)?;

    let ordering = ArrayOrdering::new(&graph, &[w, b])?;
    for entry in ordering.iter() {
        println!("{:>6}: slice {:?}, dims {:?}", entry.name, entry.slice, entry.dims);
    }
    println!("  size: {}\n", ordering.size);

    let model = vec![w, b, scale];
    let frozen = make_shared_replacements(&mut graph, &[w, b], &model)?;
    let (out, inarray) = join_nonshared_inputs(&mut graph, &[cost], &[w, b], &frozen, false)?;

    let mut cache = DerivativeCache::new();
    let g = gradient(&mut graph, &mut cache, out[0], Some(&[inarray][..]))?;

    let point = Array::vector(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    let values = graph.eval(&[out[0], g], &Givens::from([(inarray, point)]))?;
    println!("inarray  = [1, 2, 3, 4, 5]");
    println!("cost     = {:?}", values[0].data);
    println!("gradient = {:?}", values[1].data);

    Ok(())
}
