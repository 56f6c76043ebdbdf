//! Derivatives of a small expression
//!
//! Run with: cargo run -p symflow-diff --example derivatives
//!
//! This example demonstrates:
//! - Building an expression over a vector variable
//! - Gradient, Jacobian, Hessian and Hessian diagonal as new graph nodes
//! - Memoization: asking twice returns the same node

use symflow_core::Shape;
use symflow_diff::derivatives::{gradient, hessian, hessian_diag, jacobian};
use symflow_diff::{Array, DerivativeCache, DiffGraph, Givens};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Derivatives ===\n");

    let mut graph = DiffGraph::new();
    let mut cache = DerivativeCache::new();

    // f(x) = sum(x * x * x)
    let x = graph.variable("x", Shape::f64_vector(2));
    let x2 = graph.mul(x, x)?;
    let x3 = graph.mul(x2, x)?;
    let f = graph.sum_all(x3)?;

    let g = gradient(&mut graph, &mut cache, f, None)?;
    let j = jacobian(&mut graph, &mut cache, x2, None)?;
    let h = hessian(&mut graph, &mut cache, f, None)?;
    let hd = hessian_diag(&mut graph, &mut cache, f, None)?;

    let givens = Givens::from([(x, Array::vector(vec![1.0, 2.0]))]);
    let values = graph.eval(&[f, g, j, h, hd], &givens)?;

    println!("x             = [1, 2]");
    println!("f             = {:?}", values[0].data);
    println!("gradient      = {:?}   (3x²)", values[1].data);
    println!("jacobian(x²)  = {:?}   (diag(2x))", values[2].data);
    println!("hessian       = {:?}   (-diag(6x))", values[3].data);
    println!("hessian_diag  = {:?}   (-6x)", values[4].data);
    println!();

    let again = hessian(&mut graph, &mut cache, f, None)?;
    println!("hessian asked twice gives the same node: {}", again == h);
    println!("cache entries: {}, hits: {}", cache.len(), cache.hits());
    println!("graph size: {} nodes", graph.node_count());

    Ok(())
}
