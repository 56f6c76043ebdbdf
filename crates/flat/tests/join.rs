//! Joining variables into one flat input, evaluated end to end.

use symflow_core::{DType, Shape};
use symflow_diff::derivatives::{gradient, DerivativeCache};
use symflow_diff::{Array, DiffGraph, Givens, Replacements};
use symflow_flat::{join_nonshared_inputs, make_shared_replacements, FlatError};

// ============================================================================
// Round trip
// ============================================================================

#[test]
fn joined_sum_matches_direct_evaluation() {
    let mut graph = DiffGraph::new();
    let v1 = graph.variable("v1", Shape::f64_matrix(2, 2));
    let v2 = graph.variable("v2", Shape::f64_matrix(2, 2));
    let v1_value = Array::matrix(2, 2, vec![1.0, -2.0, 3.5, 0.25]);
    let v2_value = Array::matrix(2, 2, vec![10.0, 20.0, 30.0, 40.0]);
    graph.set_test_value(v1, v1_value.clone()).unwrap();
    graph.set_test_value(v2, v2_value.clone()).unwrap();
    let sum = graph.add(v1, v2).unwrap();

    let direct = graph
        .eval(&[sum], &Givens::from([(v1, v1_value.clone()), (v2, v2_value.clone())]))
        .unwrap();

    let (out, inarray) =
        join_nonshared_inputs(&mut graph, &[sum], &[v1, v2], &Replacements::new(), false)
            .unwrap();
    let flat = Array::concat(&[&v1_value.flatten(), &v2_value.flatten()], 0).unwrap();
    assert_eq!(graph.test_value(inarray).unwrap(), flat);

    let joined = graph.eval(&out, &Givens::from([(inarray, flat)])).unwrap();
    assert_eq!(joined, direct);
}

#[test]
fn variable_absent_from_expression_is_not_an_error() {
    let mut graph = DiffGraph::new();
    let x = graph.variable("x", Shape::f64_scalar());
    let unused = graph.variable("unused", Shape::f64_vector(2));
    graph.set_test_value(x, Array::scalar(3.0)).unwrap();
    graph.set_test_value(unused, Array::vector(vec![0.0, 0.0])).unwrap();
    let y = graph.mul(x, x).unwrap();

    let (out, inarray) =
        join_nonshared_inputs(&mut graph, &[y], &[unused, x], &Replacements::new(), false)
            .unwrap();
    let givens = Givens::from([(inarray, Array::vector(vec![5.0, 5.0, 4.0]))]);
    assert_eq!(graph.eval(&out, &givens).unwrap()[0].as_scalar(), Some(16.0));
}

#[test]
fn empty_vars_give_empty_float_x_input() {
    let mut graph = DiffGraph::new();
    graph.config_mut().float_x = DType::Float32;
    let c = graph.scalar_constant(2.0);

    let (out, inarray) =
        join_nonshared_inputs(&mut graph, &[c], &[], &Replacements::new(), false).unwrap();
    assert_eq!(graph.shape(inarray).unwrap(), &Shape::vector(DType::Float32, 0));
    assert_eq!(out, vec![c]);
}

// ============================================================================
// Frozen variables
// ============================================================================

#[test]
fn shared_replacements_freeze_other_variables() {
    let mut graph = DiffGraph::new();
    let mu = graph.variable("mu", Shape::f64_scalar());
    let sigma = graph.variable("sigma", Shape::f64_scalar());
    graph.set_test_value(mu, Array::scalar(1.0)).unwrap();
    graph.set_test_value(sigma, Array::scalar(2.0)).unwrap();
    let f = graph.mul(mu, sigma).unwrap();

    let model = vec![mu, sigma];
    let shared = make_shared_replacements(&mut graph, &[mu], &model).unwrap();
    let (out, inarray) = join_nonshared_inputs(&mut graph, &[f], &[mu], &shared, false).unwrap();

    let givens = Givens::from([(inarray, Array::vector(vec![3.0]))]);
    assert_eq!(graph.eval(&out, &givens).unwrap()[0].as_scalar(), Some(6.0));

    let collision = join_nonshared_inputs(&mut graph, &[f], &[sigma], &shared, false);
    assert!(matches!(collision, Err(FlatError::SharedCollision { .. })));
}

#[test]
fn gradient_through_joined_input() {
    let mut graph = DiffGraph::new();
    let a = graph.variable("a", Shape::f64_scalar());
    let b = graph.variable("b", Shape::f64_vector(2));
    graph.set_test_value(a, Array::scalar(1.0)).unwrap();
    graph.set_test_value(b, Array::vector(vec![1.0, 1.0])).unwrap();
    let ab = graph.mul(a, b).unwrap();
    let f = graph.sum_all(ab).unwrap();

    let (out, inarray) =
        join_nonshared_inputs(&mut graph, &[f], &[a, b], &Replacements::new(), false).unwrap();
    let mut cache = DerivativeCache::new();
    let g = gradient(&mut graph, &mut cache, out[0], Some(&[inarray][..])).unwrap();

    // f = a * (b0 + b1): [b0 + b1, a, a]
    let givens = Givens::from([(inarray, Array::vector(vec![2.0, 3.0, 4.0]))]);
    assert_eq!(graph.eval(&[g], &givens).unwrap()[0].data, vec![7.0, 2.0, 2.0]);
}
