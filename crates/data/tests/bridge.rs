//! Stream nodes inside graphs.

use symflow_core::{DType, GraphConfig, Shape, TestValueMode};
use symflow_data::{generator, DataError, DataGenerator, GeneratorOp};
use symflow_diff::optimize::fold_constants;
use symflow_diff::{Array, DiffGraph, DiffOp, ExternalSource, Givens};

fn stream(items: Vec<Array>) -> DataGenerator {
    DataGenerator::new(items, &GraphConfig::default()).unwrap()
}

// ============================================================================
// Exhaustion and rebinding
// ============================================================================

#[test]
fn finite_stream_then_sustained_sentinel() {
    let a = Array::matrix(1, 2, vec![1.0, 2.0]);
    let b = Array::matrix(1, 2, vec![3.0, 4.0]);
    let op = GeneratorOp::new(stream(vec![a.clone(), b.clone()]));

    assert_eq!(op.advance(), a);
    assert_eq!(op.advance(), b);

    let third = op.advance();
    assert_eq!(third.shape, a.shape);
    assert!(third.is_all_nan());

    let fourth = op.advance();
    assert_eq!(fourth.shape, a.shape);
    assert!(fourth.is_all_nan());
}

#[test]
fn rebind_with_other_shape_keeps_prior_source() {
    let mut graph = DiffGraph::new();
    let items = vec![Array::vector(vec![1.0, 2.0]), Array::vector(vec![3.0, 4.0])];
    let data = generator(&mut graph, stream(items)).unwrap();

    let wider = stream(vec![Array::vector(vec![0.0, 0.0, 0.0])]);
    let result = data.set_gen(wider);
    assert_eq!(
        result,
        Err(DataError::TypeMismatch {
            expected: Shape::f64_vector(2),
            got: Shape::f64_vector(3),
        })
    );

    let out = graph.eval(&[data.node()], &Givens::new()).unwrap();
    assert_eq!(out[0].data, vec![1.0, 2.0]);
    let out = graph.eval(&[data.node()], &Givens::new()).unwrap();
    assert_eq!(out[0].data, vec![3.0, 4.0]);
}

#[test]
fn rebind_with_same_type_feeds_new_stream() {
    let mut graph = DiffGraph::new();
    let data = generator(&mut graph, stream(vec![Array::scalar(1.0)])).unwrap();
    let y = graph.exp(data.node()).unwrap();

    data.set_gen(stream(vec![Array::scalar(0.0)])).unwrap();
    assert_eq!(graph.eval(&[y], &Givens::new()).unwrap()[0].as_scalar(), Some(1.0));
}

// ============================================================================
// Graph construction and rewriting
// ============================================================================

#[test]
fn construction_does_not_consume_in_eager_graph() {
    let mut graph = DiffGraph::with_config(GraphConfig::default().with_test_values(TestValueMode::Eager));
    let items = vec![Array::scalar(10.0), Array::scalar(20.0)];
    let data = generator(&mut graph, stream(items)).unwrap();

    assert_eq!(graph.config().compute_test_value, TestValueMode::Eager);
    assert_eq!(graph.test_value(data.node()).unwrap().as_scalar(), Some(10.0));

    // Eager test values downstream are computed from the sample
    let y = graph.add(data.node(), data.node()).unwrap();
    assert_eq!(graph.test_value(y).unwrap().as_scalar(), Some(20.0));

    let out = graph.eval(&[data.node()], &Givens::new()).unwrap();
    assert_eq!(out[0].as_scalar(), Some(10.0));
}

#[test]
fn preview_uses_sample() {
    let mut graph = DiffGraph::new();
    let items = vec![Array::scalar(1.0), Array::scalar(2.0)];
    let data = generator(&mut graph, stream(items)).unwrap();
    let y = graph.neg(data.node()).unwrap();

    for _ in 0..3 {
        assert_eq!(graph.preview(y).unwrap().as_scalar(), Some(-1.0));
    }
    assert_eq!(graph.eval(&[y], &Givens::new()).unwrap()[0].as_scalar(), Some(-1.0));
    assert_eq!(graph.eval(&[y], &Givens::new()).unwrap()[0].as_scalar(), Some(-2.0));
}

#[test]
fn constant_folding_keeps_stream_node() {
    let mut graph = DiffGraph::new();
    let data = generator(&mut graph, stream(vec![Array::scalar(1.0), Array::scalar(2.0)])).unwrap();
    let two = graph.scalar_constant(2.0);
    let three = graph.scalar_constant(3.0);
    let five = graph.add(two, three).unwrap();
    let y = graph.mul(data.node(), five).unwrap();

    let folded = fold_constants(&mut graph, &[y]).unwrap();
    let inputs = graph.inputs_of(folded[0]);
    assert_eq!(inputs[0], data.node());
    assert!(matches!(graph.op(inputs[1]).unwrap(), DiffOp::Const { .. }));

    let out = graph.eval(&folded, &Givens::new()).unwrap();
    assert_eq!(out[0].as_scalar(), Some(5.0));
}

#[test]
fn float_x_applies_to_stream_elements() {
    let config = GraphConfig::default().with_float_x(DType::Float32);
    let mut graph = DiffGraph::with_config(config.clone());
    let items = vec![Array::vector(vec![0.5, 1.5])];
    let data = generator(&mut graph, DataGenerator::new(items, &config).unwrap()).unwrap();

    assert_eq!(graph.shape(data.node()).unwrap(), &Shape::vector(DType::Float32, 2));
    let out = graph.eval(&[data.node()], &Givens::new()).unwrap();
    assert_eq!(out[0].dtype, DType::Float32);
    assert!(graph.eval(&[data.node()], &Givens::new()).unwrap()[0].is_all_nan());
}
