//! Layout properties of array orderings.

use proptest::prelude::*;
use symflow_core::{DType, GraphConfig, Shape};
use symflow_diff::{Array, DiffGraph};
use symflow_flat::{ArrayOrdering, DictToArrayBijection, Point};

fn dims_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec(prop::collection::vec(0usize..4, 0..3), 0..6)
}

fn graph_with(dims: &[Vec<usize>]) -> (DiffGraph, Vec<petgraph::graph::NodeIndex>) {
    let mut graph = DiffGraph::new();
    let vars = dims
        .iter()
        .enumerate()
        .map(|(i, d)| graph.variable(&format!("v{i}"), Shape::new(DType::Float64, d.clone())))
        .collect();
    (graph, vars)
}

proptest! {
    #[test]
    fn slices_partition_the_flat_vector(dims in dims_strategy()) {
        let (graph, vars) = graph_with(&dims);
        let ordering = ArrayOrdering::new(&graph, &vars).unwrap();

        let mut cursor = 0;
        for (entry, d) in ordering.iter().zip(&dims) {
            prop_assert_eq!(entry.slice.start, cursor);
            prop_assert_eq!(entry.len(), d.iter().product::<usize>());
            prop_assert_eq!(&entry.dims, d);
            cursor = entry.slice.end;
        }
        prop_assert_eq!(cursor, ordering.size);
        prop_assert_eq!(ordering.len(), dims.len());
    }

    #[test]
    fn rmap_inverts_map(dims in dims_strategy(), seed in -100.0f64..100.0) {
        let (graph, vars) = graph_with(&dims);
        let ordering = ArrayOrdering::new(&graph, &vars).unwrap();
        let bij = DictToArrayBijection::new(ordering, Point::new(), &GraphConfig::default());

        let point: Point = vars
            .iter()
            .zip(&dims)
            .map(|(&var, d)| {
                let n = d.iter().product::<usize>();
                let data = (0..n).map(|k| seed + k as f64).collect();
                (var, Array::from_shape_vec(d.clone(), data).unwrap())
            })
            .collect();

        let flat = bij.map(&point).unwrap();
        prop_assert_eq!(flat.size(), bij.ordering().size);
        prop_assert_eq!(bij.rmap(&flat).unwrap(), point);
    }
}
