//! # Array Ordering
//!
//! An [`ArrayOrdering`] assigns each variable of a list a contiguous region
//! of one flat vector, recording the variable's dimensions and element type
//! so the region can be turned back into a value of the right shape.
//!
//! Regions follow the list order and partition `0..size` with no gaps:
//!
//! ```text
//! vars:   a: [2, 2]     b: []    c: [3]
//! flat:   0 1 2 3   |   4   |   5 6 7      size = 8
//! ```
//!
//! [`DictToArrayBijection`] uses an ordering to convert between a point
//! (`{variable: value}`) and its flat vector.

use std::collections::HashMap;
use std::ops::Range;

use petgraph::graph::NodeIndex;
use symflow_core::{DType, GraphConfig};
use symflow_diff::{Array, DiffGraph};

use crate::error::FlatError;

/// A variable's region of the flat vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarMap {
    pub var: NodeIndex,
    pub name: String,
    pub slice: Range<usize>,
    pub dims: Vec<usize>,
    pub dtype: DType,
}

impl VarMap {
    pub fn len(&self) -> usize {
        self.slice.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slice.is_empty()
    }
}

/// Regions of a flat vector, one per variable, in variable order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArrayOrdering {
    pub vmap: Vec<VarMap>,
    pub size: usize,
}

impl ArrayOrdering {
    /// Lay out `vars` one after another.
    pub fn new(graph: &DiffGraph, vars: &[NodeIndex]) -> Result<Self, FlatError> {
        let mut ordering = ArrayOrdering::default();
        for &var in vars {
            let name = graph.name(var).unwrap_or_default().to_string();
            if ordering.get(var).is_some() {
                return Err(FlatError::DuplicateVariable { name });
            }
            let shape = graph.shape(var)?;
            let end = ordering.size + shape.numel();
            ordering.vmap.push(VarMap {
                var,
                name,
                slice: ordering.size..end,
                dims: shape.dims.clone(),
                dtype: shape.dtype,
            });
            ordering.size = end;
        }
        Ok(ordering)
    }

    /// The region of `var`, if it is part of the ordering.
    pub fn get(&self, var: NodeIndex) -> Option<&VarMap> {
        self.vmap.iter().find(|entry| entry.var == var)
    }

    pub fn len(&self) -> usize {
        self.vmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vmap.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VarMap> {
        self.vmap.iter()
    }

    /// Element type of the flat vector: the promotion of all variable types,
    /// or the configured float type when there are none.
    pub fn dtype(&self, config: &GraphConfig) -> DType {
        self.vmap
            .iter()
            .map(|entry| entry.dtype)
            .reduce(DType::promote)
            .unwrap_or(config.float_x)
    }
}

/// Values of a set of variables.
pub type Point = HashMap<NodeIndex, Array>;

/// Conversion between points and flat vectors for one ordering.
///
/// `rmap` starts from a template point, so variables outside the ordering
/// keep their template values.
#[derive(Debug, Clone)]
pub struct DictToArrayBijection {
    ordering: ArrayOrdering,
    template: Point,
    dtype: DType,
}

impl DictToArrayBijection {
    pub fn new(ordering: ArrayOrdering, template: Point, config: &GraphConfig) -> Self {
        let dtype = ordering.dtype(config);
        Self {
            ordering,
            template,
            dtype,
        }
    }

    pub fn ordering(&self) -> &ArrayOrdering {
        &self.ordering
    }

    /// Flatten the ordered variables of `point` into one vector.
    pub fn map(&self, point: &Point) -> Result<Array, FlatError> {
        let mut flat = Array::zeros(vec![self.ordering.size], self.dtype);
        for entry in self.ordering.iter() {
            let value = point.get(&entry.var).ok_or_else(|| FlatError::MissingValue {
                name: entry.name.clone(),
            })?;
            if value.shape != entry.dims {
                return Err(symflow_core::CoreError::ShapeMismatch {
                    expected: symflow_core::Shape::new(entry.dtype, entry.dims.clone()),
                    got: value.type_shape(),
                }
                .into());
            }
            for (slot, &x) in flat.data[entry.slice.clone()].iter_mut().zip(&value.data) {
                *slot = self.dtype.coerce(x);
            }
        }
        Ok(flat)
    }

    /// Rebuild a point from a flat vector, on top of the template.
    pub fn rmap(&self, flat: &Array) -> Result<Point, FlatError> {
        if flat.shape != [self.ordering.size] {
            return Err(symflow_core::CoreError::ShapeMismatch {
                expected: symflow_core::Shape::vector(self.dtype, self.ordering.size),
                got: flat.type_shape(),
            }
            .into());
        }
        let mut point = self.template.clone();
        for entry in self.ordering.iter() {
            let region = Array {
                shape: entry.dims.clone(),
                dtype: flat.dtype,
                data: flat.data[entry.slice.clone()].to_vec(),
            };
            point.insert(entry.var, region.astype(entry.dtype));
        }
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symflow_core::Shape;

    fn three_vars() -> (DiffGraph, Vec<NodeIndex>) {
        let mut graph = DiffGraph::new();
        let a = graph.variable("a", Shape::f64_matrix(2, 2));
        let b = graph.variable("b", Shape::f64_scalar());
        let c = graph.variable("c", Shape::vector(DType::Int32, 3));
        (graph, vec![a, b, c])
    }

    #[test]
    fn test_regions_follow_list_order() {
        let (graph, vars) = three_vars();
        let ordering = ArrayOrdering::new(&graph, &vars).unwrap();
        assert_eq!(ordering.size, 8);
        let slices: Vec<_> = ordering.iter().map(|e| e.slice.clone()).collect();
        assert_eq!(slices, vec![0..4, 4..5, 5..8]);
        assert_eq!(ordering.get(vars[1]).unwrap().dims, Vec::<usize>::new());
        assert_eq!(ordering.dtype(&GraphConfig::default()), DType::Float64);
    }

    #[test]
    fn test_duplicate_variable() {
        let (graph, vars) = three_vars();
        let result = ArrayOrdering::new(&graph, &[vars[0], vars[0]]);
        assert_eq!(
            result,
            Err(FlatError::DuplicateVariable {
                name: "a".to_string()
            })
        );
    }

    #[test]
    fn test_empty_ordering_uses_float_x() {
        let graph = DiffGraph::new();
        let ordering = ArrayOrdering::new(&graph, &[]).unwrap();
        let config = GraphConfig::default().with_float_x(DType::Float32);
        assert_eq!(ordering.size, 0);
        assert_eq!(ordering.dtype(&config), DType::Float32);
    }

    #[test]
    fn test_bijection_map_rmap() {
        let (graph, vars) = three_vars();
        let ordering = ArrayOrdering::new(&graph, &vars).unwrap();
        let bij = DictToArrayBijection::new(ordering, Point::new(), &GraphConfig::default());

        let point = Point::from([
            (vars[0], Array::matrix(2, 2, vec![1.0, 2.0, 3.0, 4.0])),
            (vars[1], Array::scalar(5.0)),
            (vars[2], Array::vector(vec![6.0, 7.0, 8.0]).astype(DType::Int32)),
        ]);
        let flat = bij.map(&point).unwrap();
        assert_eq!(flat.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);

        let back = bij.rmap(&flat).unwrap();
        assert_eq!(back, point);
    }

    #[test]
    fn test_rmap_keeps_template_values() {
        let (mut graph, vars) = three_vars();
        let other = graph.variable("other", Shape::f64_scalar());
        let ordering = ArrayOrdering::new(&graph, &vars[1..2]).unwrap();
        let template = Point::from([(other, Array::scalar(9.0))]);
        let bij = DictToArrayBijection::new(ordering, template, &GraphConfig::default());

        let back = bij.rmap(&Array::vector(vec![1.0])).unwrap();
        assert_eq!(back[&other].as_scalar(), Some(9.0));
        assert_eq!(back[&vars[1]].as_scalar(), Some(1.0));
        assert!(bij.rmap(&Array::vector(vec![1.0, 2.0])).is_err());
    }

    #[test]
    fn test_map_missing_value() {
        let (graph, vars) = three_vars();
        let ordering = ArrayOrdering::new(&graph, &vars).unwrap();
        let bij = DictToArrayBijection::new(ordering, Point::new(), &GraphConfig::default());
        assert!(matches!(
            bij.map(&Point::new()),
            Err(FlatError::MissingValue { .. })
        ));
    }
}
