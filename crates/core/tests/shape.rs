//! Shape and element type behaviour.

use symflow_core::{DType, Shape, CONTINUOUS_TYPES, DISCRETE_TYPES};

// ============================================================================
// Element types
// ============================================================================

#[test]
fn continuous_and_discrete_types_are_disjoint() {
    for dtype in CONTINUOUS_TYPES {
        assert!(dtype.is_float());
        assert!(!DISCRETE_TYPES.contains(dtype));
    }
    for dtype in DISCRETE_TYPES {
        assert!(dtype.is_discrete());
    }
}

#[test]
fn promotion_picks_the_wider_type() {
    assert_eq!(DType::Int32.promote(DType::Float32), DType::Float32);
    assert_eq!(DType::Float64.promote(DType::Float32), DType::Float64);
    assert_eq!(DType::Bool.promote(DType::Int8), DType::Int8);
    assert_eq!(DType::Int64.promote(DType::Int64), DType::Int64);
}

#[test]
fn coercion_truncates_integers_and_keeps_nan() {
    assert_eq!(DType::Int32.coerce(3.7), 3.0);
    assert_eq!(DType::Int32.coerce(-3.7), -3.0);
    assert_eq!(DType::Bool.coerce(0.2), 1.0);
    assert_eq!(DType::Float64.coerce(0.25), 0.25);
    assert!(DType::Int64.coerce(f64::NAN).is_nan());
}

#[test]
fn dtype_names_parse_back() {
    for dtype in CONTINUOUS_TYPES.iter().chain(DISCRETE_TYPES) {
        assert_eq!(dtype.name().parse::<DType>().unwrap(), *dtype);
    }
    assert!("complex128".parse::<DType>().is_err());
}

// ============================================================================
// Shapes
// ============================================================================

#[test]
fn shape_properties() {
    let m = Shape::f64_matrix(3, 4);
    assert_eq!(m.rank(), 2);
    assert_eq!(m.numel(), 12);
    assert_eq!(m.flattened(), Shape::f64_vector(12));
    assert_eq!(m.with_dtype(DType::Int32), Shape::matrix(DType::Int32, 3, 4));
    assert_eq!(m.to_string(), "float64[3, 4]");
}

#[test]
fn zero_sized_shapes() {
    let empty = Shape::vector(DType::Float32, 0);
    assert_eq!(empty.numel(), 0);
    assert!(!empty.is_scalar());
    assert_eq!(Shape::f64_scalar().numel(), 1);
}

#[test]
fn compatibility_requires_equal_dtype_and_dims() {
    let a = Shape::f64_vector(10);
    assert!(a.is_compatible(&Shape::f64_vector(10)));
    assert!(!a.is_compatible(&Shape::f64_vector(20)));
    assert!(!a.is_compatible(&Shape::vector(DType::Float32, 10)));
}
