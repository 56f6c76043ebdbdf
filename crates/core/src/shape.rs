//! # Shapes and Element Types
//!
//! Every wire in a symflow graph carries a [`Shape`]: an element type
//! ([`DType`]) plus static dimension sizes. Shapes must match exactly for a
//! substitution or a connection to be valid.
//!
//! ## Design Choices
//!
//! Shapes are checked at runtime (`Vec<usize>`) rather than at compile time,
//! because graphs are assembled dynamically and rewritten after construction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Element type of a tensor.
///
/// Variants are ordered from narrowest to widest; [`DType::promote`] picks the
/// wider of two types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

/// Element types treated as continuous (differentiable).
pub const CONTINUOUS_TYPES: &[DType] = &[DType::Float32, DType::Float64];

/// Element types treated as discrete.
pub const DISCRETE_TYPES: &[DType] = &[
    DType::Bool,
    DType::Int8,
    DType::Int16,
    DType::Int32,
    DType::Int64,
];

impl DType {
    /// Canonical lowercase name, e.g. `"float32"`.
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    pub fn is_float(self) -> bool {
        CONTINUOUS_TYPES.contains(&self)
    }

    pub fn is_discrete(self) -> bool {
        DISCRETE_TYPES.contains(&self)
    }

    /// The result type of a binary operation on `self` and `other`.
    pub fn promote(self, other: DType) -> DType {
        self.max(other)
    }

    /// Round a value into the representable range of this type.
    ///
    /// Floats pass through; integers truncate toward zero; booleans become 0/1.
    /// NaN is preserved so that missing-value sentinels survive a cast.
    pub fn coerce(self, value: f64) -> f64 {
        if value.is_nan() {
            return value;
        }
        match self {
            DType::Bool => {
                if value != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64 => value.trunc(),
            DType::Float32 => value as f32 as f64,
            DType::Float64 => value,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(DType::Bool),
            "int8" => Ok(DType::Int8),
            "int16" => Ok(DType::Int16),
            "int32" => Ok(DType::Int32),
            "int64" => Ok(DType::Int64),
            "float32" => Ok(DType::Float32),
            "float64" => Ok(DType::Float64),
            other => Err(CoreError::Config {
                reason: format!("unknown dtype `{other}`"),
            }),
        }
    }
}

/// A shape describes the element type and dimensions of a tensor.
///
/// This is an "object" in the categorical sense: operations have input and
/// output shapes, and wiring is only valid when they agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    /// Element type
    pub dtype: DType,
    /// Dimension sizes (empty = scalar, [n] = vector, [m,n] = matrix, etc.)
    pub dims: Vec<usize>,
}

impl Shape {
    pub fn new(dtype: DType, dims: Vec<usize>) -> Self {
        Self { dtype, dims }
    }

    /// A 0-dimensional shape.
    pub fn scalar(dtype: DType) -> Self {
        Self { dtype, dims: vec![] }
    }

    pub fn vector(dtype: DType, len: usize) -> Self {
        Self {
            dtype,
            dims: vec![len],
        }
    }

    pub fn matrix(dtype: DType, rows: usize, cols: usize) -> Self {
        Self {
            dtype,
            dims: vec![rows, cols],
        }
    }

    /// Convenience: float64 scalar
    pub fn f64_scalar() -> Self {
        Self::scalar(DType::Float64)
    }

    /// Convenience: float64 vector
    pub fn f64_vector(len: usize) -> Self {
        Self::vector(DType::Float64, len)
    }

    /// Convenience: float64 matrix
    pub fn f64_matrix(rows: usize, cols: usize) -> Self {
        Self::matrix(DType::Float64, rows, cols)
    }

    /// Number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// True for rank-0 shapes.
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// The same dimensions with another element type.
    pub fn with_dtype(&self, dtype: DType) -> Shape {
        Shape {
            dtype,
            dims: self.dims.clone(),
        }
    }

    /// The flattened (rank-1) version of this shape.
    pub fn flattened(&self) -> Shape {
        Shape::vector(self.dtype, self.numel())
    }

    /// Check if a value of shape `other` can stand in for `self`.
    pub fn is_compatible(&self, other: &Shape) -> bool {
        self == other
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]",
            self.dtype,
            self.dims
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}
