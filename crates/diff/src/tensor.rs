//! # Runtime Arrays
//!
//! [`Array`] is the concrete value flowing along a wire during evaluation:
//! a dynamically shaped, row-major buffer tagged with a [`DType`].
//!
//! Values are stored as `f64` whatever the tag; the tag decides how casts
//! round and what type downstream shape inference sees. Integer arrays can
//! therefore hold NaN, which the stream bridge uses as its missing-value
//! sentinel.
//!
//! ## Example
//!
//! ```rust
//! use symflow_diff::tensor::Array;
//!
//! let a = Array::matrix(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
//! let b = Array::matrix(2, 2, vec![5.0, 6.0, 7.0, 8.0]);
//! let c = a.matmul(&b).unwrap();
//! assert_eq!(c.data, vec![19.0, 22.0, 43.0, 50.0]);
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use symflow_core::{CoreError, DType, GraphConfig, Shape};

/// A runtime tensor for graph evaluation.
///
/// Equality is bitwise, so NaN-filled arrays compare equal to themselves
/// and constants can be hashed.
#[derive(Clone)]
pub struct Array {
    /// Dimension sizes
    pub shape: Vec<usize>,
    /// Element type tag
    pub dtype: DType,
    /// Flattened data in row-major order
    pub data: Vec<f64>,
}

impl Array {
    /// Create an array filled with zeros.
    pub fn zeros(shape: Vec<usize>, dtype: DType) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape,
            dtype,
            data: vec![0.0; size],
        }
    }

    /// Create an array filled with a constant value.
    pub fn full(shape: Vec<usize>, dtype: DType, value: f64) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape,
            dtype,
            data: vec![dtype.coerce(value); size],
        }
    }

    /// Create a float64 array from data with the given shape.
    pub fn from_shape_vec(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, CoreError> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(CoreError::ShapeMismatch {
                expected: Shape::new(DType::Float64, shape),
                got: Shape::f64_vector(data.len()),
            });
        }
        Ok(Self {
            shape,
            dtype: DType::Float64,
            data,
        })
    }

    /// Create a float64 scalar.
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: vec![],
            dtype: DType::Float64,
            data: vec![value],
        }
    }

    /// Create an int64 scalar, as used for loop indices.
    pub fn index(i: usize) -> Self {
        Self {
            shape: vec![],
            dtype: DType::Int64,
            data: vec![i as f64],
        }
    }

    /// Create a float64 vector.
    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            dtype: DType::Float64,
            data,
        }
    }

    /// Create a float64 matrix.
    ///
    /// Panics if `data` does not hold `rows * cols` elements.
    pub fn matrix(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), rows * cols, "matrix data length");
        Self {
            shape: vec![rows, cols],
            dtype: DType::Float64,
            data,
        }
    }

    /// Re-tag the array and round its values into the new type.
    pub fn astype(&self, dtype: DType) -> Array {
        Array {
            shape: self.shape.clone(),
            dtype,
            data: self.data.iter().map(|&x| dtype.coerce(x)).collect(),
        }
    }

    /// The static type of this value.
    pub fn type_shape(&self) -> Shape {
        Shape::new(self.dtype, self.shape.clone())
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// The single element of a one-element array.
    pub fn as_scalar(&self) -> Option<f64> {
        if self.data.len() == 1 {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_all_nan(&self) -> bool {
        self.data.iter().all(|x| x.is_nan())
    }

    /// An array of the same shape and type filled with NaN.
    pub fn nan_like(&self) -> Array {
        Array {
            shape: self.shape.clone(),
            dtype: self.dtype,
            data: vec![f64::NAN; self.data.len()],
        }
    }

    /// Elementwise closeness within an absolute tolerance.
    pub fn allclose(&self, other: &Array, tolerance: f64) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    /// Bitwise equality, treating NaN payloads as ordinary values.
    pub fn bitwise_eq(&self, other: &Array) -> bool {
        self.shape == other.shape
            && self.dtype == other.dtype
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }

    /// Apply a function to each element.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Array {
        Array {
            shape: self.shape.clone(),
            dtype: self.dtype,
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Combine two arrays elementwise.
    ///
    /// Shapes must match, except that a rank-0 operand broadcasts.
    pub fn zip_with(&self, other: &Array, f: impl Fn(f64, f64) -> f64) -> Result<Array, CoreError> {
        let dtype = self.dtype.promote(other.dtype);
        let (shape, data) = if self.shape == other.shape {
            let data = self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect();
            (self.shape.clone(), data)
        } else if other.is_scalar() {
            let b = other.data[0];
            (self.shape.clone(), self.data.iter().map(|&a| f(a, b)).collect())
        } else if self.is_scalar() {
            let a = self.data[0];
            (other.shape.clone(), other.data.iter().map(|&b| f(a, b)).collect())
        } else {
            return Err(CoreError::ShapeMismatch {
                expected: self.type_shape(),
                got: other.type_shape(),
            });
        };
        Ok(Array { shape, dtype, data })
    }

    /// Sum all elements to a scalar.
    pub fn sum_all(&self) -> Array {
        Array {
            shape: vec![],
            dtype: self.dtype,
            data: vec![self.data.iter().sum()],
        }
    }

    /// Matrix multiplication (2D arrays only).
    pub fn matmul(&self, other: &Array) -> Result<Array, CoreError> {
        if self.shape.len() != 2 || other.shape.len() != 2 || self.shape[1] != other.shape[0] {
            return Err(CoreError::ShapeMismatch {
                expected: self.type_shape(),
                got: other.type_shape(),
            });
        }
        let (m, k, n) = (self.shape[0], self.shape[1], other.shape[1]);

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0;
                for kk in 0..k {
                    sum += self.data[i * k + kk] * other.data[kk * n + j];
                }
                result[i * n + j] = sum;
            }
        }

        Ok(Array {
            shape: vec![m, n],
            dtype: self.dtype.promote(other.dtype),
            data: result,
        })
    }

    /// Transpose a 2D matrix.
    pub fn transpose(&self) -> Result<Array, CoreError> {
        if self.shape.len() != 2 {
            return Err(CoreError::ValidationError {
                reason: format!("transpose requires a matrix, got {}", self.type_shape()),
            });
        }
        let (rows, cols) = (self.shape[0], self.shape[1]);

        let mut result = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }

        Ok(Array {
            shape: vec![cols, rows],
            dtype: self.dtype,
            data: result,
        })
    }

    /// Broadcast a one-element array to a given shape.
    pub fn broadcast_to(&self, shape: Vec<usize>) -> Result<Array, CoreError> {
        match self.as_scalar() {
            Some(value) => {
                let size: usize = shape.iter().product();
                Ok(Array {
                    shape,
                    dtype: self.dtype,
                    data: vec![value; size],
                })
            }
            None => Err(CoreError::ShapeMismatch {
                expected: Shape::new(self.dtype, shape),
                got: self.type_shape(),
            }),
        }
    }

    /// Same data, new dimensions.
    pub fn reshape(&self, shape: Vec<usize>) -> Result<Array, CoreError> {
        let size: usize = shape.iter().product();
        if size != self.data.len() {
            return Err(CoreError::ShapeMismatch {
                expected: Shape::new(self.dtype, shape),
                got: self.type_shape(),
            });
        }
        Ok(Array {
            shape,
            dtype: self.dtype,
            data: self.data.clone(),
        })
    }

    /// Rank-1 view of the data.
    pub fn flatten(&self) -> Array {
        Array {
            shape: vec![self.data.len()],
            dtype: self.dtype,
            data: self.data.clone(),
        }
    }

    /// Split the shape around `axis` into (outer, axis length, inner) extents.
    fn axis_extents(&self, axis: usize) -> Result<(usize, usize, usize), CoreError> {
        if axis >= self.shape.len() {
            return Err(CoreError::ValidationError {
                reason: format!("axis {} out of range for {}", axis, self.type_shape()),
            });
        }
        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();
        Ok((outer, self.shape[axis], inner))
    }

    /// Elements `start..end` along `axis`.
    pub fn slice_axis(&self, axis: usize, start: usize, end: usize) -> Result<Array, CoreError> {
        let (outer, len, inner) = self.axis_extents(axis)?;
        if start > end || end > len {
            return Err(CoreError::ValidationError {
                reason: format!("slice {start}..{end} out of range for axis of length {len}"),
            });
        }
        let mut data = Vec::with_capacity(outer * (end - start) * inner);
        for o in 0..outer {
            let base = o * len * inner;
            data.extend_from_slice(&self.data[base + start * inner..base + end * inner]);
        }
        let mut shape = self.shape.clone();
        shape[axis] = end - start;
        Ok(Array {
            shape,
            dtype: self.dtype,
            data,
        })
    }

    /// Embed this array at `start` along `axis` in zeros of length `len`.
    pub fn pad_axis(&self, axis: usize, start: usize, len: usize) -> Result<Array, CoreError> {
        let (outer, own, inner) = self.axis_extents(axis)?;
        if start + own > len {
            return Err(CoreError::ValidationError {
                reason: format!("cannot place {own} elements at {start} in an axis of length {len}"),
            });
        }
        let mut shape = self.shape.clone();
        shape[axis] = len;
        let mut out = Array::zeros(shape, self.dtype);
        for o in 0..outer {
            let src = o * own * inner;
            let dst = o * len * inner + start * inner;
            out.data[dst..dst + own * inner].copy_from_slice(&self.data[src..src + own * inner]);
        }
        Ok(out)
    }

    /// Concatenate arrays along `axis`; all other dimensions must agree.
    pub fn concat(parts: &[&Array], axis: usize) -> Result<Array, CoreError> {
        let first = parts.first().ok_or_else(|| CoreError::ValidationError {
            reason: "concat of zero arrays".to_string(),
        })?;
        let (outer, _, inner) = first.axis_extents(axis)?;

        let mut dtype = first.dtype;
        let mut total = 0;
        for part in parts {
            let (o, len, i) = part.axis_extents(axis)?;
            let mut expected = first.shape.clone();
            expected[axis] = len;
            if o != outer || i != inner || part.shape != expected {
                return Err(CoreError::ShapeMismatch {
                    expected: Shape::new(first.dtype, expected),
                    got: part.type_shape(),
                });
            }
            dtype = dtype.promote(part.dtype);
            total += len;
        }

        let mut data = Vec::with_capacity(outer * total * inner);
        for o in 0..outer {
            for part in parts {
                let len = part.shape[axis];
                let base = o * len * inner;
                data.extend_from_slice(&part.data[base..base + len * inner]);
            }
        }
        let mut shape = first.shape.clone();
        shape[axis] = total;
        Ok(Array { shape, dtype, data })
    }

    /// Stack equally shaped rows along a new leading axis.
    ///
    /// `row` gives the type of each row so that an empty stack still has a
    /// well-defined shape.
    pub fn stack(rows: &[Array], row: &Shape) -> Result<Array, CoreError> {
        let mut shape = vec![rows.len()];
        shape.extend_from_slice(&row.dims);
        let mut data = Vec::with_capacity(rows.len() * row.numel());
        for r in rows {
            if r.shape != row.dims {
                return Err(CoreError::ShapeMismatch {
                    expected: row.clone(),
                    got: r.type_shape(),
                });
            }
            data.extend_from_slice(&r.data);
        }
        Ok(Array {
            shape,
            dtype: row.dtype,
            data,
        })
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.bitwise_eq(other)
    }
}

impl Eq for Array {}

impl Hash for Array {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shape.hash(state);
        self.dtype.hash(state);
        for x in &self.data {
            x.to_bits().hash(state);
        }
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_scalar() {
            write!(f, "Array({}={})", self.dtype, self.data[0])
        } else {
            write!(f, "Array({}{:?}={:?})", self.dtype, self.shape, self.data)
        }
    }
}

/// Convert a value to the configured float type.
pub fn float_x(value: &Array, config: &GraphConfig) -> Array {
    value.astype(config.float_x)
}

/// Convert float values to the configured float type, leaving discrete
/// values untouched.
pub fn smart_float_x(value: &Array, config: &GraphConfig) -> Array {
    if value.dtype.is_float() {
        float_x(value, config)
    } else {
        value.clone()
    }
}
