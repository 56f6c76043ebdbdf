//! # Differentiable Operations
//!
//! This module defines `DiffOp`, the set of operations a
//! [`DiffGraph`](crate::graph::DiffGraph) node can perform. Each operation
//! knows how to:
//!
//! - Infer its output type from its input types
//! - Execute forward (compute the output from input values)
//!
//! Reverse-mode rules live in [`crate::backward`], because they emit new
//! graph nodes rather than numbers.
//!
//! ## Operations
//!
//! | Op | Forward | Backward |
//! |----|---------|----------|
//! | Add | a + b | grad flows to both |
//! | Mul | a * b | grad * other operand |
//! | MatMul | A @ B | ∂L/∂A = grad @ Bᵀ |
//! | SumAll | sum(x) | fill grad to x's shape |
//! | Slice | x[start..end] | pad grad with zeros |
//! | Take | x.flat[i] | scatter grad to position i |
//! | Identity | x | grad unchanged |
//! | Map | stack(body(i) for i) | not differentiable |

use std::fmt;

use petgraph::graph::NodeIndex;
use symflow_core::{CoreError, DType, Shape};

use crate::error::GraphError;
use crate::source::{SharedValue, SourceHandle};
use crate::tensor::Array;

/// Differentiable operations for computation graphs.
///
/// Equality and hashing are structural: constants compare by bit pattern,
/// shared and source leaves by storage identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DiffOp {
    /// Free input, bound at evaluation time
    Variable { name: String },

    /// Constant-holding placeholder whose storage can be updated externally
    Shared { name: String, value: SharedValue },

    /// Literal value
    Const { value: Array },

    /// Zero-input node fed by an external stream
    Source { source: SourceHandle },

    /// The iteration index of the enclosing `Map`
    LoopIndex,

    /// Element-wise addition: a + b
    Add,

    /// Element-wise subtraction: a - b
    Sub,

    /// Element-wise multiplication: a * b
    Mul,

    /// Element-wise division: a / b
    Div,

    /// Element-wise negation
    Neg,

    /// Element-wise exponential
    Exp,

    /// Element-wise natural logarithm
    Log,

    /// Pass-through
    Identity,

    /// Matrix multiplication: A @ B
    MatMul,

    /// Matrix transpose
    Transpose,

    /// Sum all elements to a scalar
    SumAll,

    /// Broadcast a one-element value to `shape`
    Fill { shape: Vec<usize> },

    /// Same elements, new dimensions
    Reshape { dims: Vec<usize> },

    /// Element type conversion
    Cast { dtype: DType },

    /// Elements `start..end` along `axis`
    Slice { axis: usize, start: usize, end: usize },

    /// Embed at `start` along `axis` in zeros of length `len`
    Pad { axis: usize, start: usize, len: usize },

    /// Concatenation along `axis`
    Concat { axis: usize },

    /// Flat element of input 0 at the runtime index given by input 1
    Take,

    /// Length-`len` zero vector holding input 0 at the index given by input 1
    Scatter { len: usize },

    /// Evaluate `body` once per leading element of the input, with `index`
    /// bound to the iteration number, and stack the results
    Map { index: NodeIndex, body: NodeIndex },
}

/// Output dtype of operations that only make sense on floats.
fn float_of(dtype: DType) -> DType {
    if dtype.is_float() {
        dtype
    } else {
        DType::Float64
    }
}

fn invalid(op: &DiffOp, reason: impl Into<String>) -> GraphError {
    GraphError::InvalidOp {
        op: op.to_string(),
        reason: reason.into(),
    }
}

fn mismatch(expected: &Shape, got: &Shape) -> GraphError {
    GraphError::Core(CoreError::ShapeMismatch {
        expected: expected.clone(),
        got: got.clone(),
    })
}

/// Check an axis and return its length.
fn axis_len(op: &DiffOp, shape: &Shape, axis: usize) -> Result<usize, GraphError> {
    shape
        .dims
        .get(axis)
        .copied()
        .ok_or_else(|| invalid(op, format!("axis {} out of range for {}", axis, shape)))
}

impl DiffOp {
    /// Whether this operation takes no inputs.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            DiffOp::Variable { .. }
                | DiffOp::Shared { .. }
                | DiffOp::Const { .. }
                | DiffOp::Source { .. }
                | DiffOp::LoopIndex
        )
    }

    /// Number of inputs this operation expects, if fixed.
    pub fn arity(&self) -> Option<usize> {
        match self {
            op if op.is_leaf() => Some(0),
            DiffOp::Add
            | DiffOp::Sub
            | DiffOp::Mul
            | DiffOp::Div
            | DiffOp::MatMul
            | DiffOp::Take
            | DiffOp::Scatter { .. } => Some(2),
            DiffOp::Concat { .. } => None,
            _ => Some(1),
        }
    }

    /// Whether a constant-folding pass may evaluate this node ahead of time.
    pub fn do_constant_folding(&self) -> bool {
        match self {
            DiffOp::Source { source } => source.source().do_constant_folding(),
            DiffOp::Variable { .. } | DiffOp::Shared { .. } | DiffOp::LoopIndex => false,
            DiffOp::Map { .. } => false,
            _ => true,
        }
    }

    /// Nodes referenced by this operation outside its input wires.
    pub fn inner_nodes(&self) -> Vec<NodeIndex> {
        match self {
            DiffOp::Map { body, .. } => vec![*body],
            _ => vec![],
        }
    }

    /// Infer the output type from the input types.
    ///
    /// Leaves carry their own type; `Variable` and `Map` are typed by the
    /// graph builder and are rejected here.
    pub fn infer_shape(&self, inputs: &[Shape]) -> Result<Shape, GraphError> {
        if let Some(arity) = self.arity() {
            if inputs.len() != arity {
                return Err(invalid(
                    self,
                    format!("expected {} inputs, got {}", arity, inputs.len()),
                ));
            }
        }

        match self {
            DiffOp::Const { value } => Ok(value.type_shape()),
            DiffOp::Shared { value, .. } => Ok(value.shape()),
            DiffOp::Source { source } => Ok(source.source().output_shape()),
            DiffOp::LoopIndex => Ok(Shape::scalar(DType::Int64)),
            DiffOp::Variable { .. } | DiffOp::Map { .. } => {
                Err(invalid(self, "type is assigned by the graph builder"))
            }

            DiffOp::Add | DiffOp::Sub | DiffOp::Mul | DiffOp::Div => {
                let (a, b) = (&inputs[0], &inputs[1]);
                let dims = if a.dims == b.dims || b.is_scalar() {
                    a.dims.clone()
                } else if a.is_scalar() {
                    b.dims.clone()
                } else {
                    return Err(mismatch(a, b));
                };
                let mut dtype = a.dtype.promote(b.dtype);
                if matches!(self, DiffOp::Div) {
                    dtype = float_of(dtype);
                }
                Ok(Shape::new(dtype, dims))
            }

            DiffOp::Neg | DiffOp::Identity => Ok(inputs[0].clone()),

            DiffOp::Exp | DiffOp::Log => {
                let x = &inputs[0];
                Ok(x.with_dtype(float_of(x.dtype)))
            }

            DiffOp::MatMul => {
                let (a, b) = (&inputs[0], &inputs[1]);
                if a.rank() != 2 || b.rank() != 2 || a.dims[1] != b.dims[0] {
                    return Err(mismatch(a, b));
                }
                Ok(Shape::new(
                    a.dtype.promote(b.dtype),
                    vec![a.dims[0], b.dims[1]],
                ))
            }

            DiffOp::Transpose => {
                let x = &inputs[0];
                if x.rank() != 2 {
                    return Err(invalid(self, format!("expected a matrix, got {}", x)));
                }
                Ok(Shape::new(x.dtype, vec![x.dims[1], x.dims[0]]))
            }

            DiffOp::SumAll => Ok(Shape::scalar(inputs[0].dtype)),

            DiffOp::Fill { shape } => {
                let x = &inputs[0];
                if x.numel() != 1 {
                    return Err(invalid(self, format!("cannot fill from {}", x)));
                }
                Ok(Shape::new(x.dtype, shape.clone()))
            }

            DiffOp::Reshape { dims } => {
                let x = &inputs[0];
                let target = Shape::new(x.dtype, dims.clone());
                if target.numel() != x.numel() {
                    return Err(mismatch(&target, x));
                }
                Ok(target)
            }

            DiffOp::Cast { dtype } => Ok(inputs[0].with_dtype(*dtype)),

            DiffOp::Slice { axis, start, end } => {
                let x = &inputs[0];
                let len = axis_len(self, x, *axis)?;
                if start > end || *end > len {
                    return Err(invalid(self, format!("out of range for {}", x)));
                }
                let mut dims = x.dims.clone();
                dims[*axis] = end - start;
                Ok(Shape::new(x.dtype, dims))
            }

            DiffOp::Pad { axis, start, len } => {
                let x = &inputs[0];
                let own = axis_len(self, x, *axis)?;
                if start + own > *len {
                    return Err(invalid(self, format!("{} does not fit", x)));
                }
                let mut dims = x.dims.clone();
                dims[*axis] = *len;
                Ok(Shape::new(x.dtype, dims))
            }

            DiffOp::Concat { axis } => {
                let first = inputs
                    .first()
                    .ok_or_else(|| invalid(self, "needs at least one input"))?;
                axis_len(self, first, *axis)?;
                let mut dims = first.dims.clone();
                dims[*axis] = 0;
                let mut dtype = first.dtype;
                for x in inputs {
                    let len = axis_len(self, x, *axis)?;
                    let mut expected = first.dims.clone();
                    expected[*axis] = len;
                    if x.dims != expected {
                        return Err(mismatch(&Shape::new(first.dtype, expected), x));
                    }
                    dims[*axis] += len;
                    dtype = dtype.promote(x.dtype);
                }
                Ok(Shape::new(dtype, dims))
            }

            DiffOp::Take => {
                let (x, i) = (&inputs[0], &inputs[1]);
                if !i.is_scalar() || !i.dtype.is_discrete() {
                    return Err(invalid(self, format!("index must be an integer scalar, got {}", i)));
                }
                Ok(Shape::scalar(x.dtype))
            }

            DiffOp::Scatter { len } => {
                let (g, i) = (&inputs[0], &inputs[1]);
                if g.numel() != 1 || !i.is_scalar() || !i.dtype.is_discrete() {
                    return Err(invalid(self, format!("cannot scatter {} at {}", g, i)));
                }
                Ok(Shape::vector(g.dtype, *len))
            }
        }
    }

    /// Execute the forward pass for this operation.
    ///
    /// Leaves that are bound by evaluation context (`Variable`, `LoopIndex`)
    /// and `Map` are handled by the evaluator and rejected here.
    pub fn forward(&self, inputs: &[Array]) -> Result<Array, GraphError> {
        let value = match self {
            DiffOp::Const { value } => value.clone(),
            DiffOp::Shared { value, .. } => value.get(),
            DiffOp::Source { source } => source.source().advance(),
            DiffOp::Variable { .. } | DiffOp::LoopIndex | DiffOp::Map { .. } => {
                return Err(invalid(self, "bound by the evaluator"));
            }

            DiffOp::Add => inputs[0].zip_with(&inputs[1], |a, b| a + b)?,
            DiffOp::Sub => inputs[0].zip_with(&inputs[1], |a, b| a - b)?,
            DiffOp::Mul => inputs[0].zip_with(&inputs[1], |a, b| a * b)?,
            DiffOp::Div => inputs[0].zip_with(&inputs[1], |a, b| a / b)?,
            DiffOp::Neg => inputs[0].map(|x| -x),
            DiffOp::Exp => inputs[0].map(f64::exp),
            DiffOp::Log => inputs[0].map(f64::ln),
            DiffOp::Identity => inputs[0].clone(),
            DiffOp::MatMul => inputs[0].matmul(&inputs[1])?,
            DiffOp::Transpose => inputs[0].transpose()?,
            DiffOp::SumAll => inputs[0].sum_all(),
            DiffOp::Fill { shape } => inputs[0].broadcast_to(shape.clone())?,
            DiffOp::Reshape { dims } => inputs[0].reshape(dims.clone())?,
            DiffOp::Cast { dtype } => inputs[0].astype(*dtype),
            DiffOp::Slice { axis, start, end } => inputs[0].slice_axis(*axis, *start, *end)?,
            DiffOp::Pad { axis, start, len } => inputs[0].pad_axis(*axis, *start, *len)?,
            DiffOp::Concat { axis } => {
                let parts: Vec<&Array> = inputs.iter().collect();
                Array::concat(&parts, *axis)?
            }

            DiffOp::Take => {
                let (x, i) = (&inputs[0], &inputs[1]);
                let pos = runtime_index(i, x.size())?;
                Array {
                    shape: vec![],
                    dtype: x.dtype,
                    data: vec![x.data[pos]],
                }
            }

            DiffOp::Scatter { len } => {
                let (g, i) = (&inputs[0], &inputs[1]);
                let pos = runtime_index(i, *len)?;
                let mut out = Array::zeros(vec![*len], g.dtype);
                out.data[pos] = g.data[0];
                out
            }
        };
        Ok(value)
    }
}

/// Read a scalar index value and bounds-check it.
fn runtime_index(index: &Array, len: usize) -> Result<usize, GraphError> {
    let raw = index.as_scalar().unwrap_or(f64::NAN);
    let i = raw as i64;
    if raw.is_nan() || i < 0 || i as usize >= len {
        return Err(GraphError::IndexOutOfBounds { index: i, len });
    }
    Ok(i as usize)
}

impl fmt::Display for DiffOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffOp::Variable { name } => write!(f, "Variable({})", name),
            DiffOp::Shared { name, .. } => write!(f, "Shared({})", name),
            DiffOp::Const { value } => write!(f, "Const({:?})", value),
            DiffOp::Source { .. } => write!(f, "Source"),
            DiffOp::LoopIndex => write!(f, "LoopIndex"),
            DiffOp::Add => write!(f, "Add"),
            DiffOp::Sub => write!(f, "Sub"),
            DiffOp::Mul => write!(f, "Mul"),
            DiffOp::Div => write!(f, "Div"),
            DiffOp::Neg => write!(f, "Neg"),
            DiffOp::Exp => write!(f, "Exp"),
            DiffOp::Log => write!(f, "Log"),
            DiffOp::Identity => write!(f, "Identity"),
            DiffOp::MatMul => write!(f, "MatMul"),
            DiffOp::Transpose => write!(f, "Transpose"),
            DiffOp::SumAll => write!(f, "SumAll"),
            DiffOp::Fill { shape } => write!(f, "Fill({:?})", shape),
            DiffOp::Reshape { dims } => write!(f, "Reshape({:?})", dims),
            DiffOp::Cast { dtype } => write!(f, "Cast({})", dtype),
            DiffOp::Slice { axis, start, end } => {
                write!(f, "Slice(axis={}, {}..{})", axis, start, end)
            }
            DiffOp::Pad { axis, start, len } => {
                write!(f, "Pad(axis={}, at={}, len={})", axis, start, len)
            }
            DiffOp::Concat { axis } => write!(f, "Concat(axis={})", axis),
            DiffOp::Take => write!(f, "Take"),
            DiffOp::Scatter { len } => write!(f, "Scatter({})", len),
            DiffOp::Map { index, body } => {
                write!(f, "Map(index=%{}, body=%{})", index.index(), body.index())
            }
        }
    }
}
