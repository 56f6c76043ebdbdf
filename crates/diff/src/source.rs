//! # External Storage
//!
//! Two kinds of leaves hold state that lives outside the graph:
//!
//! - [`SharedValue`]: a constant-holding placeholder whose value can be
//!   replaced between evaluations
//! - [`SourceHandle`]: an [`ExternalSource`] that yields a fresh value every
//!   time an evaluation reaches it
//!
//! Both compare by storage identity: two handles are equal only if they
//! point at the same storage.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use symflow_core::{CoreError, Shape};

use crate::tensor::Array;

/// A stream of values feeding a zero-input graph node.
pub trait ExternalSource: Send + Sync + fmt::Debug {
    /// The type every produced value is expected to have.
    fn output_shape(&self) -> Shape;

    /// Produce the next value, consuming it from the stream.
    fn advance(&self) -> Array;

    /// A representative value that does not consume from the stream.
    fn sample(&self) -> Array;

    /// Whether constant folding may evaluate this source at rewrite time.
    fn do_constant_folding(&self) -> bool {
        false
    }
}

/// Shared ownership of an [`ExternalSource`].
#[derive(Clone)]
pub struct SourceHandle(pub Arc<dyn ExternalSource>);

impl SourceHandle {
    pub fn new(source: Arc<dyn ExternalSource>) -> Self {
        Self(source)
    }

    pub fn source(&self) -> &dyn ExternalSource {
        self.0.as_ref()
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for SourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for SourceHandle {}

impl Hash for SourceHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Source({:?})", self.0)
    }
}

/// Mutable storage behind a `Shared` leaf.
#[derive(Clone)]
pub struct SharedValue(Arc<RwLock<Array>>);

impl SharedValue {
    pub fn new(value: Array) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// A copy of the current value.
    pub fn get(&self) -> Array {
        self.0.read().clone()
    }

    /// Replace the stored value. The new value must keep the declared type.
    pub fn set(&self, value: Array) -> Result<(), CoreError> {
        let mut slot = self.0.write();
        if value.type_shape() != slot.type_shape() {
            return Err(CoreError::ShapeMismatch {
                expected: slot.type_shape(),
                got: value.type_shape(),
            });
        }
        *slot = value;
        Ok(())
    }

    pub fn shape(&self) -> Shape {
        self.0.read().type_shape()
    }
}

impl PartialEq for SharedValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SharedValue {}

impl Hash for SharedValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const ()).hash(state);
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared({:?})", self.0.read())
    }
}
