//! # Data Generators
//!
//! A [`DataGenerator`] wraps an iterator of arrays and fixes its element type
//! from the first element, which is kept as a sample and then yielded first.

use std::fmt;

use symflow_core::{GraphConfig, Shape};
use symflow_diff::tensor::smart_float_x;
use symflow_diff::Array;

use crate::error::DataError;

/// An iterator of arrays with a known element type and a sample value.
///
/// Float elements are converted to the configured float type; discrete
/// elements are passed through unchanged.
pub struct DataGenerator {
    pending: Option<Array>,
    rest: Box<dyn Iterator<Item = Array> + Send>,
    test_value: Array,
    tensor_type: Shape,
    config: GraphConfig,
}

impl DataGenerator {
    /// Wrap `iter`, taking its first element as the sample.
    ///
    /// ```rust
    /// use symflow_core::{GraphConfig, Shape};
    /// use symflow_data::DataGenerator;
    /// use symflow_diff::Array;
    ///
    /// let batches = vec![Array::vector(vec![1.0, 2.0]), Array::vector(vec![3.0, 4.0])];
    /// let mut gen = DataGenerator::new(batches, &GraphConfig::default()).unwrap();
    /// assert_eq!(gen.tensor_type(), &Shape::f64_vector(2));
    /// assert_eq!(gen.next().unwrap().data, vec![1.0, 2.0]);
    /// ```
    pub fn new<I>(iter: I, config: &GraphConfig) -> Result<Self, DataError>
    where
        I: IntoIterator<Item = Array>,
        I::IntoIter: Send + 'static,
    {
        let mut rest = iter.into_iter();
        let first = rest.next().ok_or(DataError::EmptySource)?;
        let test_value = smart_float_x(&first, config);
        let tensor_type = test_value.type_shape();
        Ok(Self {
            pending: Some(test_value.clone()),
            rest: Box::new(rest),
            test_value,
            tensor_type,
            config: config.clone(),
        })
    }

    /// The first element, converted like every other element.
    pub fn test_value(&self) -> &Array {
        &self.test_value
    }

    /// The declared type of every element.
    pub fn tensor_type(&self) -> &Shape {
        &self.tensor_type
    }
}

impl Iterator for DataGenerator {
    type Item = Array;

    fn next(&mut self) -> Option<Array> {
        if let Some(first) = self.pending.take() {
            return Some(first);
        }
        self.rest
            .next()
            .map(|value| smart_float_x(&value, &self.config))
    }
}

impl fmt::Debug for DataGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataGenerator")
            .field("tensor_type", &self.tensor_type)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symflow_core::DType;

    #[test]
    fn test_first_element_is_yielded_once() {
        let items = vec![Array::scalar(1.0), Array::scalar(2.0)];
        let gen = DataGenerator::new(items, &GraphConfig::default()).unwrap();
        let seen: Vec<_> = gen.map(|a| a.as_scalar().unwrap()).collect();
        assert_eq!(seen, vec![1.0, 2.0]);
    }

    #[test]
    fn test_empty_source() {
        let result = DataGenerator::new(Vec::<Array>::new(), &GraphConfig::default());
        assert_eq!(result.err(), Some(DataError::EmptySource));
    }

    #[test]
    fn test_float_elements_use_float_x() {
        let config = GraphConfig::default().with_float_x(DType::Float32);
        let items = vec![Array::vector(vec![0.5, 1.5]), Array::vector(vec![2.5, 3.5])];
        let mut gen = DataGenerator::new(items, &config).unwrap();
        assert_eq!(gen.tensor_type(), &Shape::vector(DType::Float32, 2));
        assert_eq!(gen.nth(1).unwrap().dtype, DType::Float32);
    }

    #[test]
    fn test_discrete_elements_keep_dtype() {
        let config = GraphConfig::default().with_float_x(DType::Float32);
        let labels = Array::vector(vec![0.0, 1.0]).astype(DType::Int64);
        let gen = DataGenerator::new(vec![labels], &config).unwrap();
        assert_eq!(gen.tensor_type().dtype, DType::Int64);
    }
}
