//! # Graph Configuration
//!
//! Per-graph settings that used to be process-wide flags: whether test values
//! are computed eagerly while a graph is built, and which float type
//! `float_x` conversions target.
//!
//! ```rust
//! use symflow_core::{DType, GraphConfig, TestValueMode};
//!
//! let config = GraphConfig::from_json(r#"{ "float_x": "float32" }"#).unwrap();
//! assert_eq!(config.float_x, DType::Float32);
//! assert_eq!(config.compute_test_value, TestValueMode::Off);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::shape::DType;

/// When test values are computed for newly built nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestValueMode {
    /// Test values are only computed on demand (preview evaluation).
    #[default]
    Off,
    /// Every node gets a test value as soon as all of its inputs have one.
    /// Failures surface immediately as construction errors.
    Eager,
}

/// Settings attached to a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub compute_test_value: TestValueMode,
    pub float_x: DType,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            compute_test_value: TestValueMode::Off,
            float_x: DType::Float64,
        }
    }
}

impl GraphConfig {
    /// Parse a configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        serde_json::from_str(json).map_err(|e| CoreError::Config {
            reason: e.to_string(),
        })
    }

    pub fn with_test_values(mut self, mode: TestValueMode) -> Self {
        self.compute_test_value = mode;
        self
    }

    pub fn with_float_x(mut self, dtype: DType) -> Self {
        self.float_x = dtype;
        self
    }
}
