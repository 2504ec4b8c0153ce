//! Shared utilities for preprocessing and validation

pub mod preprocessing;
pub mod validation;

pub use preprocessing::{area_resize, TensorPreprocessor};
pub use validation::{NumericValidator, TensorValidator};
