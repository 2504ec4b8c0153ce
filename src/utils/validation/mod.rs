//! Validation helpers shared across the pipeline

pub mod numeric;
pub mod tensor;

pub use numeric::NumericValidator;
pub use tensor::TensorValidator;
