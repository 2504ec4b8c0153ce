//! Inference backend abstraction

use crate::{config::PipelineConfig, error::Result};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for inference backends
///
/// A backend owns one native session that is built once in
/// [`initialize`](InferenceBackend::initialize) and reused for every call to
/// [`infer`](InferenceBackend::infer). Callers serialize access through
/// `&mut self`.
pub trait InferenceBackend: Send {
    /// Initialize the backend with the given configuration
    ///
    /// Returns the model load time, or `None` if the backend was already initialized.
    ///
    /// # Errors
    /// - Model file missing or unreadable
    /// - Native session construction failures
    fn initialize(&mut self, config: &PipelineConfig) -> Result<Option<Duration>>;

    /// Run inference on a `(1, 3, H, W)` tensor, returning the raw `(N, C, H', W')` score volume
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Output is not a 4-D float tensor
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Get the expected input shape for this backend
    fn input_shape(&self) -> (usize, usize, usize, usize);

    /// Discard the native session and build a fresh one with the last configuration
    ///
    /// # Errors
    /// - Backend was never initialized
    /// - Session reconstruction fails
    fn refresh(&mut self) -> Result<()>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}

/// Input shape `(1, 3, height, width)` implied by a pipeline configuration
#[must_use]
pub fn input_shape_for(config: &PipelineConfig) -> (usize, usize, usize, usize) {
    let (width, height) = config.input_dimensions();
    (1, 3, height as usize, width as usize)
}
