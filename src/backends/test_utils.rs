//! Test utilities and a mock backend for exercising the pipeline
//!
//! The mock implements [`InferenceBackend`] without a model file so that the
//! full preprocessing → inference → refinement → composite chain can be
//! tested deterministically. Outputs are scripted score volumes; failures can
//! be injected for initialization and for a number of upcoming inferences.

use crate::{
    config::PipelineConfig,
    error::{EditError, Result},
    inference::{input_shape_for, InferenceBackend},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Mock backend for testing
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    input_shape: (usize, usize, usize, usize),
    /// Scripted output; `None` produces a centred disc of positive logits
    output: Option<Array4<f32>>,
    /// Call history shared with every clone, for verification in tests
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    /// Number of upcoming `infer` calls that fail
    failing_inferences: usize,
    refreshes: usize,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            input_shape: (1, 3, 320, 320),
            output: None,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            failing_inferences: 0,
            refreshes: 0,
        }
    }

    /// Always return the given score volume
    #[must_use]
    pub fn with_output(output: Array4<f32>) -> Self {
        let mut backend = Self::new();
        backend.output = Some(output);
        backend
    }

    /// Create a mock backend that will fail during initialization
    #[must_use]
    pub fn new_failing_init() -> Self {
        let mut backend = Self::new();
        backend.should_fail_init = true;
        backend
    }

    /// Make the next `count` inference calls fail
    #[must_use]
    pub fn failing_inferences(mut self, count: usize) -> Self {
        self.failing_inferences = count;
        self
    }

    /// Handle on the call history that stays valid after the backend is moved
    #[must_use]
    pub fn history_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    /// Get the call history for verification in tests
    #[must_use]
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refreshes
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    fn generate_mock_output(&self) -> Array4<f32> {
        let (_, _, height, width) = self.input_shape;
        logit_volume(height, width, |y, x| {
            let dx = x as f32 - width as f32 / 2.0;
            let dy = y as f32 - height as f32 / 2.0;
            let radius = height.min(width) as f32 / 3.0;
            if (dx * dx + dy * dy).sqrt() < radius {
                6.0
            } else {
                -6.0
            }
        })
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, config: &PipelineConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(EditError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }

        self.input_shape = input_shape_for(config);
        self.initialized = true;
        Ok(Some(Duration::from_millis(5)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(EditError::internal("Mock backend not initialized"));
        }

        if self.failing_inferences > 0 {
            self.failing_inferences -= 1;
            return Err(EditError::inference("Mock backend inference failed"));
        }

        if input.dim() != self.input_shape {
            return Err(EditError::inference(format!(
                "Mock backend expected input {:?}, got {:?}",
                self.input_shape,
                input.dim()
            )));
        }

        Ok(self
            .output
            .clone()
            .unwrap_or_else(|| self.generate_mock_output()))
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.input_shape
    }

    fn refresh(&mut self) -> Result<()> {
        self.record_call("refresh");
        if !self.initialized {
            return Err(EditError::internal("Cannot refresh an uninitialized backend"));
        }
        self.refreshes += 1;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Single-channel logit volume `(1, 1, height, width)` filled from `logit(y, x)`
pub fn logit_volume<F>(height: usize, width: usize, logit: F) -> Array4<f32>
where
    F: Fn(usize, usize) -> f32,
{
    Array4::from_shape_fn((1, 1, height, width), |(_, _, y, x)| logit(y, x))
}

/// Multi-class score volume `(1, classes, height, width)` where `label(y, x)` scores highest
pub fn class_volume<F>(classes: usize, height: usize, width: usize, label: F) -> Array4<f32>
where
    F: Fn(usize, usize) -> usize,
{
    Array4::from_shape_fn((1, classes, height, width), |(_, c, y, x)| {
        if label(y, x) == c {
            5.0
        } else {
            -1.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_initialization() {
        let mut backend = MockBackend::new();
        assert!(!backend.is_initialized());

        let result = backend.initialize(&PipelineConfig::garment());
        assert!(result.is_ok());
        assert!(backend.is_initialized());
        assert_eq!(backend.input_shape(), (1, 3, 512, 512));
        assert_eq!(backend.get_call_history(), vec!["initialize"]);
    }

    #[test]
    fn test_mock_initialization_failure() {
        let mut backend = MockBackend::new_failing_init();
        assert!(backend.initialize(&PipelineConfig::default()).is_err());
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_mock_default_output_is_disc() {
        let mut backend = MockBackend::new();
        backend.initialize(&PipelineConfig::saliency()).unwrap();
        let input = Array4::<f32>::zeros((1, 3, 320, 320));
        let output = backend.infer(&input).unwrap();

        assert_eq!(output.dim(), (1, 1, 320, 320));
        assert!(output[[0, 0, 160, 160]] > 0.0);
        assert!(output[[0, 0, 0, 0]] < 0.0);
    }

    #[test]
    fn test_mock_injected_failures() {
        let mut backend = MockBackend::new().failing_inferences(1);
        backend.initialize(&PipelineConfig::saliency()).unwrap();
        let input = Array4::<f32>::zeros((1, 3, 320, 320));

        assert!(backend.infer(&input).is_err());
        assert!(backend.infer(&input).is_ok());
    }

    #[test]
    fn test_mock_rejects_wrong_input_shape() {
        let mut backend = MockBackend::new();
        backend.initialize(&PipelineConfig::saliency()).unwrap();
        let input = Array4::<f32>::zeros((1, 3, 64, 64));
        assert!(backend.infer(&input).is_err());
    }

    #[test]
    fn test_history_handle_survives_move() {
        let backend = MockBackend::new();
        let history = backend.history_handle();
        let mut boxed: Box<dyn InferenceBackend> = Box::new(backend);
        boxed.initialize(&PipelineConfig::saliency()).unwrap();
        assert_eq!(history.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_class_volume_argmax_layout() {
        let volume = class_volume(3, 2, 2, |y, _| y + 1);
        assert_eq!(volume.dim(), (1, 3, 2, 2));
        assert!(volume[[0, 1, 0, 0]] > volume[[0, 0, 0, 0]]);
        assert!(volume[[0, 2, 1, 1]] > volume[[0, 1, 1, 1]]);
    }
}
