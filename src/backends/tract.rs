//! Tract backend for segmentation models
//!
//! Pure Rust inference through `tract-onnx`. The model's input fact is pinned to
//! the configured tensor shape before optimization so dynamic-size models plan
//! a fixed graph.

use crate::config::PipelineConfig;
use crate::error::{EditError, Result};
use crate::inference::{input_shape_for, InferenceBackend};
use crate::models::ModelSpec;
use ndarray::Array4;
use tract_onnx::prelude::*;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running segmentation models using pure Rust inference
#[derive(Debug)]
pub struct TractBackend {
    model_spec: ModelSpec,
    model: Option<TractModel>,
    config: Option<PipelineConfig>,
}

impl TractBackend {
    /// List Tract execution providers as `(name, available, description)`
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!("🔍 Tract backend: pure Rust, CPU only");
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    /// Create a backend for the given model; nothing is loaded until initialization
    #[must_use]
    pub fn new(model_spec: ModelSpec) -> Self {
        Self {
            model_spec,
            model: None,
            config: None,
        }
    }

    #[must_use]
    pub fn model(&self) -> &ModelSpec {
        &self.model_spec
    }

    fn load_model(&self, config: &PipelineConfig) -> Result<TractModel> {
        self.model_spec.validate()?;
        let model_data = self.model_spec.load_bytes()?;
        let (_, channels, height, width) = input_shape_for(config);

        log::info!("🚀 Initializing Tract backend");
        log::info!("🧠 Model: {}", self.model_spec.display_name());
        log::info!("⚡ Execution Provider: CPU (Pure Rust)");
        #[allow(clippy::cast_precision_loss)] // display only
        let size_mb = model_data.len() as f64 / (1024.0 * 1024.0);
        log::info!("📏 Model size: {size_mb:.2} MB");

        onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| EditError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([1, channels, height, width]).into())
            .map_err(|e| EditError::model(format!("Failed to pin input shape: {e}")))?
            .into_optimized()
            .map_err(|e| EditError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| EditError::model(format!("Failed to create runnable model: {e}")))
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, config: &PipelineConfig) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }

        let start = Instant::now();
        self.model = Some(self.load_model(config)?);
        self.config = Some(config.clone());

        let load_time = start.elapsed();
        log::info!(
            "✅ Tract backend initialized in {}ms",
            load_time.as_millis()
        );
        Ok(Some(load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| EditError::internal("Tract model not initialized"))?;

        log::debug!("🔮 Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| EditError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| EditError::invalid_model_output("No output tensor found"))?
            .into_arc_tensor();
        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            EditError::invalid_model_output(format!("Output tensor is not f32: {e}"))
        })?;

        let output_shape = output_data.shape();
        if output_shape.len() != 4 {
            return Err(EditError::invalid_model_output(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        }
        let dim = |axis: usize| output_shape.get(axis).copied().unwrap_or(1);
        let output_array = Array4::from_shape_vec(
            (dim(0), dim(1), dim(2), dim(3)),
            output_data.to_owned().into_raw_vec_and_offset().0,
        )
        .map_err(|e| EditError::invalid_model_output(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "✅ Tract inference completed in {}ms, output {:?}",
            inference_start.elapsed().as_millis(),
            output_array.shape()
        );
        Ok(output_array)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.config
            .as_ref()
            .map_or((1, 3, 512, 512), input_shape_for)
    }

    fn refresh(&mut self) -> Result<()> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| EditError::internal("Cannot refresh an uninitialized Tract backend"))?;
        log::warn!("♻️ Reloading Tract model {}", self.model_spec.display_name());
        self.model = None;
        self.model = Some(self.load_model(&config)?);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }
}
