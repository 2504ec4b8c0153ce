//! ONNX Runtime backend for segmentation models
//!
//! Builds one `ort` session per model file and keeps it for every inference.
//! Supports the CPU, CUDA and CoreML execution providers with availability
//! checks and CPU fallback.

use crate::config::{ExecutionProvider, PipelineConfig};
use crate::error::{EditError, Result};
use crate::inference::{input_shape_for, InferenceBackend};
use crate::models::ModelSpec;
use instant::{Duration, Instant};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::{self, value::Value};

/// ONNX Runtime backend running one segmentation model
#[derive(Debug)]
pub struct OnnxBackend {
    model: ModelSpec,
    session: Option<Session>,
    config: Option<PipelineConfig>,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers as `(name, available, description)`
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!("🔍 Checking execution provider availability");
        log::debug!("  - Platform: {os}", os = std::env::consts::OS);
        log::debug!("  - Architecture: {arch}", arch = std::env::consts::ARCH);

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Create a backend for the given model; no session is built until initialization
    #[must_use]
    pub fn new(model: ModelSpec) -> Self {
        Self {
            model,
            session: None,
            config: None,
        }
    }

    /// Model this backend runs
    #[must_use]
    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    fn configure_providers(
        session_builder: SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<SessionBuilder> {
        let provider_name = provider.to_string();
        let with_providers = |builder: SessionBuilder, providers: Vec<ExecutionProviderDispatch>| {
            builder.with_execution_providers(providers).map_err(|e| {
                EditError::inference_error_with_provider(
                    &provider_name,
                    "register execution provider",
                    &e.to_string(),
                )
            })
        };

        match provider {
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();

                let cuda_provider = CUDAExecutionProvider::default();
                if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                    log::info!("🚀 CUDA execution provider is available and will be used");
                    providers.push(cuda_provider.build());
                } else {
                    log::debug!("CUDA execution provider is not available");
                }

                let coreml_provider = CoreMLExecutionProvider::default();
                if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
                    log::info!("🍎 CoreML execution provider is available and will be used");
                    providers.push(coreml_provider.with_subgraphs(true).build());
                } else {
                    log::debug!("CoreML execution provider is not available");
                }

                if providers.is_empty() {
                    log::info!("No hardware acceleration available, using CPU");
                    Ok(session_builder)
                } else {
                    log::info!(
                        "✅ Hardware acceleration enabled with {count} provider(s)",
                        count = providers.len()
                    );
                    with_providers(session_builder, providers)
                }
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Ok(session_builder)
            },
            ExecutionProvider::Cuda => {
                let cuda_provider = CUDAExecutionProvider::default();
                if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                    log::info!("Using CUDA execution provider");
                    with_providers(session_builder, vec![cuda_provider.build()])
                } else {
                    log::warn!(
                        "CUDA execution provider requested but not available, falling back to CPU"
                    );
                    Ok(session_builder)
                }
            },
            ExecutionProvider::CoreMl => {
                let coreml_provider = CoreMLExecutionProvider::default();
                if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
                    log::info!("🍎 Using CoreML execution provider (explicitly requested)");
                    with_providers(
                        session_builder,
                        vec![coreml_provider.with_subgraphs(true).build()],
                    )
                } else {
                    log::warn!(
                        "CoreML execution provider requested but not available, falling back to CPU"
                    );
                    Ok(session_builder)
                }
            },
        }
    }

    fn build_session(&self, config: &PipelineConfig) -> Result<Session> {
        self.model.validate()?;
        let model_data = self.model.load_bytes()?;

        let session_builder = Session::builder()
            .map_err(|e| EditError::inference(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                EditError::inference(format!("Failed to set optimization level: {e}"))
            })?;
        let session_builder =
            Self::configure_providers(session_builder, config.execution_provider)?;

        let available = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            available
        };
        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (available / 4).max(1)
        };

        let session = session_builder
            .with_parallel_execution(true)
            .map_err(|e| EditError::inference(format!("Failed to enable parallel execution: {e}")))?
            .with_intra_threads(intra_threads)
            .map_err(|e| EditError::inference(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| EditError::inference(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                EditError::inference(format!(
                    "Failed to create session from {}: {e}",
                    self.model.display_name()
                ))
            })?;

        log::debug!("✅ ONNX Runtime session created for {}", self.model.display_name());
        log::debug!("  - Requested provider: {}", config.execution_provider);
        log::debug!(
            "  - Threading: {intra_threads} intra-op threads, {inter_threads} inter-op threads"
        );
        #[allow(clippy::cast_precision_loss)] // display only
        let size_mb = model_data.len() as f64 / (1024.0 * 1024.0);
        log::debug!("  - Model size: {size_mb:.2} MB");

        Ok(session)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &PipelineConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }

        let start = Instant::now();
        let session = self.build_session(config)?;
        self.session = Some(session);
        self.config = Some(config.clone());

        let load_time = start.elapsed();
        log::info!(
            "📊 Model loading complete: {:.0}ms",
            load_time.as_secs_f64() * 1000.0
        );
        Ok(Some(load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| EditError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("🚀 Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone())
            .map_err(|e| EditError::inference(format!("Failed to convert input tensor: {e}")))?;

        // positional inputs avoid depending on tensor names
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| EditError::inference(format!("ONNX inference failed: {e}")))?;
        let core_inference_time = inference_start.elapsed();

        let output_tensor = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| EditError::invalid_model_output("No output tensors found"))?;
            outputs
                .get(first_key)
                .ok_or_else(|| EditError::invalid_model_output("First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    EditError::invalid_model_output(format!("Failed to extract output tensor: {e}"))
                })?
        };

        let output_shape = output_tensor.shape().to_vec();
        if output_shape.len() != 4 {
            return Err(EditError::invalid_model_output(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        }
        let output_data = output_tensor.view().to_owned();
        let dim = |axis: usize| output_shape.get(axis).copied().unwrap_or(1);
        let result = Array4::from_shape_vec(
            (dim(0), dim(1), dim(2), dim(3)),
            output_data.into_raw_vec_and_offset().0,
        )
        .map_err(|e| EditError::invalid_model_output(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "  ⚡ Core inference: {:.2}ms, output shape {:?}",
            core_inference_time.as_secs_f64() * 1000.0,
            result.dim()
        );
        log::info!(
            "📊 Inference complete: {:.2}ms total",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(result)
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
            .ok_or_else(|| EditError::internal("Cannot refresh an uninitialized ONNX backend"))?;

        log::warn!("♻️ Rebuilding ONNX session for {}", self.model.display_name());
        self.session = None;
        self.session = Some(self.build_session(&config)?);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }
}
