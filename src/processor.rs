//! Segmentation pipeline
//!
//! `SegmentationPipeline` chains preprocessing, inference, mask synthesis,
//! refinement and compositing into one blocking call per edit. Background and
//! garment edits share the same pipeline type and differ only in their
//! configuration, selection rule and composite mode.

use crate::{
    assets::ReplacementAsset,
    compositor::{self, CompositeMode},
    config::PipelineConfig,
    error::{EditError, Result},
    inference::InferenceBackend,
    mask::{MaskRefiner, MaskSynthesizer},
    models::{BackendType, ModelSpec},
    types::{EditResult, LabelMask, ProcessingTimings, RefinedMask, SelectionRule},
    utils::TensorPreprocessor,
};
use image::DynamicImage;
use instant::{Duration, Instant};
use log::{debug, info, warn};
use ndarray::Array4;
use tracing::{info as trace_info, instrument, span, Level};

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend for `model`
    ///
    /// # Errors
    /// - The requested backend type was not compiled in
    fn create_backend(&self, model: &ModelSpec) -> Result<Box<dyn InferenceBackend>>;

    /// List backend types this factory can create
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Creates the backends enabled by cargo features
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, model: &ModelSpec) -> Result<Box<dyn InferenceBackend>> {
        match model.backend {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new(model.clone()))),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new(model.clone()))),
            #[allow(unreachable_patterns)]
            other => Err(EditError::invalid_config(format!(
                "{other} backend not compiled in; enable the `{other}` feature"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}

/// One model plus the stages around it
pub struct SegmentationPipeline {
    config: PipelineConfig,
    backend: Box<dyn InferenceBackend>,
    model_name: String,
    preprocessor: TensorPreprocessor,
    synthesizer: MaskSynthesizer,
    refiner: MaskRefiner,
}

impl std::fmt::Debug for SegmentationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationPipeline")
            .field("model", &self.model_name)
            .field("initialized", &self.backend.is_initialized())
            .finish_non_exhaustive()
    }
}

impl SegmentationPipeline {
    /// Wrap an existing backend
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: PipelineConfig, backend: Box<dyn InferenceBackend>) -> Result<Self> {
        Self::with_name(config, backend, "custom")
    }

    /// Build the backend for `model` through `factory`
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Backend type unavailable
    pub fn from_model(
        config: PipelineConfig,
        model: &ModelSpec,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        let backend = factory.create_backend(model)?;
        Self::with_name(config, backend, model.display_name())
    }

    fn with_name<S: Into<String>>(
        config: PipelineConfig,
        backend: Box<dyn InferenceBackend>,
        name: S,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            preprocessor: TensorPreprocessor::from_config(&config),
            synthesizer: MaskSynthesizer::from_config(&config),
            refiner: MaskRefiner::from_config(&config),
            model_name: name.into(),
            config,
            backend,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend.is_initialized()
    }

    /// Acquire the native session; later calls are no-ops
    ///
    /// # Errors
    /// - Model loading or session construction fails
    pub fn initialize(&mut self) -> Result<Option<Duration>> {
        if self.backend.is_initialized() {
            return Ok(None);
        }
        info!("Initializing segmentation pipeline for {}", self.model_name);
        self.backend.initialize(&self.config)
    }

    /// Selection rule used when the caller does not supply one
    ///
    /// Saliency maps use the threshold; class maps use the configured classes,
    /// or everything except the background class when none are configured.
    #[must_use]
    pub fn default_rule(&self, labels: &LabelMask) -> SelectionRule {
        match labels {
            LabelMask::Probability(_) => SelectionRule::Threshold,
            LabelMask::Classes { .. } if self.config.selected_classes.is_empty() => {
                SelectionRule::AllExcept([self.config.background_class].into_iter().collect())
            },
            LabelMask::Classes { .. } => {
                SelectionRule::Classes(self.config.selected_classes.clone())
            },
        }
    }

    /// Run the network with one refresh-and-retry on engine failure
    fn infer_with_retry(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let first = match self.backend.infer(input) {
            Ok(volume) => return Ok(volume),
            Err(e @ EditError::InvalidModelOutput(_)) => return Err(e),
            Err(e) => e,
        };

        warn!(
            "Inference on {} failed ({first}), refreshing session and retrying once",
            self.model_name
        );
        self.backend.refresh().map_err(|e| {
            EditError::inference_unavailable(format!(
                "{}: session refresh failed after '{first}': {e}",
                self.model_name
            ))
        })?;

        self.backend.infer(input).map_err(|second| match second {
            EditError::InvalidModelOutput(_) => second,
            other => EditError::inference_unavailable(format!(
                "{}: inference failed twice: {other}",
                self.model_name
            )),
        })
    }

    /// Produce the refined mask for `image`
    ///
    /// Uses [`default_rule`](Self::default_rule) when `rule` is `None`.
    ///
    /// # Errors
    /// - Invalid image
    /// - Inference unavailable or malformed output
    #[instrument(
        skip(self, image, rule),
        fields(
            model = %self.model_name,
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub fn segment(
        &mut self,
        image: &DynamicImage,
        rule: Option<&SelectionRule>,
        timings: &mut ProcessingTimings,
    ) -> Result<RefinedMask> {
        if let Some(load_time) = self.initialize()? {
            timings.model_load_ms = load_time.as_millis() as u64;
        }
        let target = (image.width(), image.height());

        let tensor = {
            let _span = span!(
                Level::DEBUG,
                "preprocessing",
                width = %target.0,
                height = %target.1
            )
            .entered();
            let start = Instant::now();
            let tensor = self.preprocessor.preprocess(image)?;
            timings.preprocessing_ms = start.elapsed().as_millis() as u64;
            tensor
        };

        let volume = {
            let _span = span!(Level::INFO, "inference", model = %self.model_name).entered();
            let start = Instant::now();
            let volume = self.infer_with_retry(&tensor)?;
            timings.inference_ms = start.elapsed().as_millis() as u64;
            volume
        };

        let labels = {
            let _span = span!(Level::DEBUG, "synthesis").entered();
            let start = Instant::now();
            let labels = self.synthesizer.synthesize(&volume)?;
            timings.synthesis_ms = start.elapsed().as_millis() as u64;
            labels
        };

        let _span = span!(Level::DEBUG, "refinement").entered();
        let start = Instant::now();
        let mask = match rule {
            Some(rule) => self.refiner.refine(&labels, target, rule)?,
            None => {
                let rule = self.default_rule(&labels);
                self.refiner.refine(&labels, target, &rule)?
            },
        };
        timings.refinement_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Refined mask: {:.1}% selected",
            mask.statistics().selected_ratio * 100.0
        );
        Ok(mask)
    }

    fn edit<F>(&mut self, image: &DynamicImage, operation: &str, paint: F) -> Result<EditResult>
    where
        F: FnOnce(&DynamicImage, &RefinedMask) -> Result<crate::compositor::CompositeOutcome>,
    {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::new();
        trace_info!(model = %self.model_name, operation, "🎯 Starting edit");

        let mask = self.segment(image, None, &mut timings)?;

        let outcome = {
            let _span = span!(Level::DEBUG, "compositing", operation).entered();
            let start = Instant::now();
            let outcome = paint(image, &mask)?;
            timings.compositing_ms = start.elapsed().as_millis() as u64;
            outcome
        };
        timings.total_ms = total_start.elapsed().as_millis() as u64;

        if outcome.is_replaced() {
            debug!("{operation}: {}", timings.timing_summary());
        } else {
            info!("{operation}: no region found, image left unchanged");
        }

        Ok(EditResult {
            outcome,
            mask,
            timings,
        })
    }

    /// Paint `asset` behind the detected subject
    ///
    /// # Errors
    /// - Invalid image or inference failure
    pub fn replace_background(
        &mut self,
        image: &DynamicImage,
        asset: &ReplacementAsset,
    ) -> Result<EditResult> {
        self.edit(image, "replace_background", |image, mask| {
            compositor::composite(image, mask, asset, CompositeMode::Background)
        })
    }

    /// Fit `asset` into the bounding box of the selected classes
    ///
    /// # Errors
    /// - Invalid image or inference failure
    pub fn replace_region(
        &mut self,
        image: &DynamicImage,
        asset: &ReplacementAsset,
    ) -> Result<EditResult> {
        self.edit(image, "replace_region", |image, mask| {
            compositor::composite(image, mask, asset, CompositeMode::Region)
        })
    }

    /// Make everything but the subject transparent
    ///
    /// # Errors
    /// - Invalid image or inference failure
    pub fn remove_background(&mut self, image: &DynamicImage) -> Result<EditResult> {
        self.edit(image, "remove_background", compositor::cut_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{class_volume, logit_volume, MockBackend};
    use image::{Rgb, RgbImage};

    fn photo(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([120, 130, 140])))
    }

    #[test]
    fn test_default_factory_lists_compiled_backends() {
        let factory = DefaultBackendFactory;
        let backends = factory.available_backends();
        #[cfg(feature = "onnx")]
        assert!(backends.contains(&BackendType::Onnx));
        #[cfg(feature = "tract")]
        assert!(backends.contains(&BackendType::Tract));
        let _ = backends;
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PipelineConfig::saliency();
        config.open_kernel = 4;
        let result = SegmentationPipeline::new(config, Box::new(MockBackend::new()));
        assert!(matches!(result, Err(EditError::InvalidConfig(_))));
    }

    #[test]
    fn test_lazy_initialization() {
        let backend = MockBackend::new();
        let history = backend.history_handle();
        let mut pipeline =
            SegmentationPipeline::new(PipelineConfig::saliency(), Box::new(backend)).unwrap();
        assert!(!pipeline.is_initialized());

        let mut timings = ProcessingTimings::new();
        pipeline.segment(&photo(64, 48), None, &mut timings).unwrap();
        assert!(pipeline.is_initialized());

        pipeline.segment(&photo(64, 48), None, &mut timings).unwrap();
        let calls = history.lock().unwrap().clone();
        assert_eq!(
            calls.iter().filter(|c| c.as_str() == "initialize").count(),
            1
        );
        assert_eq!(calls.iter().filter(|c| c.as_str() == "infer").count(), 2);
    }

    #[test]
    fn test_retry_once_after_refresh() {
        let backend = MockBackend::new().failing_inferences(1);
        let history = backend.history_handle();
        let mut pipeline =
            SegmentationPipeline::new(PipelineConfig::saliency(), Box::new(backend)).unwrap();

        let result = pipeline.remove_background(&photo(40, 40)).unwrap();
        assert!(result.is_replaced());
        let calls = history.lock().unwrap().clone();
        assert_eq!(calls, vec!["initialize", "infer", "refresh", "infer"]);
    }

    #[test]
    fn test_second_failure_is_inference_unavailable() {
        let backend = MockBackend::new().failing_inferences(2);
        let mut pipeline =
            SegmentationPipeline::new(PipelineConfig::saliency(), Box::new(backend)).unwrap();

        let result = pipeline.remove_background(&photo(40, 40));
        assert!(matches!(result, Err(EditError::InferenceUnavailable(_))));
    }

    #[test]
    fn test_malformed_output_is_not_retried() {
        let backend = MockBackend::with_output(Array4::zeros((2, 1, 8, 8)));
        let history = backend.history_handle();
        let mut pipeline =
            SegmentationPipeline::new(PipelineConfig::saliency(), Box::new(backend)).unwrap();

        let result = pipeline.remove_background(&photo(16, 16));
        assert!(matches!(result, Err(EditError::InvalidModelOutput(_))));
        assert!(!history.lock().unwrap().iter().any(|c| c == "refresh"));
    }

    #[test]
    fn test_background_replacement_with_saliency_disc() {
        let mut pipeline =
            SegmentationPipeline::new(PipelineConfig::saliency(), Box::new(MockBackend::new()))
                .unwrap();
        let result = pipeline
            .replace_background(&photo(90, 90), &ReplacementAsset::Solid(Rgb([0, 0, 255])))
            .unwrap();

        assert!(result.is_replaced());
        let out = result.image().to_rgb8();
        assert_eq!(out.get_pixel(45, 45), &Rgb([120, 130, 140]));
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 255]));
        assert!(result.timings.total_ms >= result.timings.refinement_ms);
    }

    #[test]
    fn test_no_subject_leaves_image_unchanged() {
        let backend = MockBackend::with_output(logit_volume(32, 32, |_, _| -6.0));
        let mut pipeline = SegmentationPipeline::new(
            PipelineConfig::builder()
                .input_size(32, 32)
                .normalize_saliency(false)
                .build()
                .unwrap(),
            Box::new(backend),
        )
        .unwrap();

        let original = photo(50, 40);
        let result = pipeline
            .replace_background(&original, &ReplacementAsset::Solid(Rgb([0, 0, 0])))
            .unwrap();
        assert!(!result.is_replaced());
        assert!(result.mask.is_empty());
        assert_eq!(result.image(), &original);
    }

    #[test]
    fn test_default_rule_for_classes_without_selection() {
        let config = PipelineConfig::builder()
            .input_size(16, 16)
            .selected_classes(Vec::<u8>::new())
            .build()
            .unwrap();
        let pipeline = SegmentationPipeline::new(config, Box::new(MockBackend::new())).unwrap();
        let labels = LabelMask::Classes {
            labels: image::GrayImage::new(4, 4),
            num_classes: 3,
        };
        assert!(matches!(
            pipeline.default_rule(&labels),
            SelectionRule::AllExcept(ref set) if set.contains(&0)
        ));
    }

    #[test]
    fn test_region_replacement_uses_selected_classes() {
        // garment class 4 in the middle third of a 64x64 output
        let volume = class_volume(8, 64, 64, |y, x| {
            if (20..44).contains(&y) && (20..44).contains(&x) {
                4
            } else {
                0
            }
        });
        let mut pipeline = SegmentationPipeline::new(
            PipelineConfig::garment(),
            Box::new(MockBackend::with_output(volume)),
        )
        .unwrap();

        let result = pipeline
            .replace_region(&photo(128, 128), &ReplacementAsset::Solid(Rgb([1, 2, 3])))
            .unwrap();
        let region = result.outcome.region().unwrap();
        assert!(region.contains(64, 64));
        assert!(!region.contains(2, 2));
        assert_eq!(result.image().to_rgb8().get_pixel(64, 64), &Rgb([1, 2, 3]));
        assert_eq!(result.image().to_rgb8().get_pixel(2, 2), &Rgb([120, 130, 140]));
    }
}
