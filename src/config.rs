//! Configuration types for segmentation and compositing

use crate::error::{EditError, Result};
use crate::models::BackendType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Channel order the network was trained on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Tunable constants of one segmentation pipeline
///
/// Every field has a serde default so partial JSON documents only need to
/// name the options they override. Kernel sizes are square side lengths and
/// must be odd.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Network input resolution as `[width, height]`
    pub input_size: [u32; 2],
    /// Per-channel mean subtracted after scaling to [0,1]
    pub mean_values: [f32; 3],
    /// Per-channel standard deviation divided after mean subtraction
    pub std_values: [f32; 3],
    pub channel_order: ChannelOrder,
    /// Class indices forming the replaced region (multi-class models)
    pub selected_classes: BTreeSet<u8>,
    /// Class index treated as background when a multi-class model drives background replacement
    pub background_class: u8,
    /// Nearest-neighbour upscale factor applied before per-class smoothing
    pub upscale_factor: u32,
    pub class_smoothing_kernel: u32,
    pub open_kernel: u32,
    pub dilate_kernel: u32,
    pub close_kernel: u32,
    pub edge_blur_sigma: f32,
    /// Polygon simplification tolerance as a fraction of contour perimeter
    pub contour_tolerance_fraction: f32,
    pub contour_blur_sigma: f32,
    /// Probability cutoff for the binary saliency path
    pub saliency_threshold: f32,
    /// Exponent applied to probabilities before thresholding (< 1 sharpens)
    pub saliency_gamma: f32,
    pub saliency_close_kernel: u32,
    pub saliency_blur_sigma: f32,
    /// Rescale sigmoid output onto [0,1] using the observed min and max
    pub normalize_saliency: bool,
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_size: [512, 512],
            mean_values: [0.485, 0.456, 0.406],
            std_values: [0.229, 0.224, 0.225],
            channel_order: ChannelOrder::Rgb,
            selected_classes: BTreeSet::new(),
            background_class: 0,
            upscale_factor: 4,
            class_smoothing_kernel: 3,
            open_kernel: 7,
            dilate_kernel: 9,
            close_kernel: 15,
            edge_blur_sigma: 5.0,
            contour_tolerance_fraction: 0.01,
            contour_blur_sigma: 7.0,
            saliency_threshold: 0.2,
            saliency_gamma: 0.5,
            saliency_close_kernel: 3,
            saliency_blur_sigma: 0.8,
            normalize_saliency: true,
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

/// Largest structuring element side; morphology radii are 8-bit
pub const MAX_KERNEL: u32 = 511;

/// Largest label map upscale applied before class smoothing
pub const MAX_UPSCALE_FACTOR: u32 = 8;

/// Upper-clothes class of the 18-class clothes parser
pub const CLASS_UPPER_CLOTHES: u8 = 4;
/// Dress class of the 18-class clothes parser
pub const CLASS_DRESS: u8 = 7;

impl PipelineConfig {
    /// Saliency preset (U²-Net style, 320×320, single logit channel)
    #[must_use]
    pub fn saliency() -> Self {
        Self {
            input_size: [320, 320],
            ..Self::default()
        }
    }

    /// Garment preset (SegFormer clothes parser, 512×512, upper clothes and dress)
    #[must_use]
    pub fn garment() -> Self {
        Self {
            input_size: [512, 512],
            selected_classes: [CLASS_UPPER_CLOTHES, CLASS_DRESS].into_iter().collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load a JSON document of overrides on top of the defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - JSON is malformed or carries values of the wrong type
    /// - Resulting configuration fails [`PipelineConfig::validate`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Parse a JSON document of overrides on top of the defaults
    ///
    /// # Errors
    /// - JSON is malformed or fails validation
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| EditError::invalid_config(format!("malformed pipeline config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Network input as `(width, height)`
    #[must_use]
    pub fn input_dimensions(&self) -> (u32, u32) {
        (self.input_size[0], self.input_size[1])
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Zero input size, or upscale factor outside 1-8
    /// - Even or zero kernel sizes
    /// - Non-positive standard deviations or blur sigmas
    /// - Threshold outside (0, 1), non-positive gamma, or tolerance outside (0, 1)
    pub fn validate(&self) -> Result<()> {
        if self.input_size[0] == 0 || self.input_size[1] == 0 {
            return Err(EditError::invalid_config(format!(
                "input size must be non-zero, got {}x{}",
                self.input_size[0], self.input_size[1]
            )));
        }

        if self.std_values.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(EditError::invalid_config(format!(
                "std values must be positive, got {:?}",
                self.std_values
            )));
        }

        if !(1..=MAX_UPSCALE_FACTOR).contains(&self.upscale_factor) {
            return Err(EditError::config_value_error(
                "upscale factor",
                self.upscale_factor,
                "1-8",
                Some(4),
            ));
        }

        for (name, kernel, recommended) in [
            ("class smoothing kernel", self.class_smoothing_kernel, 3),
            ("open kernel", self.open_kernel, 7),
            ("dilate kernel", self.dilate_kernel, 9),
            ("close kernel", self.close_kernel, 15),
            ("saliency close kernel", self.saliency_close_kernel, 3),
        ] {
            if kernel == 0 || kernel % 2 == 0 || kernel > MAX_KERNEL {
                return Err(EditError::config_value_error(
                    name,
                    kernel,
                    "odd values 1-511",
                    Some(recommended),
                ));
            }
        }

        for (name, sigma, recommended) in [
            ("edge blur sigma", self.edge_blur_sigma, 5.0),
            ("contour blur sigma", self.contour_blur_sigma, 7.0),
            ("saliency blur sigma", self.saliency_blur_sigma, 0.8),
        ] {
            if !sigma.is_finite() || sigma <= 0.0 {
                return Err(EditError::config_value_error(
                    name,
                    sigma,
                    "> 0",
                    Some(recommended),
                ));
            }
        }

        if !(self.saliency_threshold > 0.0 && self.saliency_threshold < 1.0) {
            return Err(EditError::config_value_error(
                "saliency threshold",
                self.saliency_threshold,
                "0-1 (exclusive)",
                Some(0.2),
            ));
        }

        if !self.saliency_gamma.is_finite() || self.saliency_gamma <= 0.0 {
            return Err(EditError::config_value_error(
                "saliency gamma",
                self.saliency_gamma,
                "> 0",
                Some(0.5),
            ));
        }

        if !(self.contour_tolerance_fraction > 0.0 && self.contour_tolerance_fraction < 1.0) {
            return Err(EditError::config_value_error(
                "contour tolerance fraction",
                self.contour_tolerance_fraction,
                "0-1 (exclusive)",
                Some(0.01),
            ));
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Start from an existing configuration, e.g. a preset
    #[must_use]
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn input_size(mut self, width: u32, height: u32) -> Self {
        self.config.input_size = [width, height];
        self
    }

    #[must_use]
    pub fn normalization(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.config.mean_values = mean;
        self.config.std_values = std;
        self
    }

    #[must_use]
    pub fn channel_order(mut self, order: ChannelOrder) -> Self {
        self.config.channel_order = order;
        self
    }

    #[must_use]
    pub fn selected_classes<I: IntoIterator<Item = u8>>(mut self, classes: I) -> Self {
        self.config.selected_classes = classes.into_iter().collect();
        self
    }

    #[must_use]
    pub fn upscale_factor(mut self, factor: u32) -> Self {
        self.config.upscale_factor = factor;
        self
    }

    /// Set opening, dilation and closing kernel sizes of the edge-straightening pass
    #[must_use]
    pub fn edge_kernels(mut self, open: u32, dilate: u32, close: u32) -> Self {
        self.config.open_kernel = open;
        self.config.dilate_kernel = dilate;
        self.config.close_kernel = close;
        self
    }

    #[must_use]
    pub fn contour_tolerance_fraction(mut self, fraction: f32) -> Self {
        self.config.contour_tolerance_fraction = fraction;
        self
    }

    #[must_use]
    pub fn saliency_threshold(mut self, threshold: f32) -> Self {
        self.config.saliency_threshold = threshold;
        self
    }

    #[must_use]
    pub fn saliency_gamma(mut self, gamma: f32) -> Self {
        self.config.saliency_gamma = gamma;
        self
    }

    #[must_use]
    pub fn normalize_saliency(mut self, normalize: bool) -> Self {
        self.config.normalize_saliency = normalize;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    /// Set both intra and inter threads (inter = threads/2, minimum 1; 0 = auto)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Service-level configuration for the photo editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditorConfig {
    /// Pipeline used for background removal and replacement
    pub background: PipelineConfig,
    /// Pipeline used for garment replacement
    pub garment: PipelineConfig,
    pub background_model: Option<PathBuf>,
    pub garment_model: Option<PathBuf>,
    pub backend: BackendType,
    /// Directory holding garment images and uploaded backgrounds
    pub asset_dir: PathBuf,
    /// Garment style name to asset identifier
    pub garment_styles: BTreeMap<String, String>,
    /// Style used when a request names an unknown style
    pub default_garment_style: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        let garment_styles = [
            ("formal", "Suit.png"),
            ("business", "BusinessCasual.png"),
            ("dress", "FormalDress.png"),
        ]
        .into_iter()
        .map(|(style, asset)| (style.to_string(), asset.to_string()))
        .collect();

        Self {
            background: PipelineConfig::saliency(),
            garment: PipelineConfig::garment(),
            background_model: None,
            garment_model: None,
            backend: BackendType::default(),
            asset_dir: PathBuf::from("assets"),
            garment_styles,
            default_garment_style: "formal".to_string(),
        }
    }
}

impl EditorConfig {
    /// Load editor configuration from a JSON file
    ///
    /// # Errors
    /// - File cannot be read, JSON is malformed, or a pipeline fails validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| EditError::invalid_config(format!("malformed editor config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// - Either pipeline fails validation
    /// - Default garment style is missing from the catalogue
    pub fn validate(&self) -> Result<()> {
        self.background.validate()?;
        self.garment.validate()?;
        if !self.garment_styles.contains_key(&self.default_garment_style) {
            return Err(EditError::invalid_config(format!(
                "default garment style '{}' is not in the style catalogue",
                self.default_garment_style
            )));
        }
        Ok(())
    }

    /// Asset identifier for a garment style, falling back to the default style
    #[must_use]
    pub fn garment_asset_for(&self, style: &str) -> Option<&str> {
        let key = style.trim().to_lowercase();
        self.garment_styles
            .get(&key)
            .or_else(|| self.garment_styles.get(&self.default_garment_style))
            .map(String::as_str)
    }
}
