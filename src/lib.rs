#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # idphoto-edit
//!
//! Background and garment replacement for ID photos, driven by segmentation
//! networks running on ONNX Runtime or Tract.
//!
//! A segmentation network scores every pixel. The scores become a label mask,
//! the label mask is refined into a smooth-edged binary mask, and the mask
//! decides where a replacement colour or image is painted over the photo.
//! Crop, resize, face centering, brightness/contrast and print-sheet layout
//! round out the editing surface, with per-photo undo and redo.
//!
//! ## Features
//!
//! - **Two pipelines**: a saliency network for the subject and an 18-class
//!   clothes parser for garments
//! - **Multiple Backends**: ONNX Runtime (GPU acceleration) and Tract (Pure Rust)
//! - **Recovery**: a failed inference refreshes the session and retries once
//! - **Assets**: solid colours, stored images and garment styles, with alpha respected
//! - **History**: undo, redo and reset per open photo
//! - **CLI Integration**: Optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use idphoto_edit::{AssetSpec, EditorConfig, GarmentSource, ImageIOService, PhotoEditor};
//!
//! # fn example() -> anyhow::Result<()> {
//! let mut config = EditorConfig::default();
//! config.background_model = Some("models/u2net.onnx".into());
//! config.garment_model = Some("models/clothes.onnx".into());
//! let editor = PhotoEditor::from_config(config)?;
//!
//! let id = editor.open(ImageIOService::load_image("portrait.jpg")?)?;
//! editor.replace_background(&id, &AssetSpec::parse("#ffffff")?)?;
//! let summary = editor.replace_garment(&id, &GarmentSource::Style("formal".into()))?;
//! if !summary.applied {
//!     println!("no clothing found");
//! }
//! editor.current(&id)?.save("portrait_edited.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): Command-line interface and tracing subscriber setup
//! - `webp-support` (default): WebP image format support
//! - `tracing-json`: JSON log output for the CLI
//!
//! To use only as a library without CLI dependencies:
//!
//! ```toml
//! [dependencies]
//! idphoto-edit = { version = "0.1", default-features = false, features = ["onnx"] }
//! ```

pub mod adjust;
pub mod assets;
pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod editor;
pub mod error;
pub mod face;
pub mod inference;
pub mod mask;
pub mod models;
pub mod processor;
pub mod services;
pub mod session;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use adjust::{AspectRatio, CropRequest, Enhancement, LayoutSpec};
pub use assets::{
    parse_hex_color, AssetLoader, AssetSpec, AssetStore, FsAssetStore, MemoryAssetStore,
    ReplacementAsset,
};
pub use backends::test_utils as testing;
#[cfg(feature = "onnx")]
pub use backends::OnnxBackend;
#[cfg(feature = "tract")]
pub use backends::TractBackend;
pub use compositor::{composite, cut_out, CompositeMode, CompositeOutcome};
pub use config::{EditorConfig, ExecutionProvider, PipelineConfig, PipelineConfigBuilder};
pub use editor::{EditSummary, GarmentSource, PhotoEditor};
pub use error::{EditError, Result};
pub use face::{FaceBounds, FaceDetector};
pub use inference::InferenceBackend;
pub use mask::{MaskRefiner, MaskSynthesizer};
pub use models::{BackendType, ModelSpec};
pub use processor::{BackendFactory, DefaultBackendFactory, SegmentationPipeline};
pub use services::{ImageIOService, OutputFormat};
pub use session::{EditKind, PhotoState};
pub use types::{
    EditResult, LabelMask, ProbabilityMap, ProcessingTimings, RefinedMask, Region, SelectionRule,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, spans, TracingConfig, TracingFormat};
