//! Error types for portrait editing operations

use thiserror::Error;

/// Result type alias for editing operations
pub type Result<T> = std::result::Result<T, EditError>;

/// Error taxonomy for the segmentation and compositing pipeline
///
/// An empty selection is deliberately absent here: it is reported through
/// [`crate::compositor::CompositeOutcome::NothingToReplace`].
#[derive(Error, Debug)]
pub enum EditError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec errors
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// The input photo cannot be processed (zero dimension, unreadable)
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// The inference engine returned a tensor the pipeline cannot interpret
    #[error("Invalid model output: {0}")]
    InvalidModelOutput(String),

    /// A replacement asset identifier did not resolve to any stored asset
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// A replacement asset exists but could not be decoded
    #[error("Asset could not be decoded: {0}")]
    AssetDecode(String),

    /// The inference engine failed even after its session was rebuilt
    #[error("Inference unavailable: {0}")]
    InferenceUnavailable(String),

    /// A single inference attempt failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// No photo session is registered under the given identifier
    #[error("Unknown photo: {0}")]
    UnknownPhoto(String),

    /// The undo stack is empty
    #[error("Nothing to undo")]
    NothingToUndo,

    /// The redo stack is empty
    #[error("Nothing to redo")]
    NothingToRedo,

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EditError {
    pub fn invalid_image<S: Into<String>>(msg: S) -> Self {
        Self::InvalidImage(msg.into())
    }

    pub fn invalid_model_output<S: Into<String>>(msg: S) -> Self {
        Self::InvalidModelOutput(msg.into())
    }

    pub fn asset_not_found<S: Into<String>>(id: S) -> Self {
        Self::AssetNotFound(id.into())
    }

    pub fn asset_decode<S: Into<String>>(msg: S) -> Self {
        Self::AssetDecode(msg.into())
    }

    pub fn inference_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::InferenceUnavailable(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create inference error with provider context
    pub fn inference_error_with_provider(provider: &str, operation: &str, error: &str) -> Self {
        Self::Inference(format!(
            "{} failed using '{}' provider: {}",
            operation, provider, error
        ))
    }

    /// Whether the user can fix the problem by supplying different input
    #[must_use]
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::InvalidImage(_)
                | Self::AssetNotFound(_)
                | Self::AssetDecode(_)
                | Self::InvalidConfig(_)
                | Self::Image(_)
        )
    }

    /// Actionable message suitable for showing to the person editing the photo
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidImage(_) | Self::Image(_) => {
                "The photo could not be read - upload a JPEG or PNG image.".to_string()
            },
            Self::InvalidModelOutput(_) | Self::Model(_) => {
                "The segmentation model is misconfigured - contact support.".to_string()
            },
            Self::AssetNotFound(id) => format!("Replacement asset '{}' is missing.", id),
            Self::AssetDecode(_) => {
                "The replacement asset is corrupt - upload it again.".to_string()
            },
            Self::InferenceUnavailable(_) | Self::Inference(_) => {
                "The segmentation engine is unavailable - try again shortly.".to_string()
            },
            Self::InvalidConfig(msg) => format!("Invalid request: {}", msg),
            Self::UnknownPhoto(_) => "No image loaded.".to_string(),
            Self::NothingToUndo => "There is nothing to undo.".to_string(),
            Self::NothingToRedo => "There is nothing to redo.".to_string(),
            Self::Io(_) | Self::Internal(_) => {
                "Unexpected internal error - the photo was left unchanged.".to_string()
            },
        }
    }
}
