//! Model file specification and backend selection

use crate::error::{EditError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Backend type enumeration for runtime selection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = EditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "onnx" | "ort" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(EditError::invalid_config(format!(
                "unknown backend '{}' (expected onnx or tract)",
                other
            ))),
        }
    }
}

/// A segmentation network on disk and the runtime that should execute it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub path: PathBuf,
    pub backend: BackendType,
}

impl ModelSpec {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P, backend: BackendType) -> Self {
        Self {
            path: path.into(),
            backend,
        }
    }

    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        format!(
            "{}:{}",
            self.backend,
            self.path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
        )
    }

    /// Check that the model file exists and looks like an ONNX file
    ///
    /// # Errors
    /// - File does not exist or is not a regular file
    /// - Extension is not `.onnx`
    pub fn validate(&self) -> Result<()> {
        if !self.path.is_file() {
            return Err(EditError::model(format!(
                "model file not found: {}",
                self.path.display()
            )));
        }
        let is_onnx = self
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
        if !is_onnx {
            return Err(EditError::model(format!(
                "model file must have an .onnx extension: {}",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Read the model bytes
    ///
    /// # Errors
    /// - Validation fails or the file cannot be read
    pub fn load_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let data = std::fs::read(&self.path).map_err(|e| {
            EditError::model(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        log::debug!(
            "Loaded model {} ({:.2} MB)",
            self.display_name(),
            data.len() as f64 / (1024.0 * 1024.0)
        );
        Ok(data)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
