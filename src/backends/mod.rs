//! Inference backends
//!
//! - ONNX Runtime backend (native, optional GPU acceleration)
//! - Tract backend (pure Rust, CPU only)
//! - Mock backend with scripted score volumes for tests

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;
