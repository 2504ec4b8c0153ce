//! Tensor validation utilities
//!
//! Provides centralized validation for tensor shapes, score volumes and
//! image dimensions.

use crate::error::{EditError, Result};
use ndarray::Array4;

/// Validator for tensor operations and shape validation
pub struct TensorValidator;

impl TensorValidator {
    /// Largest class count representable in an 8-bit label map
    pub const MAX_CLASSES: usize = 256;

    /// Validate tensor shape matches expected dimensions
    ///
    /// # Errors
    /// - Shape differs from `expected_shape`
    pub fn validate_tensor_shape(
        tensor: &Array4<f32>,
        expected_shape: (usize, usize, usize, usize),
    ) -> Result<()> {
        let actual = tensor.dim();
        if actual != expected_shape {
            let (batch, channels, height, width) = expected_shape;
            return Err(EditError::internal(format!(
                "Tensor shape mismatch. Expected [{}, {}, {}, {}], got [{}, {}, {}, {}]",
                batch, channels, height, width, actual.0, actual.1, actual.2, actual.3
            )));
        }
        Ok(())
    }

    /// Validate a raw network output and return `(classes, height, width)`
    ///
    /// # Errors
    /// - Batch size other than 1
    /// - Zero classes, or more than an 8-bit label map can hold
    /// - Zero spatial extent
    /// - Non-finite scores
    pub fn validate_score_volume(volume: &Array4<f32>) -> Result<(usize, usize, usize)> {
        let (batch, classes, height, width) = volume.dim();

        if batch != 1 {
            return Err(EditError::invalid_model_output(format!(
                "expected batch size 1, got {}",
                batch
            )));
        }

        if classes == 0 {
            return Err(EditError::invalid_model_output(
                "score volume has zero classes",
            ));
        }

        if classes > Self::MAX_CLASSES {
            return Err(EditError::invalid_model_output(format!(
                "score volume has {} classes, at most {} are supported",
                classes,
                Self::MAX_CLASSES
            )));
        }

        if height == 0 || width == 0 {
            return Err(EditError::invalid_model_output(format!(
                "score volume has empty spatial extent {}x{}",
                width, height
            )));
        }

        if volume.iter().any(|v| v.is_nan()) {
            return Err(EditError::invalid_model_output("score volume contains NaN"));
        }

        Ok((classes, height, width))
    }

    /// Validate image dimensions are within reasonable bounds
    ///
    /// # Errors
    /// - Either side is zero or exceeds 16384 pixels
    pub fn validate_image_dimensions(width: u32, height: u32) -> Result<()> {
        const MAX_DIMENSION: u32 = 16384; // 16K pixels
        const MIN_DIMENSION: u32 = 1;

        if width < MIN_DIMENSION || height < MIN_DIMENSION {
            return Err(EditError::invalid_image(format!(
                "Image dimensions too small: {}x{}. Minimum: {}x{}",
                width, height, MIN_DIMENSION, MIN_DIMENSION
            )));
        }

        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(EditError::invalid_image(format!(
                "Image dimensions too large: {}x{}. Maximum: {}x{}",
                width, height, MAX_DIMENSION, MAX_DIMENSION
            )));
        }

        Ok(())
    }

    /// Validate mask buffer length against its dimensions
    ///
    /// # Errors
    /// - Length differs from `width * height`
    pub fn validate_mask_dimensions(mask_data_len: usize, width: u32, height: u32) -> Result<()> {
        let expected = (width as usize) * (height as usize);
        if mask_data_len != expected {
            return Err(EditError::internal(format!(
                "Mask data length {} does not match dimensions {}x{} ({} pixels)",
                mask_data_len, width, height, expected
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_tensor_shape() {
        let tensor = Array4::<f32>::zeros((1, 3, 32, 16));
        assert!(TensorValidator::validate_tensor_shape(&tensor, (1, 3, 32, 16)).is_ok());
        assert!(TensorValidator::validate_tensor_shape(&tensor, (1, 3, 16, 32)).is_err());
    }

    #[test]
    fn test_validate_score_volume() {
        let volume = Array4::<f32>::zeros((1, 18, 128, 128));
        assert_eq!(
            TensorValidator::validate_score_volume(&volume).unwrap(),
            (18, 128, 128)
        );
    }

    #[test]
    fn test_score_volume_rejections() {
        let zero_classes = Array4::<f32>::zeros((1, 0, 8, 8));
        assert!(matches!(
            TensorValidator::validate_score_volume(&zero_classes),
            Err(EditError::InvalidModelOutput(_))
        ));

        let batch_two = Array4::<f32>::zeros((2, 1, 8, 8));
        assert!(TensorValidator::validate_score_volume(&batch_two).is_err());

        let too_many = Array4::<f32>::zeros((1, 300, 1, 1));
        assert!(TensorValidator::validate_score_volume(&too_many).is_err());

        let empty = Array4::<f32>::zeros((1, 1, 0, 8));
        assert!(TensorValidator::validate_score_volume(&empty).is_err());

        let mut nan = Array4::<f32>::zeros((1, 1, 2, 2));
        nan[[0, 0, 1, 1]] = f32::NAN;
        assert!(TensorValidator::validate_score_volume(&nan).is_err());
    }

    #[test]
    fn test_validate_image_dimensions() {
        assert!(TensorValidator::validate_image_dimensions(1, 1).is_ok());
        assert!(matches!(
            TensorValidator::validate_image_dimensions(0, 10),
            Err(EditError::InvalidImage(_))
        ));
        assert!(TensorValidator::validate_image_dimensions(20000, 10).is_err());
    }

    #[test]
    fn test_validate_mask_dimensions() {
        assert!(TensorValidator::validate_mask_dimensions(12, 4, 3).is_ok());
        assert!(TensorValidator::validate_mask_dimensions(11, 4, 3).is_err());
    }
}
