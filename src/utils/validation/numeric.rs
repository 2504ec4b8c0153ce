//! Numeric validation utilities
//!
//! Provides safe numeric conversions and range validation for edit
//! parameters supplied by callers.

use crate::error::{EditError, Result};

/// Validator for numeric operations and conversions
pub struct NumericValidator;

impl NumericValidator {
    /// Safely convert f32 to u32 with bounds checking
    ///
    /// # Errors
    /// - Value is non-finite, negative, or exceeds `u32::MAX`
    pub fn validate_f32_to_u32(value: f32) -> Result<u32> {
        if !value.is_finite() {
            return Err(EditError::invalid_config(format!(
                "Cannot convert non-finite value {} to u32",
                value
            )));
        }

        if value < 0.0 {
            return Err(EditError::invalid_config(format!(
                "Cannot convert negative value {} to u32",
                value
            )));
        }

        if value > u32::MAX as f32 {
            return Err(EditError::invalid_config(format!(
                "Value {} exceeds u32::MAX ({})",
                value,
                u32::MAX
            )));
        }

        Ok(value as u32)
    }

    /// Validate a brightness or contrast adjustment (-100 to 100)
    ///
    /// # Errors
    /// - Value outside -100..=100
    pub fn validate_adjustment(name: &str, value: i32) -> Result<i32> {
        if !(-100..=100).contains(&value) {
            return Err(EditError::config_value_error(
                name,
                value,
                "-100 to 100",
                Some(0),
            ));
        }
        Ok(value)
    }

    /// Validate a physical length in millimetres
    ///
    /// # Errors
    /// - Value is non-finite or not strictly positive (zero allowed when `allow_zero`)
    pub fn validate_millimetres(name: &str, value: f32, allow_zero: bool) -> Result<f32> {
        let valid = value.is_finite() && (value > 0.0 || (allow_zero && value == 0.0));
        if !valid {
            return Err(EditError::invalid_config(format!(
                "{} must be {} millimetres, got {}",
                name,
                if allow_zero { "a non-negative number of" } else { "a positive number of" },
                value
            )));
        }
        Ok(value)
    }
}
