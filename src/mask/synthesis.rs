//! Raw score volume to label mask conversion

use crate::{
    config::PipelineConfig,
    error::Result,
    types::{LabelMask, ProbabilityMap},
    utils::validation::TensorValidator,
};
use image::{GrayImage, Luma};
use ndarray::Array4;

/// Converts network output into a [`LabelMask`]
///
/// A volume with one channel is treated as a saliency logit map, anything
/// wider as per-class scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskSynthesizer {
    normalize_probabilities: bool,
    min_peak: f32,
}

impl MaskSynthesizer {
    /// `min_peak` is the raw probability a saliency map must reach before it
    /// is stretched; weaker maps are kept as plain sigmoid output.
    #[must_use]
    pub fn new(normalize_probabilities: bool, min_peak: f32) -> Self {
        Self {
            normalize_probabilities,
            min_peak,
        }
    }

    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.normalize_saliency, config.saliency_threshold)
    }

    /// # Errors
    /// - Volume is malformed (see [`TensorValidator::validate_score_volume`])
    pub fn synthesize(&self, volume: &Array4<f32>) -> Result<LabelMask> {
        let (classes, height, width) = TensorValidator::validate_score_volume(volume)?;
        log::debug!("Synthesizing label mask from {classes}x{height}x{width} score volume");

        if classes == 1 {
            Ok(LabelMask::Probability(probability_map(
                volume,
                self.normalize_probabilities,
                self.min_peak,
            )))
        } else {
            Ok(LabelMask::Classes {
                labels: argmax_labels(volume),
                num_classes: classes,
            })
        }
    }
}

/// Per-pixel arg-max over the class axis; the lowest class index wins ties
///
/// Expects a validated `(1, C, H, W)` volume with `C <= 256`.
#[must_use]
pub fn argmax_labels(volume: &Array4<f32>) -> GrayImage {
    let (_, classes, height, width) = volume.dim();
    let mut labels = GrayImage::new(width as u32, height as u32);

    for y in 0..height {
        for x in 0..width {
            let mut best_class = 0usize;
            let mut best_score = volume[[0, 0, y, x]];
            for c in 1..classes {
                let score = volume[[0, c, y, x]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }
            labels.put_pixel(x as u32, y as u32, Luma([best_class as u8]));
        }
    }

    labels
}

/// Numerically stable logistic function
#[must_use]
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Sigmoid of channel 0, optionally min-max stretched onto `[0, 1]`
///
/// The stretch only runs when the map peaks at `min_peak` or above. A map
/// with no subject stays low instead of being blown up to the full range,
/// and a constant map has no range to stretch at all.
#[must_use]
pub fn probability_map(volume: &Array4<f32>, normalize: bool, min_peak: f32) -> ProbabilityMap {
    let (_, _, height, width) = volume.dim();
    let mut map = ProbabilityMap::new(width as u32, height as u32);

    for y in 0..height {
        for x in 0..width {
            map.put_pixel(x as u32, y as u32, Luma([sigmoid(volume[[0, 0, y, x]])]));
        }
    }

    if normalize {
        let (min, max) = map
            .pixels()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p[0]), hi.max(p[0]))
            });
        let range = max - min;
        if max < min_peak {
            log::debug!("Saliency peak {max:.4} below {min_peak}, skipping normalization");
        } else if range > f32::EPSILON {
            for p in map.pixels_mut() {
                p[0] = ((p[0] - min) / range).clamp(0.0, 1.0);
            }
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{class_volume, logit_volume};
    use crate::error::EditError;

    #[test]
    fn test_sigmoid_is_stable() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-7);
        assert!(sigmoid(1000.0) <= 1.0 && sigmoid(1000.0) > 0.999);
        assert!(sigmoid(-1000.0) >= 0.0 && sigmoid(-1000.0) < 1e-6);
        assert!(!sigmoid(-1000.0).is_nan());
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_argmax_picks_highest_score() {
        let volume = class_volume(5, 4, 6, |y, x| (x + y) % 5);
        let labels = argmax_labels(&volume);
        assert_eq!(labels.dimensions(), (6, 4));
        for (x, y, p) in labels.enumerate_pixels() {
            assert_eq!(p[0] as usize, (x as usize + y as usize) % 5);
        }
    }

    #[test]
    fn test_argmax_ties_lowest_index_wins() {
        let mut volume = Array4::<f32>::zeros((1, 4, 1, 2));
        volume[[0, 2, 0, 0]] = 3.0;
        volume[[0, 3, 0, 0]] = 3.0;
        let labels = argmax_labels(&volume);
        assert_eq!(labels.get_pixel(0, 0)[0], 2);
        // all-zero scores resolve to class 0
        assert_eq!(labels.get_pixel(1, 0)[0], 0);
    }

    #[test]
    fn test_argmax_is_deterministic() {
        let volume = Array4::from_shape_fn((1, 18, 16, 16), |(_, c, y, x)| {
            ((c * 31 + y * 7 + x * 13) % 17) as f32
        });
        let synthesizer = MaskSynthesizer::new(true, 0.2);
        let first = synthesizer.synthesize(&volume).unwrap();
        let second = synthesizer.synthesize(&volume).unwrap();
        assert_eq!(first, second);
        match first {
            LabelMask::Classes { labels, num_classes } => {
                assert_eq!(num_classes, 18);
                assert!(labels.pixels().all(|p| (p[0] as usize) < 18));
            },
            LabelMask::Probability(_) => panic!("expected class labels"),
        }
    }

    #[test]
    fn test_single_channel_yields_probabilities() {
        let volume = logit_volume(3, 3, |y, x| (y as f32 - 1.0) * 4.0 + x as f32);
        let mask = MaskSynthesizer::new(true, 0.2).synthesize(&volume).unwrap();
        let LabelMask::Probability(map) = mask else {
            panic!("expected probability map");
        };
        let values: Vec<f32> = map.pixels().map(|p| p[0]).collect();
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        assert!(min.abs() < 1e-6);
        assert!((max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalization_can_be_disabled() {
        let volume = logit_volume(1, 2, |_, x| if x == 0 { -1.0 } else { 1.0 });
        let map = probability_map(&volume, false, 0.2);
        assert!((map.get_pixel(0, 0)[0] - sigmoid(-1.0)).abs() < 1e-6);
        assert!((map.get_pixel(1, 0)[0] - sigmoid(1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_constant_map_is_not_stretched() {
        let volume = logit_volume(4, 4, |_, _| -6.0);
        let map = probability_map(&volume, true, 0.0);
        for p in map.pixels() {
            assert!((p[0] - sigmoid(-6.0)).abs() < 1e-7);
        }
    }

    #[test]
    fn test_weak_varying_map_is_not_stretched() {
        let volume = logit_volume(320, 320, |y, x| -6.0 + 0.001 * ((x + y) % 3) as f32);
        let LabelMask::Probability(map) = MaskSynthesizer::new(true, 0.2)
            .synthesize(&volume)
            .unwrap()
        else {
            panic!("expected probability map");
        };
        let max = map.pixels().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max);
        assert!(max < 0.01, "max = {max}");
        assert!((map.get_pixel(0, 0)[0] - sigmoid(-6.0)).abs() < 1e-6);
    }

    #[test]
    fn test_strong_map_is_still_stretched() {
        let volume = logit_volume(2, 2, |y, x| if x + y == 0 { 3.0 } else { -3.0 });
        let map = probability_map(&volume, true, 0.2);
        assert!((map.get_pixel(0, 0)[0] - 1.0).abs() < 1e-6);
        assert!(map.get_pixel(1, 1)[0].abs() < 1e-6);
    }

    #[test]
    fn test_zero_classes_is_invalid_model_output() {
        let volume = Array4::<f32>::zeros((1, 0, 4, 4));
        let result = MaskSynthesizer::new(true, 0.2).synthesize(&volume);
        assert!(matches!(result, Err(EditError::InvalidModelOutput(_))));
    }
}
