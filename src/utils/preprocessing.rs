//! Image to tensor preprocessing
//!
//! Turns an arbitrary-resolution photo into the fixed `(1, 3, H, W)`
//! channel-first tensor a segmentation network expects: area-averaged resize
//! to the network resolution, channel reordering, scaling to `[0, 1]` and
//! per-channel mean/std normalization.

use crate::{
    config::{ChannelOrder, PipelineConfig},
    error::Result,
    utils::validation::TensorValidator,
};
use image::{DynamicImage, Rgb, Rgb32FImage, RgbImage};
use ndarray::Array4;

/// Contribution of each source pixel to one destination pixel along an axis
type AxisWeights = Vec<Vec<(usize, f32)>>;

/// Pure preprocessing stage configured from a [`PipelineConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct TensorPreprocessor {
    width: u32,
    height: u32,
    /// Mean per tensor channel, in the network's channel order
    mean: [f32; 3],
    /// Standard deviation per tensor channel, in the network's channel order
    std: [f32; 3],
    channel_order: ChannelOrder,
}

impl TensorPreprocessor {
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        let (width, height) = config.input_dimensions();
        Self {
            width,
            height,
            mean: config.mean_values,
            std: config.std_values,
            channel_order: config.channel_order,
        }
    }

    /// Shape of every tensor this preprocessor produces
    #[must_use]
    pub fn target_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, self.height as usize, self.width as usize)
    }

    /// Preprocess image for model inference
    ///
    /// The alpha channel, if any, is dropped.
    ///
    /// # Errors
    /// - Image has a zero dimension or exceeds the supported size
    pub fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>> {
        TensorValidator::validate_image_dimensions(image.width(), image.height())?;

        let rgb = image.to_rgb8();
        let resized = area_resize(&rgb, self.width, self.height);

        let source_channel = match self.channel_order {
            ChannelOrder::Rgb => [0usize, 1, 2],
            ChannelOrder::Bgr => [2usize, 1, 0],
        };

        let mut tensor = Array4::<f32>::zeros(self.target_shape());
        for (x, y, pixel) in resized.enumerate_pixels() {
            for (c, &src) in source_channel.iter().enumerate() {
                let scaled = pixel[src] / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (scaled - self.mean[c]) / self.std[c];
            }
        }

        Ok(tensor)
    }
}

/// Resize with area averaging on shrinking axes and linear interpolation on growing axes
///
/// Output values stay in the `0..=255` range of the input but keep their
/// fractional part so normalization sees the exact averages.
#[must_use]
pub fn area_resize(image: &RgbImage, width: u32, height: u32) -> Rgb32FImage {
    let (src_w, src_h) = image.dimensions();
    let x_weights = axis_weights(src_w, width);
    let y_weights = axis_weights(src_h, height);

    // Horizontal pass: src_h rows of `width` pixels
    let mut horizontal = vec![[0.0f32; 3]; (width as usize) * (src_h as usize)];
    for y in 0..src_h {
        for (dx, taps) in x_weights.iter().enumerate() {
            let mut acc = [0.0f32; 3];
            for &(sx, w) in taps {
                let p = image.get_pixel(sx as u32, y);
                for c in 0..3 {
                    acc[c] += f32::from(p[c]) * w;
                }
            }
            horizontal[y as usize * width as usize + dx] = acc;
        }
    }

    // Vertical pass
    let mut output = Rgb32FImage::new(width, height);
    for (dy, taps) in y_weights.iter().enumerate() {
        for dx in 0..width as usize {
            let mut acc = [0.0f32; 3];
            for &(sy, w) in taps {
                let p = horizontal[sy * width as usize + dx];
                for c in 0..3 {
                    acc[c] += p[c] * w;
                }
            }
            output.put_pixel(dx as u32, dy as u32, Rgb(acc));
        }
    }

    output
}

fn axis_weights(src: u32, dst: u32) -> AxisWeights {
    let scale = src as f32 / dst as f32;
    let last = src.saturating_sub(1) as usize;

    (0..dst)
        .map(|d| {
            if scale >= 1.0 {
                // Fractional box covering [d * scale, (d + 1) * scale)
                let start = d as f32 * scale;
                let end = (start + scale).min(src as f32);
                let first = start.floor() as usize;
                let stop = (end.ceil() as usize).min(src as usize);
                (first..stop)
                    .filter_map(|i| {
                        let overlap = end.min(i as f32 + 1.0) - start.max(i as f32);
                        (overlap > 0.0).then_some((i, overlap / scale))
                    })
                    .collect()
            } else {
                let centre = ((d as f32 + 0.5) * scale - 0.5).max(0.0);
                let lo = (centre.floor() as usize).min(last);
                let hi = (lo + 1).min(last);
                let frac = centre - lo as f32;
                if hi == lo || frac <= 0.0 {
                    vec![(lo, 1.0)]
                } else {
                    vec![(lo, 1.0 - frac), (hi, frac)]
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn create_test_image(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(width, height, Rgb(color));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_tensor_shape_is_fixed_for_any_input() {
        let preprocessor = TensorPreprocessor::from_config(&PipelineConfig::garment());
        for (w, h) in [(100, 100), (1, 1), (1920, 1080), (37, 613)] {
            let tensor = preprocessor.preprocess(&create_test_image(w, h, [10, 20, 30])).unwrap();
            assert_eq!(tensor.shape(), &[1, 3, 512, 512]);
        }
    }

    #[test]
    fn test_non_square_input_size() {
        let config = PipelineConfig::builder().input_size(64, 32).build().unwrap();
        let tensor = TensorPreprocessor::from_config(&config)
            .preprocess(&create_test_image(100, 100, [0, 0, 0]))
            .unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 32, 64]);
    }

    #[test]
    fn test_normalization_values() {
        let config = PipelineConfig::builder()
            .input_size(4, 4)
            .normalization([0.5, 0.5, 0.5], [0.5, 0.25, 1.0])
            .build()
            .unwrap();
        let tensor = TensorPreprocessor::from_config(&config)
            .preprocess(&create_test_image(10, 10, [255, 0, 255]))
            .unwrap();

        assert!((tensor[[0, 0, 1, 1]] - 1.0).abs() < 1e-5);
        assert!((tensor[[0, 1, 1, 1]] + 2.0).abs() < 1e-5);
        assert!((tensor[[0, 2, 1, 1]] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_bgr_channel_order() {
        let config = PipelineConfig::builder()
            .input_size(2, 2)
            .normalization([0.0; 3], [1.0; 3])
            .channel_order(ChannelOrder::Bgr)
            .build()
            .unwrap();
        let tensor = TensorPreprocessor::from_config(&config)
            .preprocess(&create_test_image(2, 2, [255, 0, 0]))
            .unwrap();

        assert!((tensor[[0, 0, 0, 0]]).abs() < 1e-6);
        assert!((tensor[[0, 2, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_area_resize_averages_blocks() {
        let mut img = RgbImage::new(4, 2);
        for (x, _, p) in img.enumerate_pixels_mut() {
            *p = if x < 2 { Rgb([0, 0, 0]) } else { Rgb([200, 100, 50]) };
        }
        let resized = area_resize(&img, 1, 1);
        let p = resized.get_pixel(0, 0);
        assert!((p[0] - 100.0).abs() < 1e-3);
        assert!((p[1] - 50.0).abs() < 1e-3);
        assert!((p[2] - 25.0).abs() < 1e-3);

        let halves = area_resize(&img, 2, 1);
        assert!(halves.get_pixel(0, 0)[0].abs() < 1e-3);
        assert!((halves.get_pixel(1, 0)[0] - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_area_resize_fractional_scale() {
        let mut img = RgbImage::new(3, 1);
        img.put_pixel(0, 0, Rgb([30, 30, 30]));
        img.put_pixel(1, 0, Rgb([60, 60, 60]));
        img.put_pixel(2, 0, Rgb([90, 90, 90]));

        // each output pixel covers 1.5 source pixels
        let resized = area_resize(&img, 2, 1);
        assert!((resized.get_pixel(0, 0)[0] - 40.0).abs() < 1e-3);
        assert!((resized.get_pixel(1, 0)[0] - 80.0).abs() < 1e-3);
    }

    #[test]
    fn test_upscaling_preserves_uniform_color() {
        let img = RgbImage::from_pixel(3, 2, Rgb([17, 34, 51]));
        let resized = area_resize(&img, 9, 7);
        for p in resized.pixels() {
            assert!((p[0] - 17.0).abs() < 1e-3);
            assert!((p[2] - 51.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_zero_dimension_is_invalid_image() {
        let preprocessor = TensorPreprocessor::from_config(&PipelineConfig::saliency());
        let result = preprocessor.preprocess(&DynamicImage::new_rgb8(0, 5));
        assert!(matches!(result, Err(crate::error::EditError::InvalidImage(_))));
    }

    #[test]
    fn test_alpha_is_ignored() {
        let config = PipelineConfig::builder().input_size(2, 2).build().unwrap();
        let preprocessor = TensorPreprocessor::from_config(&config);
        let opaque = preprocessor
            .preprocess(&DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
                4,
                4,
                image::Rgba([10, 20, 30, 255]),
            )))
            .unwrap();
        let transparent = preprocessor
            .preprocess(&DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
                4,
                4,
                image::Rgba([10, 20, 30, 0]),
            )))
            .unwrap();
        assert_eq!(opaque, transparent);
    }
}
