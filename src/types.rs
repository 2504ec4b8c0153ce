//! Core types for masks, regions, timings and edit results

use crate::compositor::CompositeOutcome;
use crate::error::{EditError, Result};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Single-channel `f32` image used for probability maps
pub type ProbabilityMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Per-pixel label map at the network's native output resolution
#[derive(Debug, Clone, PartialEq)]
pub enum LabelMask {
    /// Arg-max class index per pixel, every value in `0..num_classes`
    Classes { labels: GrayImage, num_classes: usize },
    /// Foreground probability per pixel, every value in `[0, 1]`
    Probability(ProbabilityMap),
}

impl LabelMask {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Classes { labels, .. } => labels.dimensions(),
            Self::Probability(map) => map.dimensions(),
        }
    }
}

/// Which pixels of a label mask count as "selected"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionRule {
    /// Label is one of the given classes (garment replacement)
    Classes(BTreeSet<u8>),
    /// Label is anything but the given classes (subject = not background)
    AllExcept(BTreeSet<u8>),
    /// Probability passes the configured saliency threshold
    Threshold,
}

impl SelectionRule {
    /// Whether a class label is selected; always false for [`SelectionRule::Threshold`]
    #[must_use]
    pub fn selects(&self, label: u8) -> bool {
        match self {
            Self::Classes(classes) => classes.contains(&label),
            Self::AllExcept(classes) => !classes.contains(&label),
            Self::Threshold => false,
        }
    }
}

/// Axis-aligned rectangle in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    #[must_use]
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x
            && y >= self.y
            && u64::from(x) < u64::from(self.x) + u64::from(self.width)
            && u64::from(y) < u64::from(self.y) + u64::from(self.height)
    }

    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Selection mask at original image resolution
///
/// Garment masks hold only 0 and 255. Saliency masks keep a blurred
/// antialiasing band along the subject edge and report `soft_edges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedMask {
    /// Mask data as grayscale values (0-255), row-major
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),

    /// Whether values between 0 and 255 are intentional blend weights
    pub soft_edges: bool,
}

impl RefinedMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32), soft_edges: bool) -> Self {
        Self {
            data,
            dimensions,
            soft_edges,
        }
    }

    /// Mask with nothing selected
    #[must_use]
    pub fn empty(width: u32, height: u32) -> Self {
        Self::new(vec![0; (width as usize) * (height as usize)], (width, height), false)
    }

    #[must_use]
    pub fn from_image(image: &GrayImage, soft_edges: bool) -> Self {
        Self::new(image.as_raw().clone(), image.dimensions(), soft_edges)
    }

    /// Convert mask to a grayscale image
    ///
    /// # Errors
    /// - Data length does not match the dimensions
    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        ImageBuffer::from_raw(width, height, self.data.clone())
            .ok_or_else(|| EditError::internal("Failed to create image from mask data"))
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    /// Blend weight at a pixel, 0 outside the mask
    #[must_use]
    pub fn value(&self, x: u32, y: u32) -> u8 {
        let (width, height) = self.dimensions;
        if x >= width || y >= height {
            return 0;
        }
        self.data
            .get(y as usize * width as usize + x as usize)
            .copied()
            .unwrap_or(0)
    }

    /// True when no pixel carries any selection weight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|&v| v == 0)
    }

    /// Smallest axis-aligned rectangle containing every pixel with non-zero weight
    #[must_use]
    pub fn bounding_box(&self) -> Option<Region> {
        let (width, _) = self.dimensions;
        if width == 0 {
            return None;
        }

        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut found = false;

        for (i, &value) in self.data.iter().enumerate() {
            if value == 0 {
                continue;
            }
            let x = (i % width as usize) as u32;
            let y = (i / width as usize) as u32;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            found = true;
        }

        found.then(|| Region::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }

    /// Get mask statistics
    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let selected_pixels = self.data.iter().filter(|&&x| x > 127).count();
        let unselected_pixels = total_pixels - selected_pixels;
        let ratio = |count: usize| {
            if total_pixels == 0 {
                0.0
            } else {
                count as f32 / total_pixels as f32
            }
        };

        MaskStatistics {
            total_pixels,
            selected_pixels,
            unselected_pixels,
            selected_ratio: ratio(selected_pixels),
            unselected_ratio: ratio(unselected_pixels),
        }
    }

    /// Save mask as PNG
    ///
    /// # Errors
    /// - Mask data is inconsistent or the file cannot be written
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let image = self.to_image()?;
        image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

/// Statistics about a refined mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub selected_pixels: usize,
    pub unselected_pixels: usize,
    pub selected_ratio: f32,
    pub unselected_ratio: f32,
}

/// Timing breakdown of one pipeline run, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Model loading time (first call only)
    pub model_load_ms: u64,
    pub preprocessing_ms: u64,
    pub inference_ms: u64,
    pub synthesis_ms: u64,
    pub refinement_ms: u64,
    pub compositing_ms: u64,
    /// Total end-to-end processing time
    pub total_ms: u64,
}

impl ProcessingTimings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn measured_ms(&self) -> u64 {
        self.model_load_ms
            + self.preprocessing_ms
            + self.inference_ms
            + self.synthesis_ms
            + self.refinement_ms
            + self.compositing_ms
    }

    /// Get the "other" overhead time (unaccounted time)
    #[must_use]
    pub fn other_overhead_ms(&self) -> u64 {
        self.total_ms.saturating_sub(self.measured_ms())
    }

    #[must_use]
    pub fn breakdown_percentages(&self) -> TimingBreakdown {
        if self.total_ms == 0 {
            return TimingBreakdown::default();
        }

        let total = self.total_ms as f64;
        let pct = |ms: u64| (ms as f64 / total) * 100.0;

        TimingBreakdown {
            model_load_pct: pct(self.model_load_ms),
            preprocessing_pct: pct(self.preprocessing_ms),
            inference_pct: pct(self.inference_ms),
            synthesis_pct: pct(self.synthesis_ms),
            refinement_pct: pct(self.refinement_ms),
            compositing_pct: pct(self.compositing_ms),
            other_pct: pct(self.other_overhead_ms()),
        }
    }

    /// One-line human readable summary
    #[must_use]
    pub fn timing_summary(&self) -> String {
        let b = self.breakdown_percentages();
        let mut summary = format!(
            "Total: {}ms | Preprocess: {}ms ({:.1}%) | Inference: {}ms ({:.1}%) | Synthesis: {}ms ({:.1}%) | Refine: {}ms ({:.1}%) | Composite: {}ms ({:.1}%)",
            self.total_ms,
            self.preprocessing_ms, b.preprocessing_pct,
            self.inference_ms, b.inference_pct,
            self.synthesis_ms, b.synthesis_pct,
            self.refinement_ms, b.refinement_pct,
            self.compositing_ms, b.compositing_pct,
        );

        if self.model_load_ms > 0 {
            summary.push_str(&format!(
                " | Model load: {}ms ({:.1}%)",
                self.model_load_ms, b.model_load_pct
            ));
        }

        // Add other/overhead if significant (>1% or >5ms)
        let other_ms = self.other_overhead_ms();
        if other_ms > 5 || b.other_pct > 1.0 {
            summary.push_str(&format!(" | Other: {}ms ({:.1}%)", other_ms, b.other_pct));
        }

        summary
    }
}

/// Percentage of total time spent in each stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingBreakdown {
    pub model_load_pct: f64,
    pub preprocessing_pct: f64,
    pub inference_pct: f64,
    pub synthesis_pct: f64,
    pub refinement_pct: f64,
    pub compositing_pct: f64,
    pub other_pct: f64,
}

/// Result of a segmentation-guided edit
#[derive(Debug, Clone)]
pub struct EditResult {
    pub outcome: CompositeOutcome,
    /// Mask that drove the composite, at original resolution
    pub mask: RefinedMask,
    pub timings: ProcessingTimings,
}

impl EditResult {
    /// Output image, unchanged from the input when nothing was replaced
    #[must_use]
    pub fn image(&self) -> &DynamicImage {
        self.outcome.image()
    }

    #[must_use]
    pub fn into_image(self) -> DynamicImage {
        self.outcome.into_image()
    }

    #[must_use]
    pub fn is_replaced(&self) -> bool {
        self.outcome.is_replaced()
    }

    #[must_use]
    pub fn timing_summary(&self) -> String {
        self.timings.timing_summary()
    }
}
