//! Label mask refinement to a clean selection mask at photo resolution
//!
//! Two paths share one entry point:
//!
//! - **class labels** (garment replacement): nearest-neighbour upscale,
//!   per-class dilate→erode smoothing, recombination, nearest downscale to the
//!   photo, class selection, edge straightening (open, dilate, close, blur,
//!   re-threshold) and contour regularization of the largest external contour.
//!   The result holds only 0 and 255.
//! - **probabilities** (saliency): bicubic resize, gamma sharpening,
//!   threshold, small closing and a light blur that leaves soft edges.

use crate::{
    config::PipelineConfig,
    error::{EditError, Result},
    types::{LabelMask, ProbabilityMap, RefinedMask, SelectionRule},
};
use image::{imageops, imageops::FilterType, GrayImage, Luma};
use imageproc::{
    contours::{find_contours, BorderType, Contour},
    distance_transform::Norm,
    drawing::draw_polygon_mut,
    filter::gaussian_blur_f32,
    morphology,
    point::Point,
};

/// Mid-point used to turn blurred masks back into hard masks
const MID_THRESHOLD: u8 = 127;

/// Refinement parameters extracted from a [`PipelineConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct MaskRefiner {
    upscale_factor: u32,
    class_smoothing_kernel: u32,
    open_kernel: u32,
    dilate_kernel: u32,
    close_kernel: u32,
    edge_blur_sigma: f32,
    contour_tolerance_fraction: f32,
    contour_blur_sigma: f32,
    saliency_threshold: f32,
    saliency_gamma: f32,
    saliency_close_kernel: u32,
    saliency_blur_sigma: f32,
}

impl MaskRefiner {
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            upscale_factor: config.upscale_factor.max(1),
            class_smoothing_kernel: config.class_smoothing_kernel,
            open_kernel: config.open_kernel,
            dilate_kernel: config.dilate_kernel,
            close_kernel: config.close_kernel,
            edge_blur_sigma: config.edge_blur_sigma,
            contour_tolerance_fraction: config.contour_tolerance_fraction,
            contour_blur_sigma: config.contour_blur_sigma,
            saliency_threshold: config.saliency_threshold,
            saliency_gamma: config.saliency_gamma,
            saliency_close_kernel: config.saliency_close_kernel,
            saliency_blur_sigma: config.saliency_blur_sigma,
        }
    }

    /// Refine a label mask to `target` = `(width, height)` of the original photo
    ///
    /// An empty selection is returned as an all-zero mask, never as an error.
    ///
    /// # Errors
    /// - Target has a zero dimension
    /// - Selection rule does not fit the label kind (class rule on probabilities or vice versa)
    pub fn refine(
        &self,
        labels: &LabelMask,
        target: (u32, u32),
        rule: &SelectionRule,
    ) -> Result<RefinedMask> {
        let (width, height) = target;
        if width == 0 || height == 0 {
            return Err(EditError::invalid_image(format!(
                "cannot refine mask to {}x{}",
                width, height
            )));
        }

        match (labels, rule) {
            (LabelMask::Classes { labels, .. }, SelectionRule::Classes(_) | SelectionRule::AllExcept(_)) => {
                self.refine_classes(labels, target, rule)
            },
            (LabelMask::Probability(map), SelectionRule::Threshold) => {
                Ok(self.refine_probability(map, target))
            },
            (LabelMask::Classes { num_classes, .. }, SelectionRule::Threshold) => {
                Err(EditError::invalid_model_output(format!(
                    "threshold selection needs a single-channel saliency output, got {} classes",
                    num_classes
                )))
            },
            (LabelMask::Probability(_), _) => Err(EditError::invalid_model_output(
                "class selection needs a multi-class output, got a single-channel map",
            )),
        }
    }

    /// Multi-class path; output holds only 0 and 255
    ///
    /// # Errors
    /// - Upscaled label map would not fit in `u32` dimensions
    pub fn refine_classes(
        &self,
        labels: &GrayImage,
        target: (u32, u32),
        rule: &SelectionRule,
    ) -> Result<RefinedMask> {
        let (width, height) = target;
        let (native_w, native_h) = labels.dimensions();
        let (Some(upscaled_w), Some(upscaled_h)) = (
            native_w.checked_mul(self.upscale_factor),
            native_h.checked_mul(self.upscale_factor),
        ) else {
            return Err(EditError::invalid_config(format!(
                "upscale factor {} overflows {}x{} label map",
                self.upscale_factor, native_w, native_h
            )));
        };

        let upscaled = imageops::resize(labels, upscaled_w, upscaled_h, FilterType::Nearest);
        let smoothed = smooth_classes(&upscaled, radius(self.class_smoothing_kernel));
        let restored = imageops::resize(&smoothed, width, height, FilterType::Nearest);

        let selection = select(&restored, rule);
        if is_blank(&selection) {
            log::debug!("No pixels matched {rule:?}");
            return Ok(RefinedMask::empty(width, height));
        }

        let straightened = self.straighten_edges(&selection);
        if is_blank(&straightened) {
            log::debug!("Selection vanished during edge straightening");
            return Ok(RefinedMask::empty(width, height));
        }

        let regularized = self
            .regularize_contour(&straightened)
            .unwrap_or(straightened);
        Ok(RefinedMask::from_image(&regularized, false))
    }

    /// Binary saliency path; output keeps an antialiased band along the edge
    #[must_use]
    pub fn refine_probability(&self, map: &ProbabilityMap, target: (u32, u32)) -> RefinedMask {
        let (width, height) = target;
        let resized = imageops::resize(map, width, height, FilterType::CatmullRom);

        let mut hard = GrayImage::new(width, height);
        for (x, y, p) in resized.enumerate_pixels() {
            let sharpened = p[0].clamp(0.0, 1.0).powf(self.saliency_gamma);
            if sharpened > self.saliency_threshold {
                hard.put_pixel(x, y, Luma([255]));
            }
        }

        if is_blank(&hard) {
            log::debug!(
                "No pixel passed saliency threshold {}",
                self.saliency_threshold
            );
            return RefinedMask::empty(width, height);
        }

        // L1 diamond stands in for the small elliptical closing kernel
        let closed = morphology::close(&hard, Norm::L1, radius(self.saliency_close_kernel));
        let mut soft = gaussian_blur_f32(&closed, self.saliency_blur_sigma);
        // float accumulation can truncate full coverage to 254
        for p in soft.pixels_mut() {
            if p[0] >= 254 {
                p[0] = 255;
            }
        }
        RefinedMask::from_image(&soft, true)
    }

    /// Open, dilate, close, blur, re-threshold
    fn straighten_edges(&self, selection: &GrayImage) -> GrayImage {
        let opened = morphology::open(selection, Norm::LInf, radius(self.open_kernel));
        let dilated = morphology::dilate(&opened, Norm::LInf, radius(self.dilate_kernel));
        let closed = morphology::close(&dilated, Norm::LInf, radius(self.close_kernel));
        let blurred = gaussian_blur_f32(&closed, self.edge_blur_sigma);
        binarize(&blurred)
    }

    /// Replace the mask by the simplified polygon of its largest external contour
    ///
    /// Returns `None` when no usable contour exists.
    fn regularize_contour(&self, mask: &GrayImage) -> Option<GrayImage> {
        let contours = find_contours::<i32>(mask);
        let largest = largest_external_contour(&contours)?;

        let epsilon = self.contour_tolerance_fraction * closed_perimeter(&largest.points);
        let mut polygon = approx_closed_polygon(&largest.points, epsilon);
        while polygon.len() > 1 && polygon.first() == polygon.last() {
            polygon.pop();
        }
        if polygon.len() < 3 {
            return None;
        }
        log::debug!(
            "Regularized contour from {} to {} vertices (epsilon {:.2})",
            largest.points.len(),
            polygon.len(),
            epsilon
        );

        let (width, height) = mask.dimensions();
        let mut filled = GrayImage::new(width, height);
        draw_polygon_mut(&mut filled, &polygon, Luma([255]));

        let blurred = gaussian_blur_f32(&filled, self.contour_blur_sigma);
        let result = binarize(&blurred);
        (!is_blank(&result)).then_some(result)
    }
}

/// Morphology radius for an odd square kernel side
fn radius(kernel: u32) -> u8 {
    (kernel / 2).min(u32::from(u8::MAX)) as u8
}

fn is_blank(mask: &GrayImage) -> bool {
    mask.as_raw().iter().all(|&v| v == 0)
}

fn binarize(mask: &GrayImage) -> GrayImage {
    let mut out = mask.clone();
    for p in out.pixels_mut() {
        p[0] = if p[0] > MID_THRESHOLD { 255 } else { 0 };
    }
    out
}

fn select(labels: &GrayImage, rule: &SelectionRule) -> GrayImage {
    let mut out = GrayImage::new(labels.width(), labels.height());
    for (x, y, p) in labels.enumerate_pixels() {
        if rule.selects(p[0]) {
            out.put_pixel(x, y, Luma([255]));
        }
    }
    out
}

/// Dilate→erode each present class independently, then write classes back in
/// ascending order so the last class claiming a pixel wins
pub(crate) fn smooth_classes(labels: &GrayImage, radius: u8) -> GrayImage {
    let mut present = [false; 256];
    for p in labels.pixels() {
        present[p[0] as usize] = true;
    }

    let mut recombined = labels.clone();
    for class in (0..=255u8).filter(|&c| present[c as usize]) {
        let mut indicator = GrayImage::new(labels.width(), labels.height());
        for (x, y, p) in labels.enumerate_pixels() {
            if p[0] == class {
                indicator.put_pixel(x, y, Luma([255]));
            }
        }
        let smoothed = morphology::erode(
            &morphology::dilate(&indicator, Norm::LInf, radius),
            Norm::LInf,
            radius,
        );
        for (out, flag) in recombined.pixels_mut().zip(smoothed.pixels()) {
            if flag[0] > 0 {
                out[0] = class;
            }
        }
    }
    recombined
}

/// Outer border without parent enclosing the largest area; first found wins ties
fn largest_external_contour(contours: &[Contour<i32>]) -> Option<&Contour<i32>> {
    let mut best: Option<(&Contour<i32>, f64)> = None;
    for contour in contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
    {
        let area = polygon_area(&contour.points);
        if best.map_or(true, |(_, best_area)| area > best_area) {
            best = Some((contour, area));
        }
    }
    best.map(|(contour, _)| contour)
}

/// Absolute shoelace area
pub(crate) fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();
    (twice as f64 / 2.0).abs()
}

/// Perimeter of the closed curve through `points`
pub(crate) fn closed_perimeter(points: &[Point<i32>]) -> f32 {
    if points.len() < 2 {
        return 0.0;
    }
    points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| distance(a, b))
        .sum()
}

fn distance(a: &Point<i32>, b: &Point<i32>) -> f32 {
    let dx = (a.x - b.x) as f32;
    let dy = (a.y - b.y) as f32;
    (dx * dx + dy * dy).sqrt()
}

fn point_to_segment_distance(p: &Point<i32>, a: &Point<i32>, b: &Point<i32>) -> f32 {
    let (px, py) = (p.x as f32, p.y as f32);
    let (ax, ay) = (a.x as f32, a.y as f32);
    let (bx, by) = (b.x as f32, b.y as f32);
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f32::EPSILON {
        return distance(p, a);
    }
    let t = (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0);
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

/// Douglas-Peucker simplification of a closed contour
///
/// The curve is split at the vertex farthest from the first one and each half
/// is simplified as an open chain.
pub(crate) fn approx_closed_polygon(points: &[Point<i32>], epsilon: f32) -> Vec<Point<i32>> {
    if points.len() <= 3 {
        return points.to_vec();
    }

    let first = points[0];
    let split = points
        .iter()
        .enumerate()
        .skip(1)
        .fold((0usize, -1.0f32), |(best_i, best_d), (i, p)| {
            let d = distance(&first, p);
            if d > best_d {
                (i, d)
            } else {
                (best_i, best_d)
            }
        })
        .0;

    let mut second_half: Vec<Point<i32>> = points[split..].to_vec();
    second_half.push(first);

    let mut polygon = simplify_chain(&points[..=split], epsilon);
    let tail = simplify_chain(&second_half, epsilon);
    // joints at `split` and back at `first` are shared with the first half
    polygon.extend_from_slice(&tail[1..tail.len() - 1]);
    polygon
}

/// Iterative Douglas-Peucker over an open chain, keeping both endpoints
fn simplify_chain(points: &[Point<i32>], epsilon: f32) -> Vec<Point<i32>> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0usize, points.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        if end - start <= 1 {
            continue;
        }

        let mut max_dist = 0.0f32;
        let mut max_index = start;
        for i in (start + 1)..end {
            let dist = point_to_segment_distance(&points[i], &points[start], &points[end]);
            if dist > max_dist {
                max_dist = dist;
                max_index = i;
            }
        }

        if max_dist > epsilon {
            keep[max_index] = true;
            stack.push((start, max_index));
            stack.push((max_index, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}
