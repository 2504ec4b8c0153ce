//! Geometric and tonal edits that need no segmentation
//!
//! Every function returns a new image and leaves its input untouched.

use crate::{
    error::{EditError, Result},
    face::{weighted_center, FaceBounds},
    types::Region,
    utils::NumericValidator,
};
use image::{imageops, imageops::FilterType, DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Print resolution used for layouts (96 dpi)
pub const PIXELS_PER_MM: f32 = 3.779_528;

/// Largest side accepted for resize and layout canvases
const MAX_SIDE: u32 = 16_384;

/// Crop rectangle in signed pixel coordinates, clamped to the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRequest {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl CropRequest {
    #[must_use]
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clamp to an image of `width` x `height`
    ///
    /// # Errors
    /// - Non-positive extent, or nothing left after clamping
    pub fn clamp_to(&self, width: u32, height: u32) -> Result<Region> {
        if self.width <= 0 || self.height <= 0 {
            return Err(EditError::invalid_config(format!(
                "crop size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        let x0 = self.x.clamp(0, i64::from(width));
        let y0 = self.y.clamp(0, i64::from(height));
        let x1 = self.x.saturating_add(self.width).clamp(0, i64::from(width));
        let y1 = self.y.saturating_add(self.height).clamp(0, i64::from(height));
        if x1 <= x0 || y1 <= y0 {
            return Err(EditError::invalid_config(format!(
                "crop {}x{} at ({}, {}) lies outside the {}x{} image",
                self.width, self.height, self.x, self.y, width, height
            )));
        }
        Ok(Region::new(
            x0 as u32,
            y0 as u32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        ))
    }
}

/// Crop `image`, clamping the request to its bounds
///
/// # Errors
/// - See [`CropRequest::clamp_to`]
pub fn crop(image: &DynamicImage, request: CropRequest) -> Result<DynamicImage> {
    let region = request.clamp_to(image.width(), image.height())?;
    log::debug!("Cropping to {region:?}");
    Ok(image.crop_imm(region.x, region.y, region.width, region.height))
}

/// Which side of a resize request is authoritative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AspectRatio {
    /// Use both sides as given
    #[default]
    Free,
    /// Keep the aspect ratio, deriving height from width
    FromWidth,
    /// Keep the aspect ratio, deriving width from height
    FromHeight,
}

/// Output size for a resize request
///
/// # Errors
/// - Authoritative side is zero, or the result exceeds the size limit
pub fn resize_dimensions(
    current: (u32, u32),
    width: u32,
    height: u32,
    aspect: AspectRatio,
) -> Result<(u32, u32)> {
    let (cur_w, cur_h) = (f64::from(current.0), f64::from(current.1));
    let (w, h) = match aspect {
        AspectRatio::Free => (width, height),
        AspectRatio::FromWidth => (width, (f64::from(width) * cur_h / cur_w).round() as u32),
        AspectRatio::FromHeight => ((f64::from(height) * cur_w / cur_h).round() as u32, height),
    };
    if w == 0 || h == 0 || w > MAX_SIDE || h > MAX_SIDE {
        return Err(EditError::config_value_error(
            "resize",
            format!("{w}x{h}"),
            "1 to 16384 per side",
            None::<String>,
        ));
    }
    Ok((w, h))
}

/// Resize with a triangle (bilinear) filter
///
/// # Errors
/// - See [`resize_dimensions`]
pub fn resize(
    image: &DynamicImage,
    width: u32,
    height: u32,
    aspect: AspectRatio,
) -> Result<DynamicImage> {
    let (w, h) = resize_dimensions((image.width(), image.height()), width, height, aspect)?;
    log::debug!(
        "Resizing {}x{} to {w}x{h} ({aspect:?})",
        image.width(),
        image.height()
    );
    Ok(image.resize_exact(w, h, FilterType::Triangle))
}

/// Brightness and contrast in -100..=100, zero meaning unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Enhancement {
    pub brightness: i32,
    pub contrast: i32,
}

impl Enhancement {
    /// # Errors
    /// - Either value outside -100..=100
    pub fn new(brightness: i32, contrast: i32) -> Result<Self> {
        Ok(Self {
            brightness: NumericValidator::validate_adjustment("brightness", brightness)?,
            contrast: NumericValidator::validate_adjustment("contrast", contrast)?,
        })
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.brightness == 0 && self.contrast == 0
    }

    /// Lookup table mapping each channel value through brightness then contrast
    fn lookup_table(&self) -> [u8; 256] {
        let b = self.brightness as f32 / 100.0;
        let mut factor = 1.0 + self.contrast as f32 / 100.0;
        if self.contrast < 0 {
            factor = factor.max(0.1);
        }

        let mut table = [0u8; 256];
        for (value, slot) in table.iter_mut().enumerate() {
            let c = value as f32;
            let lit = if b < 0.0 { c * (1.0 + b) } else { c + b * (255.0 - c) };
            let contrasted = (lit - 128.0) * factor + 128.0;
            *slot = contrasted.round().clamp(0.0, 255.0) as u8;
        }
        table
    }
}

/// Apply brightness and contrast; alpha is left as is
///
/// # Errors
/// - Adjustment values out of range
pub fn enhance(image: &DynamicImage, enhancement: Enhancement) -> Result<DynamicImage> {
    let Enhancement {
        brightness,
        contrast,
    } = enhancement;
    // re-validate, fields are public
    let enhancement = Enhancement::new(brightness, contrast)?;
    let table = enhancement.lookup_table();

    if image.color().has_alpha() {
        let mut rgba = image.to_rgba8();
        for p in rgba.pixels_mut() {
            for c in 0..3 {
                p[c] = table[usize::from(p[c])];
            }
        }
        Ok(DynamicImage::ImageRgba8(rgba))
    } else {
        let mut rgb = image.to_rgb8();
        for p in rgb.pixels_mut() {
            for c in 0..3 {
                p[c] = table[usize::from(p[c])];
            }
        }
        Ok(DynamicImage::ImageRgb8(rgb))
    }
}

/// Print sheet of repeated photos
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSpec {
    pub rows: u32,
    pub columns: u32,
    /// White border drawn around each photo
    pub border_mm: f32,
    pub sheet_width_mm: f32,
    pub sheet_height_mm: f32,
}

impl LayoutSpec {
    /// # Errors
    /// - Zero rows or columns, or invalid lengths
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.columns == 0 {
            return Err(EditError::invalid_config(format!(
                "layout needs at least one row and column, got {}x{}",
                self.rows, self.columns
            )));
        }
        NumericValidator::validate_millimetres("border", self.border_mm, true)?;
        NumericValidator::validate_millimetres("sheet width", self.sheet_width_mm, false)?;
        NumericValidator::validate_millimetres("sheet height", self.sheet_height_mm, false)?;
        Ok(())
    }

    /// Sheet size in pixels
    ///
    /// # Errors
    /// - Invalid spec or a sheet larger than the size limit
    pub fn sheet_pixels(&self) -> Result<(u32, u32)> {
        self.validate()?;
        let width = mm_to_px(self.sheet_width_mm)?.max(1);
        let height = mm_to_px(self.sheet_height_mm)?.max(1);
        if width > MAX_SIDE || height > MAX_SIDE {
            return Err(EditError::invalid_config(format!(
                "layout sheet of {width}x{height} pixels is too large"
            )));
        }
        Ok((width, height))
    }
}

fn mm_to_px(mm: f32) -> Result<u32> {
    NumericValidator::validate_f32_to_u32((mm * PIXELS_PER_MM).round())
}

/// Tile `image` with a white border onto a white sheet, row-major from the top-left
///
/// Tiles that run past the sheet edge are clipped.
///
/// # Errors
/// - Invalid layout spec
pub fn layout(image: &DynamicImage, spec: &LayoutSpec) -> Result<DynamicImage> {
    let (sheet_w, sheet_h) = spec.sheet_pixels()?;
    let border = mm_to_px(spec.border_mm)?;
    let photo = image.to_rgba8();

    let tile_w = i64::from(photo.width()) + 2 * i64::from(border);
    let tile_h = i64::from(photo.height()) + 2 * i64::from(border);
    log::debug!(
        "Layout {}x{} tiles of {tile_w}x{tile_h} on a {sheet_w}x{sheet_h} sheet",
        spec.rows,
        spec.columns
    );

    let white = Rgba([255, 255, 255, 255]);
    let mut sheet = RgbaImage::from_pixel(sheet_w, sheet_h, white);
    for row in 0..i64::from(spec.rows) {
        for col in 0..i64::from(spec.columns) {
            let x = col * tile_w + i64::from(border);
            let y = row * tile_h + i64::from(border);
            if x >= i64::from(sheet_w) || y >= i64::from(sheet_h) {
                continue;
            }
            imageops::overlay(&mut sheet, &photo, x, y);
        }
    }

    Ok(DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(sheet).to_rgb8()))
}

/// Shift `image` horizontally so the faces' area-weighted centre sits on the
/// vertical centre line, filling the exposed strip with white
///
/// With no usable face the whole image is centred on a white canvas of its
/// own size, which only flattens transparency. The output is always RGB.
#[must_use]
pub fn center_face(image: &DynamicImage, faces: &[FaceBounds]) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let offset_x = match weighted_center(faces) {
        Some((face_x, face_y)) => {
            let offset = i64::from(width / 2) - face_x as i64;
            log::debug!(
                "Face centre ({face_x:.1}, {face_y:.1}) of {} face(s), shifting {offset}px",
                faces.len()
            );
            offset
        },
        None => {
            log::debug!("No face detected, centring the whole image");
            0
        },
    };

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &image.to_rgba8(), offset_x, 0);
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
}
