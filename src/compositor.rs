//! Mask-weighted compositing of replacement assets into photos
//!
//! The compositor never touches its input buffer: every operation builds a new
//! image so callers can keep the pre-edit photo for undo.

use crate::{
    assets::ReplacementAsset,
    error::{EditError, Result},
    types::{RefinedMask, Region},
};
use image::{imageops, imageops::FilterType, ColorType, DynamicImage, GrayImage, Rgb, RgbImage, RgbaImage};

/// How the asset is painted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// Asset fills the whole canvas, the masked subject is kept on top
    Background,
    /// Asset is fitted to the mask's bounding box and written inside the mask
    Region,
}

/// Result of compositing
#[derive(Debug, Clone)]
pub enum CompositeOutcome {
    /// Something was painted; `region` bounds the mask that drove it
    Replaced { image: DynamicImage, region: Region },
    /// The mask selected nothing; `image` is an unchanged copy of the input
    NothingToReplace { image: DynamicImage },
}

impl CompositeOutcome {
    #[must_use]
    pub fn image(&self) -> &DynamicImage {
        match self {
            Self::Replaced { image, .. } | Self::NothingToReplace { image } => image,
        }
    }

    #[must_use]
    pub fn into_image(self) -> DynamicImage {
        match self {
            Self::Replaced { image, .. } | Self::NothingToReplace { image } => image,
        }
    }

    #[must_use]
    pub fn is_replaced(&self) -> bool {
        matches!(self, Self::Replaced { .. })
    }

    #[must_use]
    pub fn region(&self) -> Option<Region> {
        match self {
            Self::Replaced { region, .. } => Some(*region),
            Self::NothingToReplace { .. } => None,
        }
    }
}

/// Paint `asset` into `original` under `mask`
///
/// # Errors
/// - Mask dimensions differ from the photo
pub fn composite(
    original: &DynamicImage,
    mask: &RefinedMask,
    asset: &ReplacementAsset,
    mode: CompositeMode,
) -> Result<CompositeOutcome> {
    check_dimensions(original, mask)?;

    let Some(region) = mask.bounding_box() else {
        log::debug!("Empty mask, nothing to replace");
        return Ok(CompositeOutcome::NothingToReplace {
            image: original.clone(),
        });
    };

    let mut canvas = original.to_rgba8();
    match mode {
        CompositeMode::Background => paint_background(&mut canvas, mask, asset),
        CompositeMode::Region => paint_region(&mut canvas, mask, asset, region),
    }

    Ok(CompositeOutcome::Replaced {
        image: restore_color_type(original, canvas),
        region,
    })
}

/// Keep the subject and make everything else transparent
///
/// The output is always RGBA; colour channels are copied unchanged and the
/// mask scales the existing alpha.
///
/// # Errors
/// - Mask dimensions differ from the photo
pub fn cut_out(original: &DynamicImage, mask: &RefinedMask) -> Result<CompositeOutcome> {
    check_dimensions(original, mask)?;

    let Some(region) = mask.bounding_box() else {
        return Ok(CompositeOutcome::NothingToReplace {
            image: original.clone(),
        });
    };

    let mut rgba = original.to_rgba8();
    for (x, y, p) in rgba.enumerate_pixels_mut() {
        let weight = u16::from(mask.value(x, y));
        p[3] = ((u16::from(p[3]) * weight + 127) / 255) as u8;
    }

    Ok(CompositeOutcome::Replaced {
        image: DynamicImage::ImageRgba8(rgba),
        region,
    })
}

fn check_dimensions(original: &DynamicImage, mask: &RefinedMask) -> Result<()> {
    let image_dims = (original.width(), original.height());
    if image_dims != mask.dimensions() {
        return Err(EditError::internal(format!(
            "mask is {}x{} but photo is {}x{}",
            mask.dimensions().0,
            mask.dimensions().1,
            image_dims.0,
            image_dims.1
        )));
    }
    Ok(())
}

/// Source-over of the masked subject onto an asset canvas
fn paint_background(canvas: &mut RgbaImage, mask: &RefinedMask, asset: &ReplacementAsset) {
    let (width, height) = canvas.dimensions();
    let fitted = FittedAsset::new(asset, width, height);

    for (x, y, p) in canvas.enumerate_pixels_mut() {
        let subject = f32::from(mask.value(x, y)) / 255.0;
        let Some((color, coverage)) = fitted.sample(x, y) else {
            continue;
        };
        blend_pixel(p, color, (1.0 - subject) * coverage);
    }
}

/// Asset fitted to `region`, written where mask and asset alpha agree
fn paint_region(
    canvas: &mut RgbaImage,
    mask: &RefinedMask,
    asset: &ReplacementAsset,
    region: Region,
) {
    let fitted = FittedAsset::new(asset, region.width, region.height);

    for dy in 0..region.height {
        for dx in 0..region.width {
            let (x, y) = (region.x + dx, region.y + dy);
            let selected = f32::from(mask.value(x, y)) / 255.0;
            if selected <= 0.0 {
                continue;
            }
            let Some((color, coverage)) = fitted.sample(dx, dy) else {
                continue;
            };
            blend_pixel(canvas.get_pixel_mut(x, y), color, selected * coverage);
        }
    }
}

fn blend_pixel(pixel: &mut image::Rgba<u8>, color: Rgb<u8>, weight: f32) {
    if weight <= 0.0 {
        return;
    }
    let weight = weight.min(1.0);
    let mix = |from: u8, to: u8| {
        let v = f32::from(from) + weight * (f32::from(to) - f32::from(from));
        v.round().clamp(0.0, 255.0) as u8
    };
    pixel[0] = mix(pixel[0], color[0]);
    pixel[1] = mix(pixel[1], color[1]);
    pixel[2] = mix(pixel[2], color[2]);
    pixel[3] = mix(pixel[3], u8::MAX);
}

/// Asset resampled to a target size
enum FittedAsset {
    Solid(Rgb<u8>),
    Image {
        color: RgbImage,
        alpha: Option<GrayImage>,
    },
}

impl FittedAsset {
    fn new(asset: &ReplacementAsset, width: u32, height: u32) -> Self {
        match asset {
            ReplacementAsset::Solid(color) => Self::Solid(*color),
            ReplacementAsset::Image { color, alpha } => {
                let color = if color.dimensions() == (width, height) {
                    color.clone()
                } else {
                    imageops::resize(color, width, height, FilterType::CatmullRom)
                };
                // nearest keeps the derived alpha binary
                let alpha = alpha.as_ref().map(|a| {
                    if a.dimensions() == (width, height) {
                        a.clone()
                    } else {
                        imageops::resize(a, width, height, FilterType::Nearest)
                    }
                });
                Self::Image { color, alpha }
            },
        }
    }

    /// Colour and coverage at a pixel; `None` where the asset is transparent
    fn sample(&self, x: u32, y: u32) -> Option<(Rgb<u8>, f32)> {
        match self {
            Self::Solid(color) => Some((*color, 1.0)),
            Self::Image { color, alpha } => {
                let coverage = alpha
                    .as_ref()
                    .map_or(1.0, |a| f32::from(a.get_pixel(x, y)[0]) / 255.0);
                (coverage > 0.0).then(|| (*color.get_pixel(x, y), coverage))
            },
        }
    }
}

/// Convert the working RGBA buffer back to the photo's channel layout
///
/// Sample depth is restored too, but the working buffer is 8-bit, so 16-bit
/// and float photos come back quantized to 256 levels per channel.
fn restore_color_type(original: &DynamicImage, rgba: RgbaImage) -> DynamicImage {
    let working = DynamicImage::ImageRgba8(rgba);
    match original.color() {
        ColorType::L8 => DynamicImage::ImageLuma8(working.to_luma8()),
        ColorType::La8 => DynamicImage::ImageLumaA8(working.to_luma_alpha8()),
        ColorType::L16 => DynamicImage::ImageLuma16(working.to_luma16()),
        ColorType::La16 => DynamicImage::ImageLumaA16(working.to_luma_alpha16()),
        ColorType::Rgb16 => DynamicImage::ImageRgb16(working.to_rgb16()),
        ColorType::Rgba16 => DynamicImage::ImageRgba16(working.to_rgba16()),
        ColorType::Rgb32F => DynamicImage::ImageRgb32F(working.to_rgb32f()),
        ColorType::Rgba32F => DynamicImage::ImageRgba32F(working.to_rgba32f()),
        color if color.has_alpha() => working,
        _ => DynamicImage::ImageRgb8(working.to_rgb8()),
    }
}
