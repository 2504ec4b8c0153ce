//! Shared fixtures for integration tests

#![allow(dead_code)]

use idphoto_edit::{
    testing::{class_volume, logit_volume, MockBackend},
    PipelineConfig, SegmentationPipeline,
};
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use ndarray::Array4;

/// Upper-clothes block in 512×512 label space; maps to x 100..200, y 150..300 in a 400×600 photo
pub const GARMENT_BLOCK: std::ops::Range<usize> = 128..256;

pub fn flat_photo(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
}

/// 18-class parser output with class 4 over [`GARMENT_BLOCK`] and background elsewhere
pub fn garment_volume() -> Array4<f32> {
    class_volume(18, 512, 512, |y, x| {
        if GARMENT_BLOCK.contains(&y) && GARMENT_BLOCK.contains(&x) {
            4
        } else {
            0
        }
    })
}

pub fn garment_pipeline(output: Array4<f32>) -> SegmentationPipeline {
    SegmentationPipeline::new(PipelineConfig::garment(), Box::new(MockBackend::with_output(output)))
        .expect("garment pipeline")
}

/// Saliency pipeline with the mock's centred-disc subject
pub fn disc_pipeline() -> SegmentationPipeline {
    SegmentationPipeline::new(PipelineConfig::saliency(), Box::new(MockBackend::new()))
        .expect("saliency pipeline")
}

/// Saliency pipeline whose network sees no subject at all
pub fn empty_saliency_pipeline() -> SegmentationPipeline {
    let backend = MockBackend::with_output(logit_volume(320, 320, |_, _| -6.0));
    SegmentationPipeline::new(PipelineConfig::saliency(), Box::new(backend))
        .expect("saliency pipeline")
}

/// Left half opaque `color`, right half fully transparent
pub fn half_transparent(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([color[0], color[1], color[2], 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    }))
}

/// Left half `left`, right half `right`, opaque
pub fn two_tone(width: u32, height: u32, left: [u8; 3], right: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb(left)
        } else {
            Rgb(right)
        }
    }))
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("png encode");
    bytes
}
