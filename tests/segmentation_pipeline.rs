//! End-to-end pipeline tests: preprocessing, scripted inference, mask
//! synthesis, refinement and compositing, with no model files involved.

mod common;

use common::{
    disc_pipeline, empty_saliency_pipeline, flat_photo, garment_pipeline, garment_volume,
    half_transparent, two_tone,
};
use idphoto_edit::{
    testing::{class_volume, logit_volume, MockBackend},
    EditError, PipelineConfig, ProcessingTimings, ReplacementAsset, SegmentationPipeline,
    SelectionRule,
};
use image::{GenericImageView, Rgb};

#[test]
fn test_no_subject_is_nothing_to_replace() {
    let mut pipeline = empty_saliency_pipeline();
    let photo = flat_photo(512, 512, [255, 255, 255]);

    let result = pipeline
        .replace_background(&photo, &ReplacementAsset::Solid(Rgb([0, 0, 255])))
        .unwrap();

    assert!(!result.is_replaced());
    assert!(result.mask.is_empty());
    assert_eq!(result.image(), &photo);
    assert!(result.outcome.region().is_none());
}

#[test]
fn test_faint_noisy_saliency_is_nothing_to_replace() {
    let volume = logit_volume(320, 320, |y, x| -6.0 + 0.001 * ((x + y) % 3) as f32);
    let backend = MockBackend::with_output(volume);
    let mut pipeline =
        SegmentationPipeline::new(PipelineConfig::saliency(), Box::new(backend)).unwrap();
    let photo = flat_photo(512, 512, [255, 255, 255]);

    let result = pipeline
        .replace_background(&photo, &ReplacementAsset::Solid(Rgb([0, 0, 255])))
        .unwrap();

    assert!(!result.is_replaced());
    assert!(result.mask.statistics().selected_ratio < f32::EPSILON);
    assert_eq!(result.image(), &photo);
}

#[test]
fn test_garment_fills_detected_clothing_box() {
    let mut pipeline = garment_pipeline(garment_volume());
    let photo = flat_photo(400, 600, [200, 200, 200]);
    let asset = ReplacementAsset::from_image(&two_tone(20, 20, [255, 0, 0], [0, 0, 255]));

    let result = pipeline.replace_region(&photo, &asset).unwrap();
    assert!(result.is_replaced());

    let region = result.outcome.region().unwrap();
    assert!((88..=102).contains(&region.x), "x = {}", region.x);
    assert!((138..=152).contains(&region.y), "y = {}", region.y);
    assert!((98..=118).contains(&region.width), "width = {}", region.width);
    assert!((148..=168).contains(&region.height), "height = {}", region.height);

    // hard mask from the class path
    let stats = result.mask.statistics();
    assert!(stats.selected_ratio > 0.0);
    for y in (0..600).step_by(7) {
        for x in (0..400).step_by(7) {
            assert!(matches!(result.mask.value(x, y), 0 | 255));
        }
    }

    let output = result.image().to_rgb8();
    let mid_y = region.y + region.height / 2;
    let left = output.get_pixel(region.x + region.width / 4, mid_y);
    let right = output.get_pixel(region.x + region.width * 3 / 4, mid_y);
    assert!(left[0] > 240 && left[2] < 15, "left half of asset: {left:?}");
    assert!(right[2] > 240 && right[0] < 15, "right half of asset: {right:?}");
    assert_eq!(output.get_pixel(10, 10), &Rgb([200, 200, 200]));
    assert_eq!(output.get_pixel(390, 590), &Rgb([200, 200, 200]));
}

#[test]
fn test_transparent_asset_pixels_keep_photo() {
    let mut pipeline = garment_pipeline(garment_volume());
    let photo = flat_photo(400, 600, [200, 200, 200]);
    let asset = ReplacementAsset::from_image(&half_transparent(20, 20, [0, 255, 0]));
    assert!(asset.has_alpha());

    let result = pipeline.replace_region(&photo, &asset).unwrap();
    let region = result.outcome.region().unwrap();
    let output = result.image().to_rgb8();
    let mid_y = region.y + region.height / 2;

    let painted = output.get_pixel(region.x + region.width / 4, mid_y);
    assert!(painted[1] > 250 && painted[0] < 5, "opaque half: {painted:?}");
    assert_eq!(
        output.get_pixel(region.x + region.width * 3 / 4, mid_y),
        &Rgb([200, 200, 200])
    );
}

#[test]
fn test_background_asset_alpha_is_respected() {
    let mut pipeline = disc_pipeline();
    let photo = flat_photo(120, 120, [10, 20, 30]);
    let asset = ReplacementAsset::from_image(&half_transparent(10, 10, [250, 250, 250]));

    let result = pipeline.replace_background(&photo, &asset).unwrap();
    let output = result.image().to_rgb8();

    // top-left corner is background but the asset is transparent there
    assert_eq!(output.get_pixel(2, 2), &Rgb([10, 20, 30]));
    assert_eq!(output.get_pixel(117, 2), &Rgb([250, 250, 250]));
    // subject untouched
    assert_eq!(output.get_pixel(60, 60), &Rgb([10, 20, 30]));
}

#[test]
fn test_solid_background_keeps_channel_layout() {
    let mut pipeline = disc_pipeline();
    let photo = flat_photo(90, 90, [10, 20, 30]);

    let result = pipeline
        .replace_background(&photo, &ReplacementAsset::Solid(Rgb([255, 255, 255])))
        .unwrap();

    assert!(result.is_replaced());
    assert_eq!(result.image().color(), photo.color());
    assert_eq!(result.image().dimensions(), (90, 90));
    assert!(result.mask.statistics().selected_ratio < 1.0);
}

#[test]
fn test_remove_background_outputs_alpha() {
    let mut pipeline = disc_pipeline();
    let photo = flat_photo(100, 100, [80, 90, 100]);

    let result = pipeline.remove_background(&photo).unwrap();
    let rgba = result.image().to_rgba8();

    assert!(result.image().color().has_alpha());
    assert_eq!(rgba.get_pixel(1, 1)[3], 0);
    assert_eq!(rgba.get_pixel(50, 50)[3], 255);
    assert_eq!(rgba.get_pixel(50, 50)[0], 80);
}

#[test]
fn test_garment_without_clothing_is_nothing_to_replace() {
    let mut pipeline = garment_pipeline(class_volume(18, 512, 512, |_, _| 0));
    let photo = flat_photo(200, 300, [1, 2, 3]);

    let result = pipeline
        .replace_region(&photo, &ReplacementAsset::Solid(Rgb([9, 9, 9])))
        .unwrap();

    assert!(!result.is_replaced());
    assert_eq!(result.image(), &photo);
}

#[test]
fn test_transient_failure_refreshes_and_retries_once() {
    let backend = MockBackend::with_output(garment_volume()).failing_inferences(1);
    let history = backend.history_handle();
    let mut pipeline =
        SegmentationPipeline::new(PipelineConfig::garment(), Box::new(backend)).unwrap();

    let result = pipeline
        .replace_region(
            &flat_photo(400, 600, [0, 0, 0]),
            &ReplacementAsset::Solid(Rgb([255, 255, 255])),
        )
        .unwrap();

    assert!(result.is_replaced());
    assert_eq!(
        *history.lock().unwrap(),
        vec!["initialize", "infer", "refresh", "infer"]
    );
}

#[test]
fn test_second_failure_is_unavailable_and_next_request_recovers() {
    let backend = MockBackend::with_output(garment_volume()).failing_inferences(2);
    let mut pipeline =
        SegmentationPipeline::new(PipelineConfig::garment(), Box::new(backend)).unwrap();
    let photo = flat_photo(400, 600, [0, 0, 0]);
    let asset = ReplacementAsset::Solid(Rgb([255, 255, 255]));

    let err = pipeline.replace_region(&photo, &asset).unwrap_err();
    assert!(matches!(err, EditError::InferenceUnavailable(_)));
    assert!(!err.is_user_correctable());

    assert!(pipeline.replace_region(&photo, &asset).unwrap().is_replaced());
}

#[test]
fn test_malformed_output_is_not_retried() {
    let backend = MockBackend::with_output(logit_volume(320, 320, |_, _| f32::NAN));
    let history = backend.history_handle();
    let mut pipeline =
        SegmentationPipeline::new(PipelineConfig::saliency(), Box::new(backend)).unwrap();

    let err = pipeline
        .remove_background(&flat_photo(64, 64, [5, 5, 5]))
        .unwrap_err();

    assert!(matches!(err, EditError::InvalidModelOutput(_)));
    assert_eq!(*history.lock().unwrap(), vec!["initialize", "infer"]);
}

#[test]
fn test_explicit_rule_overrides_configured_classes() {
    // dress class instead of upper clothes
    let volume = class_volume(18, 512, 512, |y, x| {
        if (200..300).contains(&y) && (200..300).contains(&x) {
            7
        } else {
            0
        }
    });
    let mut pipeline = garment_pipeline(volume);
    let photo = flat_photo(512, 512, [0, 0, 0]);
    let mut timings = ProcessingTimings::new();

    let only_upper = SelectionRule::Classes([4].into_iter().collect());
    let mask = pipeline
        .segment(&photo, Some(&only_upper), &mut timings)
        .unwrap();
    assert!(mask.is_empty());

    let mask = pipeline.segment(&photo, None, &mut timings).unwrap();
    let region = mask.bounding_box().unwrap();
    assert!(region.contains(250, 250));
}
