use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use idphoto_edit::{
    mask::{argmax_labels, probability_map},
    testing::{class_volume, MockBackend},
    MaskRefiner, PipelineConfig, ReplacementAsset, SegmentationPipeline, SelectionRule,
};
use image::{DynamicImage, Rgb, RgbImage};

/// Portrait-like parser output: upper clothes below a face-sized head region
fn parser_volume() -> ndarray::Array4<f32> {
    class_volume(18, 512, 512, |y, x| match (y, x) {
        (300.., 96..=415) => 4,
        (80..=299, 176..=335) => 13,
        _ => 0,
    })
}

fn benchmark_class_refinement(c: &mut Criterion) {
    let refiner = MaskRefiner::from_config(&PipelineConfig::garment());
    let labels = argmax_labels(&parser_volume());
    let rule = SelectionRule::Classes([4, 7].into_iter().collect());

    let mut group = c.benchmark_group("class_refinement");
    group.sample_size(10);
    for (width, height) in [(400, 600), (827, 1063), (1200, 1600)] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{width}x{height}")),
            &(width, height),
            |b, &target| {
                b.iter(|| {
                    refiner
                        .refine_classes(black_box(&labels), target, &rule)
                        .expect("class refinement")
                })
            },
        );
    }
    group.finish();
}

fn benchmark_saliency_refinement(c: &mut Criterion) {
    let refiner = MaskRefiner::from_config(&PipelineConfig::saliency());
    let volume = idphoto_edit::testing::logit_volume(320, 320, |y, x| {
        let (dx, dy) = (x as f32 - 160.0, y as f32 - 150.0);
        8.0 - (dx * dx + dy * dy).sqrt() / 10.0
    });
    let map = probability_map(&volume, true, 0.2);

    let mut group = c.benchmark_group("saliency_refinement");
    group.sample_size(20);
    group.bench_function("827x1063", |b| {
        b.iter(|| refiner.refine_probability(black_box(&map), (827, 1063)));
    });
    group.finish();
}

fn benchmark_garment_edit(c: &mut Criterion) {
    let mut pipeline = SegmentationPipeline::new(
        PipelineConfig::garment(),
        Box::new(MockBackend::with_output(parser_volume())),
    )
    .expect("garment pipeline");
    let photo = DynamicImage::ImageRgb8(RgbImage::from_pixel(600, 800, Rgb([180, 170, 160])));
    let asset = ReplacementAsset::Solid(Rgb([30, 30, 60]));

    let mut group = c.benchmark_group("garment_edit");
    group.sample_size(10);
    group.bench_function("600x800_mock_inference", |b| {
        b.iter(|| {
            pipeline
                .replace_region(black_box(&photo), &asset)
                .expect("garment edit")
        });
    });
    group.finish();
}

criterion_group!(
    refinement_benches,
    benchmark_class_refinement,
    benchmark_saliency_refinement,
    benchmark_garment_edit
);
criterion_main!(refinement_benches);
