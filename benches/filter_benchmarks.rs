//! Filter benchmarks for videofx
//!
//! Run with: cargo bench --bench filter_benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use videofx::filters::{FilterConfig, FilterRegistry};
use videofx::pipeline::FilterStage;
use videofx::video::{AffineTransform, DecodedFrame, Image, MediaTime};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn frame() -> DecodedFrame {
    DecodedFrame {
        image: Image::new_filled(WIDTH, HEIGHT, [180, 90, 40, 255]),
        presentation_time: MediaTime::ZERO,
    }
}

/// Each preset on a 720p frame
fn bench_presets(c: &mut Criterion) {
    let registry = FilterRegistry::new();
    let mut group = c.benchmark_group("presets_720p");
    group.throughput(Throughput::Elements((WIDTH * HEIGHT) as u64));

    for name in registry.available_filters() {
        let Ok(filter) = registry.create(&FilterConfig::named(name.as_str(), 1.0)) else {
            continue;
        };
        let image = frame().image;
        group.bench_function(name.as_str(), |b| {
            b.iter(|| filter.output_image(black_box(image.clone())))
        });
    }

    group.finish();
}

/// Orientation plus filter, as the export loop runs it
fn bench_stage(c: &mut Criterion) {
    let registry = FilterRegistry::new();
    let Ok(filter) = registry.create(&FilterConfig::named("chrome", 1.0)) else {
        return;
    };
    let Ok(stage) = FilterStage::new(num_cpus::get()) else {
        return;
    };

    let mut group = c.benchmark_group("filter_stage_720p");
    group.throughput(Throughput::Elements(1));

    for (label, transform) in [
        ("identity", AffineTransform::identity()),
        ("rotate_90", AffineTransform::rotation(90.0)),
    ] {
        group.bench_function(label, |b| {
            b.iter(|| stage.apply(black_box(frame()), &transform, filter.as_ref()))
        });
    }

    group.finish();
}

/// BGRA swizzle into a pixel buffer
fn bench_bgra(c: &mut Criterion) {
    let image = frame().image;
    let mut buffer = vec![0u8; (WIDTH * HEIGHT * 4) as usize];

    let mut group = c.benchmark_group("bgra_720p");
    group.throughput(Throughput::Bytes(buffer.len() as u64));
    group.bench_function("write_bgra", |b| {
        b.iter(|| image.write_bgra(black_box(&mut buffer), WIDTH, HEIGHT))
    });
    group.finish();
}

criterion_group!(benches, bench_presets, bench_stage, bench_bgra);

criterion_main!(benches);
