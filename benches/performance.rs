// Performance benchmarks for locket-widget
//
// Run with: cargo bench
// View results in: target/criterion/report/index.html

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use locket_widget::{
    dispatch::route,
    render::{circle_crop, Bitmap, LivePhotoCompositor, ShapeMask, StrokeCompositor},
    style::{Color, ShapeKind, StrokeDescriptor, StrokeDirection},
    widget::{ContentUpdate, WidgetRegistration},
};

fn photo(side: u32) -> Bitmap {
    let mut rgba = Vec::with_capacity((side * side * 4) as usize);
    for y in 0..side {
        for x in 0..side {
            rgba.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, 128, 255]);
        }
    }
    Bitmap::from_rgba8(side, side, &rgba)
}

/// Benchmark shape masking per shape at widget size
fn bench_shape_mask(c: &mut Criterion) {
    let image = photo(512);
    let mut group = c.benchmark_group("shape_mask");

    for shape in [
        ShapeKind::Rounded,
        ShapeKind::Circle,
        ShapeKind::Squircle,
        ShapeKind::Heart,
        ShapeKind::Star,
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{:?}", shape)), &shape, |b, &shape| {
            b.iter(|| black_box(ShapeMask::apply(black_box(&image), shape)))
        });
    }

    group.finish();
}

/// Benchmark solid and gradient strokes
fn bench_stroke(c: &mut Criterion) {
    let image = ShapeMask::apply(&photo(512), ShapeKind::Heart);
    let compositor = StrokeCompositor::new(ShapeKind::Heart);
    let mut group = c.benchmark_group("stroke");

    let solid = StrokeDescriptor::new(vec![Color::WHITE], StrokeDirection::Horizontal);
    group.bench_function("solid", |b| {
        b.iter(|| black_box(compositor.apply(black_box(&image), &solid)))
    });

    let gradient = StrokeDescriptor::new(
        vec![Color::rgb(255, 0, 128), Color::rgb(255, 200, 0), Color::WHITE],
        StrokeDirection::DiagonalDown,
    );
    group.bench_function("gradient", |b| {
        b.iter(|| black_box(compositor.apply(black_box(&image), &gradient)))
    });

    let noop = StrokeDescriptor::none();
    group.bench_function("noop", |b| {
        b.iter(|| black_box(compositor.apply(black_box(&image), &noop)))
    });

    group.finish();
}

/// Benchmark both live-photo flip frames
fn bench_live_frames(c: &mut Criterion) {
    let primary = photo(512);
    let secondary = photo(384);
    let compositor = LivePhotoCompositor::new(
        ShapeKind::Circle,
        Some(StrokeDescriptor::new(vec![Color::WHITE], StrokeDirection::Vertical)),
    );

    c.bench_function("live_frames", |b| {
        b.iter(|| black_box(compositor.frames(black_box(&primary), black_box(&secondary))))
    });
}

/// Benchmark avatar circle crop
fn bench_circle_crop(c: &mut Criterion) {
    let avatar = photo(256);
    c.bench_function("circle_crop", |b| {
        b.iter(|| black_box(circle_crop(black_box(&avatar))))
    });
}

/// Benchmark routing across many registrations
fn bench_route(c: &mut Criterion) {
    let registrations: Vec<WidgetRegistration> = (0..64)
        .map(|id| {
            let registration = WidgetRegistration::new(id).with_sender_info(id % 2 == 0);
            if id % 3 == 0 {
                registration.with_filter([format!("u{}", id % 5)])
            } else {
                registration
            }
        })
        .collect();
    let update = ContentUpdate::new("u1", "p1", "L");

    c.bench_function("route_64", |b| {
        b.iter(|| black_box(route(black_box(&update), &registrations)))
    });
}

criterion_group!(
    benches,
    bench_shape_mask,
    bench_stroke,
    bench_live_frames,
    bench_circle_crop,
    bench_route,
);
criterion_main!(benches);
