// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the scanwerk-document page pipeline: geometry
// correction on a synthetic capture and each tone filter.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, GrayImage, Luma};

use scanwerk_core::FilterId;
use scanwerk_document::{GeometryCorrector, ImageProcessor, apply_filter};

/// Dark frame with a bright sheet, PNG-encoded.
fn synthetic_capture(width: u32, height: u32) -> Vec<u8> {
    let mut img = GrayImage::from_pixel(width, height, Luma([30u8]));
    let (mx, my) = (width / 8, height / 8);
    for y in my..height - my {
        for x in mx..width - mx {
            img.put_pixel(x, y, Luma([240u8]));
        }
    }
    ImageProcessor::from_dynamic(DynamicImage::ImageLuma8(img))
        .to_png_bytes()
        .expect("encode synthetic capture")
}

fn bench_geometry_correction(c: &mut Criterion) {
    let capture = synthetic_capture(400, 500);
    let corrector = GeometryCorrector::new();

    c.bench_function("geometry_correction (400x500)", |b| {
        b.iter(|| {
            let result = corrector.correct(black_box(&capture));
            black_box(result.ok());
        });
    });
}

fn bench_filters(c: &mut Criterion) {
    let capture = synthetic_capture(400, 500);
    let mut group = c.benchmark_group("filters (400x500)");
    for filter in FilterId::ALL {
        group.bench_function(filter.as_str(), |b| {
            b.iter(|| black_box(apply_filter(black_box(&capture), filter).ok()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_geometry_correction, bench_filters);
criterion_main!(benches);
