//! Per-frame stitching and audio correlation cost

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cv_core::translation_matrix;
use cv_photo::{stitch_frame, StitchGeometry};
use cv_sync::{cross_correlate_offset, SyncConfig};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

fn noise_frame(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbImage::from_fn(width, height, |_, _| Rgb([rng.gen_range(1..=255), rng.gen(), rng.gen()]))
}

fn benchmark_stitch_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("stitch_frame");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(20);

    for (w, h) in [(640u32, 360u32), (1280, 720), (1920, 1080)] {
        let left = noise_frame(w, h, 1);
        let right = noise_frame(w, h, 2);
        let shift = (w as f64 * 0.7).round();
        let geometry = StitchGeometry {
            homography: translation_matrix(shift, 0.0),
            canvas_width: w + shift as u32,
            canvas_height: h,
            offset_x: 0,
            offset_y: 0,
            blend: Some(shift as u32..w),
        };

        group.bench_with_input(
            BenchmarkId::new("cpu", format!("{w}x{h}")),
            &(left, right),
            |b, (l, r)| {
                b.iter(|| stitch_frame(black_box(l), black_box(r), &geometry));
            },
        );
    }

    group.finish();
}

fn benchmark_audio_correlation(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_correlation");
    group.sample_size(10);

    let rate = 16_000u32;
    let mut rng = StdRng::seed_from_u64(9);
    for seconds in [10usize, 60] {
        let source: Vec<f32> = (0..(seconds + 1) * rate as usize).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let lead = rate as usize / 2;
        let left = source[lead..].to_vec();
        let right = source[..source.len() - lead].to_vec();
        let config = SyncConfig::default();

        group.bench_with_input(BenchmarkId::new("fft", format!("{seconds}s")), &(left, right), |b, (l, r)| {
            b.iter(|| cross_correlate_offset(black_box(l), black_box(r), rate, &config));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_stitch_frame, benchmark_audio_correlation);
criterion_main!(benches);
