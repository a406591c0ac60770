use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array1;
use obstacle_analysis::aggregate::{estimate_contact, Predictions, DEFAULT_PROB_DISTRIBUTION};
use obstacle_analysis::features::FeatureTable;
use obstacle_analysis::window::{build_window, WindowParams};
use obstacle_analysis::FeatureRow;

const TIMESTEPS: usize = 10;

pub fn bench_estimate_contact(c: &mut Criterion) {
    // A long approach: 400 overlapping sessions voting around frame 1200
    let mut predictions = Predictions::new();
    for start in 1000..1400 {
        let mut distribution = Array1::from_elem(TIMESTEPS + 1, 0.01f32);
        distribution[(start * 7) % (TIMESTEPS + 1)] = 0.9;
        predictions.insert(start, distribution);
    }

    c.bench_function("estimate_contact_400_sessions", |b| {
        b.iter(|| {
            let answer = estimate_contact(
                black_box(&predictions),
                TIMESTEPS,
                &DEFAULT_PROB_DISTRIBUTION,
            );
            black_box(answer.is_ok())
        });
    });
}

pub fn bench_build_window(c: &mut Criterion) {
    let rows = (0..20_000)
        .map(|frame| FeatureRow {
            nose_x: if frame % 2_000 < 1_500 { 100.0 } else { 300.0 },
            nose_y: 0.0,
            obstacle_x: 150.0,
            obstacle_y: 0.0,
            obstacle_confidence: 1.0,
        })
        .collect();
    let features = FeatureTable::from_rows(rows);
    let params = WindowParams::new(TIMESTEPS, 50, 80.0, 250.0, 50, 20_000);

    c.bench_function("build_window_1500_frames", |b| {
        b.iter(|| {
            let window = build_window(black_box(&features), 2_000, &params);
            black_box(window.map(|w| w.session_starts.len()))
        });
    });
}

criterion_group!(benches, bench_estimate_contact, bench_build_window);
criterion_main!(benches);
