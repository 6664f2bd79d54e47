use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use mtobjects::{Buffer2, Config, Detector};

const CONFIG: &str = "
move_factor: 0.5
min_distance: 0.0
traversal: Up
significance_test: PowerGivenArea
verbosity: 0
";

/// Noisy sky at 1000 ADU with Gaussian sources.
fn synthetic_sky(size: usize, seed: u64) -> anyhow::Result<Buffer2<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(1000.0, 10.0)?;
    let mut image = Buffer2::from_fn(size, size, |_, _| noise.sample(&mut rng));

    let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);
    for _ in 0..size / 4 {
        let cx = rng.random::<f64>() * size as f64;
        let cy = rng.random::<f64>() * size as f64;
        let sigma = 1.0 + rng.random::<f64>() * 3.0;
        let amplitude = 20.0 + rng.random::<f64>() * 2000.0;
        let reach = (5.0 * sigma) as isize;
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let x = cx as isize + dx;
                let y = cy as isize + dy;
                if x < 0 || y < 0 || x >= size as isize || y >= size as isize {
                    continue;
                }
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                image[(x as usize, y as usize)] += amplitude * (-d2 / (2.0 * sigma * sigma)).exp();
            }
        }
    }
    Ok(image)
}

fn setup(size: usize) -> anyhow::Result<(Detector, Buffer2<f64>)> {
    let config = Config::from_yaml_str(CONFIG)?;
    config.validate()?;
    common::log_setup::setup_logging(config.verbosity, None);
    Ok((Detector::from_config(config), synthetic_sky(size, 7)?))
}

fn bench_full_pipeline(c: &mut Criterion) {
    let (detector, image) = setup(512).unwrap_or_else(|e| panic!("Benchmark setup failed: {e}"));

    c.bench_function("detect_512", |b| {
        b.iter(|| {
            let result = detector
                .detect(black_box(&image))
                .unwrap_or_else(|e| panic!("Detection failed: {e}"));
            black_box(result.diagnostics.object_count)
        })
    });
}

criterion_group!(benches, bench_full_pipeline);
criterion_main!(benches);
