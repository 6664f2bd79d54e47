//! Testing utilities: tracing setup and synthetic images.

#![allow(dead_code)]

use common::Buffer2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Seeded standard-normal generator.
pub struct GaussianRng {
    rng: StdRng,
    normal: Normal<f64>,
}

impl GaussianRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            normal: Normal::new(0.0, 1.0).expect("unit normal is valid"),
        }
    }

    pub fn next_gaussian(&mut self) -> f64 {
        self.normal.sample(&mut self.rng)
    }
}

/// Constant image.
pub fn flat(width: usize, height: usize, value: f64) -> Buffer2<f64> {
    Buffer2::new_filled(width, height, value)
}

/// Add zero-mean Gaussian noise with standard deviation `sigma`.
pub fn add_gaussian_noise(image: &mut Buffer2<f64>, sigma: f64, seed: u64) {
    let mut rng = GaussianRng::new(seed);
    for p in image.iter_mut() {
        *p += rng.next_gaussian() * sigma;
    }
}

/// Flat background at `mean` with Gaussian noise.
pub fn noisy_background(width: usize, height: usize, mean: f64, sigma: f64, seed: u64) -> Buffer2<f64> {
    let mut image = flat(width, height, mean);
    add_gaussian_noise(&mut image, sigma, seed);
    image
}

/// Overwrite the rectangle `[x0, x0 + w) × [y0, y0 + h)` with `value`.
pub fn fill_block(image: &mut Buffer2<f64>, x0: usize, y0: usize, w: usize, h: usize, value: f64) {
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            image[(x, y)] = value;
        }
    }
}

/// Add a circular Gaussian profile with peak `amplitude` centred at `(cx, cy)`.
pub fn add_gaussian_blob(image: &mut Buffer2<f64>, cx: f64, cy: f64, sigma: f64, amplitude: f64) {
    let two_sigma_sq = 2.0 * sigma * sigma;
    for y in 0..image.height() {
        for x in 0..image.width() {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            image[(x, y)] += amplitude * (-(dx * dx + dy * dy) / two_sigma_sq).exp();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_rng_is_deterministic() {
        let mut a = GaussianRng::new(7);
        let mut b = GaussianRng::new(7);
        for _ in 0..10 {
            assert_eq!(a.next_gaussian(), b.next_gaussian());
        }
    }

    #[test]
    fn test_gaussian_rng_moments() {
        let mut rng = GaussianRng::new(42);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| rng.next_gaussian()).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05, "mean = {mean}");
        assert!((var - 1.0).abs() < 0.05, "var = {var}");
    }

    #[test]
    fn test_fill_block() {
        let mut image = flat(8, 8, 1.0);
        fill_block(&mut image, 2, 3, 2, 2, 9.0);
        assert_eq!(image[(2, 3)], 9.0);
        assert_eq!(image[(3, 4)], 9.0);
        assert_eq!(image[(4, 4)], 1.0);
        assert_eq!(image.iter().filter(|&&v| v == 9.0).count(), 4);
    }

    #[test]
    fn test_gaussian_blob_peak() {
        let mut image = flat(21, 21, 0.0);
        add_gaussian_blob(&mut image, 10.0, 10.0, 2.0, 50.0);
        assert!((image[(10, 10)] - 50.0).abs() < 1e-12);
        assert!(image[(12, 10)] < 50.0);
    }
}
