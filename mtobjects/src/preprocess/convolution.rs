//! Separable Gaussian smoothing with reflected borders.

use common::Buffer2;
use rayon::prelude::*;

/// Kernel half-width in sigmas.
const TRUNCATE: f64 = 4.0;

/// Rows handed to one rayon task.
const ROWS_PER_CHUNK: usize = 8;

/// Compute a normalized 1D Gaussian kernel of radius `round(4σ)`.
///
/// Returns `[1.0]` for a non-positive sigma.
pub fn gaussian_kernel_1d(sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return vec![1.0];
    }

    let radius = (TRUNCATE * sigma + 0.5) as usize;
    let two_sigma_sq = 2.0 * sigma * sigma;

    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();

    let sum: f64 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Sum of squared weights of the 2D kernel `k ⊗ k`.
///
/// This is the variance reduction factor of white noise under the blur.
pub fn kernel_power_2d(kernel: &[f64]) -> f64 {
    let power_1d: f64 = kernel.iter().map(|k| k * k).sum();
    power_1d * power_1d
}

/// Mirror an out-of-range coordinate back into `0..n` (`d c b a | a b c d | d c b a`).
#[inline]
fn reflect(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Blur `image` with a Gaussian of standard deviation `sigma`.
///
/// Rows are convolved first, then columns. NaN propagates to every pixel whose
/// kernel footprint covers it.
pub fn gaussian_blur(image: &Buffer2<f64>, sigma: f64) -> Buffer2<f64> {
    let kernel = gaussian_kernel_1d(sigma);
    let width = image.width();
    let height = image.height();
    if width == 0 || height == 0 || kernel.len() == 1 {
        return image.clone();
    }

    let mut temp = vec![0.0; width * height];
    convolve_rows(image.pixels(), &mut temp, width, &kernel);

    let mut output = vec![0.0; width * height];
    convolve_cols(&temp, &mut output, width, height, &kernel);

    Buffer2::new(width, height, output)
}

fn convolve_rows(input: &[f64], output: &mut [f64], width: usize, kernel: &[f64]) {
    let radius = (kernel.len() / 2) as isize;

    output
        .par_chunks_mut(width * ROWS_PER_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, out_chunk)| {
            let y_start = chunk_idx * ROWS_PER_CHUNK;
            for (local_y, out_row) in out_chunk.chunks_mut(width).enumerate() {
                let y = y_start + local_y;
                let in_row = &input[y * width..(y + 1) * width];
                for (x, out) in out_row.iter_mut().enumerate() {
                    *out = kernel
                        .iter()
                        .enumerate()
                        .map(|(k, &w)| {
                            let sx = reflect(x as isize + k as isize - radius, width);
                            in_row[sx] * w
                        })
                        .sum();
                }
            }
        });
}

fn convolve_cols(input: &[f64], output: &mut [f64], width: usize, height: usize, kernel: &[f64]) {
    let radius = (kernel.len() / 2) as isize;

    output
        .par_chunks_mut(width * ROWS_PER_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, out_chunk)| {
            let y_start = chunk_idx * ROWS_PER_CHUNK;
            for (local_y, out_row) in out_chunk.chunks_mut(width).enumerate() {
                let y = y_start + local_y;
                for (x, out) in out_row.iter_mut().enumerate() {
                    *out = kernel
                        .iter()
                        .enumerate()
                        .map(|(k, &w)| {
                            let sy = reflect(y as isize + k as isize - radius, height);
                            input[sy * width + x] * w
                        })
                        .sum();
                }
            }
        });
}
