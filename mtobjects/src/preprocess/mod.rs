//! Image preparation for max-tree flooding.
//!
//! Subtract the background, smooth with a Gaussian matched to the expected
//! point-spread width, clamp negative values to zero and replace NaN.

mod convolution;

pub use convolution::{gaussian_blur, gaussian_kernel_1d, kernel_power_2d};

use common::Buffer2;

use crate::background::BackgroundStats;
use crate::math::fwhm_to_sigma;

/// Preprocessing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preprocessor {
    /// FWHM of the smoothing kernel in pixels. 0 disables smoothing.
    pub smoothing_fwhm: f64,
    /// Substitute for NaN after smoothing.
    pub nan_replacement: f64,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            smoothing_fwhm: 2.0,
            nan_replacement: f64::INFINITY,
        }
    }
}

impl Preprocessor {
    pub fn new(smoothing_fwhm: f64, nan_replacement: f64) -> Self {
        Self {
            smoothing_fwhm,
            nan_replacement,
        }
    }

    /// Sum of squared weights of the 2D smoothing kernel; 1 without smoothing.
    pub fn kernel_power(&self) -> f64 {
        kernel_power_2d(&gaussian_kernel_1d(fwhm_to_sigma(self.smoothing_fwhm)))
    }

    pub fn run(&self, image: &Buffer2<f64>, stats: &BackgroundStats) -> Buffer2<f64> {
        let subtracted = image.map(|&v| v - stats.mean);

        let mut processed = if self.smoothing_fwhm > 0.0 {
            gaussian_blur(&subtracted, fwhm_to_sigma(self.smoothing_fwhm))
        } else {
            subtracted
        };

        let mut nan_count = 0usize;
        for v in processed.iter_mut() {
            if v.is_nan() {
                *v = self.nan_replacement;
                nan_count += 1;
            } else if *v < 0.0 {
                *v = 0.0;
            }
        }
        if nan_count > 0 {
            tracing::debug!(
                nan_count,
                replacement = self.nan_replacement,
                "Replaced NaN pixels after smoothing"
            );
        }

        processed
    }
}

/// Background-subtract, smooth, clamp and fill NaN with `+∞`.
pub fn preprocess(image: &Buffer2<f64>, stats: &BackgroundStats, smoothing_fwhm: f64) -> Buffer2<f64> {
    Preprocessor {
        smoothing_fwhm,
        ..Default::default()
    }
    .run(image, stats)
}
