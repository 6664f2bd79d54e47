//! Background estimation from flat tiles.
//!
//! The image is covered with square tiles at power-of-two scales. A tile is
//! "flat" when its values look like pure Gaussian noise: they pass a normality
//! test and neither the top/bottom nor the left/right halves differ in mean.
//! The largest scale with at least one flat tile is chosen, and the background
//! mean and variance are measured over the union of all flat tiles at that scale.

mod hypothesis;
mod tile;

#[cfg(test)]
mod tests;

pub use hypothesis::{MIN_SAMPLES, RejectionThresholds, equal_means_p_value, normality_p_value};
pub use tile::{Tile, tile_grid};

use common::Buffer2;
use rayon::prelude::*;

use crate::config::TileExponents;
use crate::error::{Error, Result};
use crate::math::{Moments, nan_min};

/// Relative floor applied to a zero background variance.
const MIN_RELATIVE_VARIANCE: f64 = 1e-12;

/// Result of a background estimation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundEstimate {
    pub mean: f64,
    /// Population variance over all flat tiles.
    pub variance: f64,
    /// Side length of the tiles used.
    pub tile_size: usize,
    /// Number of flat tiles at `tile_size`.
    pub flat_tiles: usize,
}

/// Background statistics consumed by the rest of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundStats {
    pub mean: f64,
    /// Always strictly positive.
    pub variance: f64,
    /// Electrons per ADU. Always strictly positive.
    pub gain: f64,
}

/// Flat-tile background estimator.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundEstimator {
    thresholds: RejectionThresholds,
    exponents: TileExponents,
}

impl BackgroundEstimator {
    pub fn new(rejection_rate: f64, exponents: TileExponents) -> Self {
        Self {
            thresholds: RejectionThresholds::from_rate(rejection_rate),
            exponents,
        }
    }

    pub fn thresholds(&self) -> RejectionThresholds {
        self.thresholds
    }

    /// Estimate the background mean and variance of `image`.
    pub fn estimate(&self, image: &Buffer2<f64>) -> Result<BackgroundEstimate> {
        let tile_size = self
            .largest_flat_tile(image)
            .ok_or(Error::NoUsableTile {
                min_size: self.exponents.min_size(),
                max_size: self.exponents.max_size(),
            })?;
        tracing::info!("Using a tile size of {} in the background", tile_size);

        let flat = self.flat_tiles(image, tile_size);
        tracing::info!("Number of usable tiles: {}", flat.len());

        let moments = flat
            .par_iter()
            .map(|tile| Moments::from_values(image.region(tile.x, tile.y, tile.size, tile.size)))
            .collect::<Vec<_>>()
            .into_iter()
            .fold(Moments::default(), Moments::merge);

        Ok(BackgroundEstimate {
            mean: moments.mean,
            variance: moments.variance(),
            tile_size,
            flat_tiles: flat.len(),
        })
    }

    /// Search the tile scale.
    ///
    /// Starting at `2^start`: if flat tiles exist, double until they stop existing
    /// and return the last scale that had them (or `2^max`). Otherwise halve until
    /// they appear and return that scale. `None` if no scale down to `2^min` works.
    pub fn largest_flat_tile(&self, image: &Buffer2<f64>) -> Option<usize> {
        let max_size = self.exponents.max_size();
        let min_size = self.exponents.min_size();
        let mut size = self.exponents.start_size();

        if self.has_flat_tile(image, size) {
            while size < max_size {
                size *= 2;
                if !self.has_flat_tile(image, size) {
                    return Some(size / 2);
                }
            }
            return Some(max_size);
        }

        while size > min_size {
            size /= 2;
            if self.has_flat_tile(image, size) {
                return Some(size);
            }
        }

        None
    }

    /// Whether at least one tile of side `size` is flat.
    pub fn has_flat_tile(&self, image: &Buffer2<f64>, size: usize) -> bool {
        let tiles = tile_grid(image.width(), image.height(), size);
        let found = tiles.par_iter().any(|tile| self.is_flat(image, tile));
        tracing::debug!(size, tiles = tiles.len(), found, "Tile scale tested");
        found
    }

    /// All flat tiles of side `size`, raster order.
    pub fn flat_tiles(&self, image: &Buffer2<f64>, size: usize) -> Vec<Tile> {
        tile_grid(image.width(), image.height(), size)
            .into_par_iter()
            .filter(|tile| self.is_flat(image, tile))
            .collect()
    }

    /// Flatness test for one tile.
    ///
    /// Rejects tiles that are entirely zero, entirely NaN, or hold too few finite
    /// values to test, then applies the normality and the two equal-means tests.
    pub fn is_flat(&self, image: &Buffer2<f64>, tile: &Tile) -> bool {
        let values = tile.values(image);

        // Zero borders from cropped or mosaicked frames.
        if values.iter().all(|&v| v == 0.0) {
            return false;
        }
        if values.iter().all(|v| v.is_nan()) {
            return false;
        }

        let Some(p) = normality_p_value(&values) else {
            return false;
        };
        if p < self.thresholds.normality {
            return false;
        }

        let (top, bottom) = tile.top_bottom(image);
        if !self.means_agree(&top, &bottom) {
            return false;
        }

        let (left, right) = tile.left_right(image);
        self.means_agree(&left, &right)
    }

    fn means_agree(&self, a: &[f64], b: &[f64]) -> bool {
        match equal_means_p_value(a, b) {
            Some(p) => p.is_nan() || p >= self.thresholds.equal_means,
            None => false,
        }
    }
}

/// Estimate background mean and variance with the default tile scales.
pub fn estimate(image: &Buffer2<f64>, target_false_positive_rate: f64) -> Result<(f64, f64)> {
    let estimate = BackgroundEstimator::new(target_false_positive_rate, TileExponents::default())
        .estimate(image)?;
    Ok((estimate.mean, estimate.variance))
}

/// Estimate the detector gain from the background level and noise.
///
/// A negative image minimum replaces `soft_bias`. A non-positive or non-finite
/// result falls back to `f64::MAX`, which removes the Poisson term from the
/// noise model.
pub fn estimate_gain(image: &Buffer2<f64>, mean: f64, variance: f64, soft_bias: f64) -> f64 {
    let soft_bias = match nan_min(image.pixels()) {
        Some(min) if min < 0.0 => min,
        _ => soft_bias,
    };

    let gain = (mean - soft_bias) / variance;
    if gain > 0.0 && gain.is_finite() {
        gain
    } else {
        tracing::warn!(
            "Estimated gain {} is not positive, using {} (no Poisson noise term)",
            gain,
            f64::MAX
        );
        f64::MAX
    }
}

/// Clamp a zero or negative background variance to a small positive value relative to `mean`.
pub fn positive_variance(variance: f64, mean: f64) -> f64 {
    if variance > 0.0 {
        return variance;
    }
    let floor = mean.abs().max(1.0) * MIN_RELATIVE_VARIANCE;
    tracing::warn!(
        "Background variance {} is not positive, clamping to {}",
        variance,
        floor
    );
    floor
}
