//! End-to-end detection driver.
//!
//! [`Detector`] runs the stages in order, each consuming the output of the
//! previous one:
//!
//! 1. background statistics (estimated unless supplied in the config)
//! 2. preprocessing (subtract, smooth, clamp)
//! 3. max-tree construction
//! 4. significance filtering into an object id map
//! 5. relabelling to `1..=k` and the levelled view
//! 6. per-object parameters on the original image


use std::time::Instant;

use common::Buffer2;

use crate::background::{BackgroundEstimator, BackgroundStats, estimate_gain, positive_variance};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::filter::{FilterStats, SignificanceFilter};
use crate::maxtree::MaxTreeBuilder;
use crate::parameters::{ObjectParameters, extract};
use crate::preprocess::Preprocessor;
use crate::relabel::{levelled, relabel};

/// Maps, table and diagnostics of one detection run.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// Object labels `1..=k`, `-1` for background.
    pub labels: Buffer2<i64>,
    /// Object pixels replaced by the lowest original value of their object, background 0.
    pub levelled: Buffer2<f64>,
    /// Per-node closest significant ancestor of the max-tree, `NO_NODE` if none.
    pub closest_significant_ancestors: Vec<usize>,
    /// One row per object, in label order.
    pub parameters: Vec<ObjectParameters>,
    pub diagnostics: Diagnostics,
}

/// Diagnostic information from a detection run.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub width: usize,
    pub height: usize,
    /// Background statistics the run used.
    pub background: BackgroundStats,
    /// Tile side used for background estimation; `None` when mean and variance were supplied.
    pub tile_size: Option<usize>,
    /// Number of flat tiles the background was measured on.
    pub flat_tiles: usize,
    /// Σk² of the smoothing kernel.
    pub kernel_power: f64,
    /// Node counts from significance filtering.
    pub filter: FilterStats,
    /// Final number of objects.
    pub object_count: usize,
}

// =============================================================================
// Detector
// =============================================================================

/// Detects and measures sources in a single-band image.
///
/// ```rust,ignore
/// let config = Config {
///     move_factor: 0.0,
///     ..Default::default()
/// };
/// let result = Detector::from_config(config).detect(&image)?;
/// parameters::write_csv(std::io::stdout(), &result.parameters)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Detector {
    config: Config,
}

impl Detector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the full pipeline on `image`.
    pub fn detect(&self, image: &Buffer2<f64>) -> Result<DetectionResult> {
        self.config.validate()?;
        if image.is_empty() {
            return Err(Error::fatal_input("image has zero size"));
        }

        let width = image.width();
        let height = image.height();
        tracing::info!("Image dimensions: {}x{}", width, height);

        let (background, tile_size, flat_tiles) =
            timed("estimate background", || self.background_stats(image))?;
        tracing::info!(
            "Background mean: {}, variance: {}, gain: {}",
            background.mean,
            background.variance,
            background.gain
        );

        let preprocessor = Preprocessor::new(self.config.smoothing_fwhm, self.config.nan_replacement);
        let kernel_power = preprocessor.kernel_power();
        let processed = timed("preprocess", || preprocessor.run(image, &background));

        let tree = timed("build max-tree", || {
            MaxTreeBuilder::new(self.config.connectivity).build(processed)
        })?;

        let mut filter = SignificanceFilter::from_config(&self.config, &background, kernel_power);
        let output = timed("filter tree", || filter.run(&tree))?;
        drop(tree);

        let mut labels = output.object_ids;
        let object_count = timed("relabel", || relabel(&mut labels, self.config.shuffle_labels));
        tracing::info!("{} objects detected", object_count);

        let levelled = levelled(image, &labels)?;
        let parameters = timed("compute parameters", || extract(image, &labels))?;

        Ok(DetectionResult {
            labels,
            levelled,
            closest_significant_ancestors: output.ancestors,
            parameters,
            diagnostics: Diagnostics {
                width,
                height,
                background,
                tile_size,
                flat_tiles,
                kernel_power,
                filter: output.stats,
                object_count,
            },
        })
    }

    /// Background statistics from the config, estimating whatever is missing.
    ///
    /// Returns the stats, the tile size and the flat tile count of the estimation
    /// (`None` and 0 when nothing was estimated).
    fn background_stats(&self, image: &Buffer2<f64>) -> Result<(BackgroundStats, Option<usize>, usize)> {
        let config = &self.config;

        let (mean, variance, tile_size, flat_tiles) = match (config.bg_mean, config.bg_variance) {
            (Some(mean), Some(variance)) => (mean, variance, None, 0),
            (mean, variance) => {
                let estimate = BackgroundEstimator::new(config.bg_rejection_rate, config.tile_exponents)
                    .estimate(image)?;
                (
                    mean.unwrap_or(estimate.mean),
                    variance.unwrap_or(estimate.variance),
                    Some(estimate.tile_size),
                    estimate.flat_tiles,
                )
            }
        };

        let variance = positive_variance(variance, mean);
        let gain = config
            .gain
            .unwrap_or_else(|| estimate_gain(image, mean, variance, config.soft_bias));

        Ok((
            BackgroundStats {
                mean,
                variance,
                gain,
            },
            tile_size,
            flat_tiles,
        ))
    }
}

/// Run `f`, logging its wall-clock time.
fn timed<T>(task: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    tracing::debug!("{:.4} seconds to {}", start.elapsed().as_secs_f64(), task);
    out
}
