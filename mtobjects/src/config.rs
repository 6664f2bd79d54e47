//! Configuration types for object detection.
//!
//! This module defines the flat [`Config`] struct and the enums it uses. All
//! parameters are grouped by comments into logical sections. Options left as
//! `None` are estimated from the image.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Enums
// ============================================================================

/// Pixel connectivity used when flooding the max-tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Connectivity {
    /// Pixels at (x±1, y) and (x, y±1) are connected.
    Four,
    /// All 8 surrounding pixels are connected.
    #[default]
    Eight,
}

impl Connectivity {
    /// Neighbour offsets `(dx, dy)` in raster order.
    pub fn offsets(self) -> &'static [(isize, isize)] {
        const FOUR: [(isize, isize); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];
        const EIGHT: [(isize, isize); 8] = [
            (-1, -1),
            (0, -1),
            (1, -1),
            (-1, 0),
            (1, 0),
            (-1, 1),
            (0, 1),
            (1, 1),
        ];
        match self {
            Self::Four => &FOUR,
            Self::Eight => &EIGHT,
        }
    }
}

/// Order in which tree nodes are tested for significance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Traversal {
    /// Root to leaves. Each node is tested knowing its closest significant ancestor.
    #[default]
    Up,
    /// Leaves to root. Each node is tested against the background level, then
    /// ancestor relations are resolved in a second pass.
    Down,
}

/// Which statistical test decides node significance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignificanceTestKind {
    /// Normalised power against a rational boundary in the node area.
    /// Only defined for `alpha = 1e-6` and a FWHM 2 pre-filter.
    #[default]
    PowerGivenArea,
    /// Normalised power against a chi-squared quantile, valid for any `alpha`.
    ChiSquaredPower,
}

// ============================================================================
// Tile search bounds
// ============================================================================

/// Background tile side lengths as powers of two: `2^min ..= 2^max`, search starts at `2^start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileExponents {
    pub start: u32,
    pub min: u32,
    pub max: u32,
}

impl Default for TileExponents {
    fn default() -> Self {
        Self {
            start: 6,
            min: 4,
            max: 7,
        }
    }
}

impl TileExponents {
    pub fn start_size(&self) -> usize {
        1 << self.start
    }

    pub fn min_size(&self) -> usize {
        1 << self.min
    }

    pub fn max_size(&self) -> usize {
        1 << self.max
    }
}

// ============================================================================
// Config
// ============================================================================

/// Detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -- Background --------------------------------------------------------
    /// Constant offset added by the detector electronics.
    pub soft_bias: f64,
    /// Electrons per ADU. `None` estimates it from the background.
    pub gain: Option<f64>,
    /// Background mean. `None` estimates it from flat tiles.
    pub bg_mean: Option<f64>,
    /// Background variance. `None` estimates it from flat tiles.
    pub bg_variance: Option<f64>,
    /// Target false-positive rate of the tile flatness tests.
    pub bg_rejection_rate: f64,
    /// Tile scales searched during background estimation.
    pub tile_exponents: TileExponents,

    // -- Preprocessing -----------------------------------------------------
    /// FWHM in pixels of the Gaussian smoothing kernel. 0 disables smoothing.
    pub smoothing_fwhm: f64,
    /// Value substituted for NaN after smoothing.
    pub nan_replacement: f64,

    // -- Tree --------------------------------------------------------------
    pub connectivity: Connectivity,

    // -- Filtering ---------------------------------------------------------
    /// Significance level of the node test.
    pub alpha: f64,
    /// Fraction of the local noise by which object markers are promoted.
    pub move_factor: f64,
    /// Minimum rise, in noise sigmas, above the closest significant ancestor.
    pub min_distance: f64,
    pub traversal: Traversal,
    pub significance_test: SignificanceTestKind,

    // -- Output ------------------------------------------------------------
    /// Assign final ids in random order instead of ascending order.
    pub shuffle_labels: bool,
    /// Log level handed to `common::log_setup::setup_logging`: 0 = warnings,
    /// 1 = stage summaries, 2 = timings and counts. The library only emits
    /// `tracing` events and never installs a subscriber itself.
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            soft_bias: 0.0,
            gain: None,
            bg_mean: None,
            bg_variance: None,
            bg_rejection_rate: 0.05,
            tile_exponents: TileExponents::default(),
            smoothing_fwhm: 2.0,
            nan_replacement: f64::INFINITY,
            connectivity: Connectivity::default(),
            alpha: 1e-6,
            move_factor: 0.5,
            min_distance: 0.0,
            traversal: Traversal::default(),
            significance_test: SignificanceTestKind::default(),
            shuffle_labels: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Parse a (possibly partial) YAML document; missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> std::result::Result<Self, serde_yml::Error> {
        serde_yml::from_str(yaml)
    }

    /// Reject values outside their documented domains.
    pub fn validate(&self) -> Result<()> {
        check(
            "alpha",
            self.alpha,
            self.alpha > 0.0 && self.alpha < 1.0,
            "0 < alpha < 1",
        )?;
        check(
            "move_factor",
            self.move_factor,
            self.move_factor >= 0.0,
            "move_factor >= 0",
        )?;
        check(
            "min_distance",
            self.min_distance,
            self.min_distance >= 0.0,
            "min_distance >= 0",
        )?;
        check(
            "bg_rejection_rate",
            self.bg_rejection_rate,
            self.bg_rejection_rate > 0.0 && self.bg_rejection_rate < 1.0,
            "0 < bg_rejection_rate < 1",
        )?;
        check(
            "smoothing_fwhm",
            self.smoothing_fwhm,
            self.smoothing_fwhm >= 0.0 && self.smoothing_fwhm.is_finite(),
            "finite smoothing_fwhm >= 0",
        )?;
        check(
            "soft_bias",
            self.soft_bias,
            self.soft_bias.is_finite(),
            "finite soft_bias",
        )?;
        check(
            "verbosity",
            self.verbosity as f64,
            self.verbosity <= 2,
            "verbosity in 0..=2",
        )?;
        if let Some(gain) = self.gain {
            check("gain", gain, gain > 0.0 && gain.is_finite(), "gain > 0")?;
        }
        if let Some(mean) = self.bg_mean {
            check("bg_mean", mean, mean.is_finite(), "finite bg_mean")?;
        }
        if let Some(variance) = self.bg_variance {
            check(
                "bg_variance",
                variance,
                variance > 0.0 && variance.is_finite(),
                "bg_variance > 0",
            )?;
        }

        let tiles = &self.tile_exponents;
        check(
            "tile_exponents.start",
            tiles.start as f64,
            tiles.min <= tiles.start && tiles.start <= tiles.max,
            "min <= start <= max",
        )?;
        check(
            "tile_exponents.max",
            tiles.max as f64,
            (1..=15).contains(&tiles.max),
            "1 <= max <= 15",
        )?;

        if self.significance_test == SignificanceTestKind::PowerGivenArea && self.alpha != 1e-6 {
            return Err(Error::UnsupportedSignificanceLevel { alpha: self.alpha });
        }

        Ok(())
    }
}

fn check(name: &'static str, value: f64, ok: bool, expected: &'static str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::ParameterRange {
            name,
            value,
            expected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_alpha_outside_open_interval_rejected() {
        for alpha in [0.0, 1.0, -0.5, 2.0] {
            let config = Config {
                alpha,
                significance_test: SignificanceTestKind::ChiSquaredPower,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(Error::ParameterRange { name: "alpha", .. })
            ));
        }
    }

    #[test]
    fn test_negative_move_factor_rejected() {
        let config = Config {
            move_factor: -0.1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::ParameterRange {
                name: "move_factor",
                ..
            })
        ));
    }

    #[test]
    fn test_tabulated_test_requires_default_alpha() {
        let config = Config {
            alpha: 1e-3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::UnsupportedSignificanceLevel { .. })
        ));

        let config = Config {
            alpha: 1e-3,
            significance_test: SignificanceTestKind::ChiSquaredPower,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_tile_exponents_must_be_ordered() {
        let config = Config {
            tile_exponents: TileExponents {
                start: 3,
                min: 4,
                max: 7,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_supplied_gain_rejected() {
        let config = Config {
            gain: Some(0.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = Config::from_yaml_str("move_factor: 0.0\nmin_distance: 1.5\n").unwrap();
        assert_eq!(config.move_factor, 0.0);
        assert_eq!(config.min_distance, 1.5);
        assert_eq!(config.alpha, 1e-6);
        assert_eq!(config.connectivity, Connectivity::Eight);
        assert!(config.gain.is_none());
    }

    #[test]
    fn test_verbosity_maps_to_log_filter() {
        use common::log_setup::verbosity_filter;

        let config = Config::from_yaml_str("verbosity: 2\n").unwrap();
        config.validate().unwrap();
        assert_eq!(verbosity_filter(config.verbosity), "debug");
        assert_eq!(verbosity_filter(Config::default().verbosity), "warn");

        let config = Config {
            verbosity: 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::ParameterRange {
                name: "verbosity",
                ..
            })
        ));
    }

    #[test]
    fn test_connectivity_offsets() {
        assert_eq!(Connectivity::Four.offsets().len(), 4);
        assert_eq!(Connectivity::Eight.offsets().len(), 8);
        assert!(!Connectivity::Eight.offsets().contains(&(0, 0)));
    }
}
