//! Node significance tests.
//!
//! A test sees one node at a time through a [`TreeContext`], which carries the
//! tree, the noise model and the closest-significant-ancestor relation known so
//! far. All state a test keeps between calls is built in
//! [`SignificanceTest::initialize`].

use rayon::prelude::*;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use super::{FilterParameters, NO_NODE};
use crate::config::SignificanceTestKind;
use crate::error::{Error, Result};
use crate::maxtree::MaxTree;

/// Largest area for which the rational boundary was fitted.
const MAX_TABULATED_AREA: usize = 4087;

/// Significance level the rational boundary was fitted for.
const TABULATED_ALPHA: f64 = 1e-6;

// Rational fit of the rejection boundary: (p1 a³ + p2 a² + p3 a + p4) / (a³ + q1 a² + q2 a + q3).
const P1: f64 = 1.683355084690155e-01;
const P2: f64 = 3.770229379757511e+02;
const P3: f64 = 1.176722049258011e+05;
const P4: f64 = 6.239836661965291e+06;
const Q1: f64 = 1.354265276841128e+03;
const Q2: f64 = 2.091126298053044e+05;
const Q3: f64 = 1.424803575269314e+06;

/// Read-only view of the tree handed to a [`SignificanceTest`].
#[derive(Debug, Clone, Copy)]
pub struct TreeContext<'a> {
    pub tree: &'a MaxTree,
    pub params: &'a FilterParameters,
    /// Level roots in ascending level order.
    pub relevant: &'a [usize],
    /// Closest significant ancestor per node, `NO_NODE` if none (yet).
    pub ancestors: &'a [usize],
}

impl<'a> TreeContext<'a> {
    pub fn closest_significant_ancestor(&self, node: usize) -> Option<usize> {
        match self.ancestors[node] {
            NO_NODE => None,
            ancestor => Some(ancestor),
        }
    }

    /// Level the node is measured from: its closest significant ancestor, or the background.
    pub fn reference_level(&self, node: usize) -> f64 {
        self.closest_significant_ancestor(node)
            .map_or(0.0, |a| self.tree.level(a))
    }

    /// Height of the node above its reference level.
    pub fn distance(&self, node: usize) -> f64 {
        self.tree.level(node) - self.reference_level(node)
    }

    /// Background variance plus the Poisson term of the closest significant ancestor.
    pub fn noise_variance(&self, node: usize) -> f64 {
        let mut variance = self.params.bg_variance;
        if let Some(ancestor) = self.closest_significant_ancestor(node) {
            variance += self.tree.level(ancestor) / self.params.gain;
        }
        variance
    }

    /// Whether the node sits at a non-finite level, i.e. a masked pixel.
    /// Such nodes are never significant.
    pub fn is_masked(&self, node: usize) -> bool {
        !self.tree.level(node).is_finite()
    }

    /// Power above the reference level, per pixel, in units of the noise variance.
    pub fn normalized_power(&self, node: usize, variance: f64) -> f64 {
        let power = self.tree.power_above(node, self.reference_level(node));
        power / variance / self.tree.area(node) as f64
    }

    /// False when `min_distance` is set and the node rises fewer noise sigmas than that.
    pub fn clears_min_distance(&self, node: usize, variance: f64) -> bool {
        let min_distance = self.params.min_distance;
        !(min_distance > 0.0 && self.distance(node) / variance.sqrt() < min_distance)
    }
}

/// A statistical predicate deciding whether a node is a real structure.
pub trait SignificanceTest: Send + Sync {
    fn name(&self) -> &'static str;

    /// Prepare for a run over `ctx.tree`. Called once, before any `evaluate`.
    fn initialize(&mut self, ctx: &TreeContext<'_>) -> Result<()>;

    fn evaluate(&self, node: usize, ctx: &TreeContext<'_>) -> bool;
}

/// Build the test selected in the configuration.
///
/// `kernel_power` is Σk² of the smoothing kernel, used by the chi-squared test.
pub fn make_test(kind: SignificanceTestKind, kernel_power: f64) -> Box<dyn SignificanceTest> {
    match kind {
        SignificanceTestKind::PowerGivenArea => Box::new(PowerGivenArea),
        SignificanceTestKind::ChiSquaredPower => Box::new(ChiSquaredPower::new(kernel_power)),
    }
}

// ============================================================================
// Power given area
// ============================================================================

/// Normalised power against a rational boundary in the node area.
///
/// The boundary was fitted for `alpha = 1e-6` on images smoothed with a
/// FWHM 2 Gaussian; other levels are rejected at initialisation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerGivenArea;

impl PowerGivenArea {
    /// Rejection boundary for a node of `area` pixels.
    pub fn boundary(area: usize) -> f64 {
        let a = area.min(MAX_TABULATED_AREA) as f64;
        let a2 = a * a;
        let a3 = a2 * a;
        (P1 * a3 + P2 * a2 + P3 * a + P4) / (a3 + Q1 * a2 + Q2 * a + Q3)
    }
}

impl SignificanceTest for PowerGivenArea {
    fn name(&self) -> &'static str {
        "power given area (FWHM 2 Gaussian pre-filter)"
    }

    fn initialize(&mut self, ctx: &TreeContext<'_>) -> Result<()> {
        if ctx.params.alpha != TABULATED_ALPHA {
            return Err(Error::UnsupportedSignificanceLevel {
                alpha: ctx.params.alpha,
            });
        }
        Ok(())
    }

    fn evaluate(&self, node: usize, ctx: &TreeContext<'_>) -> bool {
        if ctx.is_masked(node) {
            return false;
        }
        let variance = ctx.noise_variance(node);
        if !ctx.clears_min_distance(node, variance) {
            return false;
        }
        let power = ctx.normalized_power(node, variance);
        power.is_finite() && power > Self::boundary(ctx.tree.area(node))
    }
}

// ============================================================================
// Chi-squared power
// ============================================================================

/// Normalised power against the `1 − alpha` quantile of χ²(area) / area.
///
/// Smoothed white noise has variance `κσ²` with `κ = Σk²`, so the quantile is
/// scaled by `κ`. Quantiles are computed once per distinct node area.
#[derive(Debug, Clone, Default)]
pub struct ChiSquaredPower {
    kernel_power: f64,
    /// `(area, threshold)` sorted by area.
    thresholds: Vec<(usize, f64)>,
}

impl ChiSquaredPower {
    pub fn new(kernel_power: f64) -> Self {
        Self {
            kernel_power,
            thresholds: Vec::new(),
        }
    }

    fn quantile_threshold(area: usize, alpha: f64, kernel_power: f64) -> Result<f64> {
        let dist = ChiSquared::new(area as f64).map_err(|_| Error::ParameterRange {
            name: "area",
            value: area as f64,
            expected: "area >= 1",
        })?;
        Ok(dist.inverse_cdf(1.0 - alpha) / area as f64 * kernel_power)
    }

    fn threshold(&self, area: usize) -> f64 {
        match self.thresholds.binary_search_by_key(&area, |&(a, _)| a) {
            Ok(pos) => self.thresholds[pos].1,
            Err(_) => f64::INFINITY,
        }
    }
}

impl SignificanceTest for ChiSquaredPower {
    fn name(&self) -> &'static str {
        "chi-squared power"
    }

    fn initialize(&mut self, ctx: &TreeContext<'_>) -> Result<()> {
        let alpha = ctx.params.alpha;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(Error::ParameterRange {
                name: "alpha",
                value: alpha,
                expected: "0 < alpha < 1",
            });
        }

        let mut areas: Vec<usize> = ctx.relevant.iter().map(|&node| ctx.tree.area(node)).collect();
        areas.sort_unstable();
        areas.dedup();

        let kernel_power = self.kernel_power;
        self.thresholds = areas
            .into_par_iter()
            .map(|area| Ok((area, Self::quantile_threshold(area, alpha, kernel_power)?)))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            areas = self.thresholds.len(),
            kernel_power,
            "Chi-squared thresholds precomputed"
        );
        Ok(())
    }

    fn evaluate(&self, node: usize, ctx: &TreeContext<'_>) -> bool {
        if ctx.is_masked(node) {
            return false;
        }
        let variance = ctx.noise_variance(node);
        if !ctx.clears_min_distance(node, variance) {
            return false;
        }
        let power = ctx.normalized_power(node, variance);
        power.is_finite() && power > self.threshold(ctx.tree.area(node))
    }
}
