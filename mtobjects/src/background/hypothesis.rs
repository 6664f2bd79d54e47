//! Hypothesis tests used to decide whether a tile is pure background.
//!
//! Both tests return a p-value. A NaN p-value means the statistic is undefined
//! (a constant sample) and never compares below a threshold, so such samples are
//! accepted.

use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};

use crate::math::Moments;

/// Fewest finite values a sample needs before the normality test is meaningful.
pub const MIN_SAMPLES: usize = 20;

/// Per-test significance thresholds derived from the overall target false-positive rate.
///
/// A tile passes through one normality test and two equal-means tests; the
/// thresholds split the target rate so the combined rejection rate stays at
/// `target_rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RejectionThresholds {
    pub normality: f64,
    pub equal_means: f64,
}

impl RejectionThresholds {
    pub fn from_rate(target_rate: f64) -> Self {
        Self {
            normality: 1.0 - (1.0 - target_rate).powf(0.5),
            equal_means: 1.0 - (1.0 - target_rate).powf(0.25),
        }
    }
}

fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

/// D'Agostino–Pearson K² omnibus test for normality.
///
/// Returns `None` when fewer than [`MIN_SAMPLES`] finite values are present.
pub fn normality_p_value(values: &[f64]) -> Option<f64> {
    let sample = finite(values);
    let n = sample.len();
    if n < MIN_SAMPLES {
        return None;
    }

    let mean = sample.iter().sum::<f64>() / n as f64;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for &v in &sample {
        let d = v - mean;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    let nf = n as f64;
    m2 /= nf;
    m3 /= nf;
    m4 /= nf;

    if m2 == 0.0 {
        return Some(f64::NAN);
    }

    let skewness = m3 / m2.powf(1.5);
    let kurtosis = m4 / (m2 * m2);
    let k2 = skew_z(skewness, nf).powi(2) + kurtosis_z(kurtosis, nf).powi(2);

    let chi2 = ChiSquared::new(2.0).ok()?;
    Some(chi2.sf(k2))
}

/// Normal-approximated z-score of the sample skewness (D'Agostino 1970).
fn skew_z(skewness: f64, n: f64) -> f64 {
    let y = skewness * ((n + 1.0) * (n + 3.0) / (6.0 * (n - 2.0))).sqrt();
    let beta2 = 3.0 * (n * n + 27.0 * n - 70.0) * (n + 1.0) * (n + 3.0)
        / ((n - 2.0) * (n + 5.0) * (n + 7.0) * (n + 9.0));
    let w2 = -1.0 + (2.0 * (beta2 - 1.0)).sqrt();
    let delta = 1.0 / (0.5 * w2.ln()).sqrt();
    let alpha = (2.0 / (w2 - 1.0)).sqrt();
    delta * (y / alpha).asinh()
}

/// Normal-approximated z-score of the sample kurtosis (Anscombe & Glynn 1983).
fn kurtosis_z(kurtosis: f64, n: f64) -> f64 {
    let expected = 3.0 * (n - 1.0) / (n + 1.0);
    let variance = 24.0 * n * (n - 2.0) * (n - 3.0)
        / ((n + 1.0) * (n + 1.0) * (n + 3.0) * (n + 5.0));
    let x = (kurtosis - expected) / variance.sqrt();

    let sqrt_beta1 = 6.0 * (n * n - 5.0 * n + 2.0) / ((n + 7.0) * (n + 9.0))
        * (6.0 * (n + 3.0) * (n + 5.0) / (n * (n - 2.0) * (n - 3.0))).sqrt();
    let a = 6.0
        + 8.0 / sqrt_beta1 * (2.0 / sqrt_beta1 + (1.0 + 4.0 / (sqrt_beta1 * sqrt_beta1)).sqrt());

    let term1 = 1.0 - 2.0 / (9.0 * a);
    let denom = 1.0 + x * (2.0 / (a - 4.0)).sqrt();
    let term2 = if denom == 0.0 {
        f64::NAN
    } else {
        denom.signum() * ((1.0 - 2.0 / a) / denom.abs()).cbrt()
    };

    (term1 - term2) / (2.0 / (9.0 * a)).sqrt()
}

/// Two-sided Student t-test for equal means, assuming equal variances.
///
/// Non-finite values are omitted. Returns `None` when either side has fewer
/// than two finite values. With zero pooled variance the p-value is NaN if
/// the means agree and 0 otherwise.
pub fn equal_means_p_value(a: &[f64], b: &[f64]) -> Option<f64> {
    let a = Moments::from_values(&finite(a));
    let b = Moments::from_values(&finite(b));
    if a.count < 2 || b.count < 2 {
        return None;
    }

    let (na, nb) = (a.count as f64, b.count as f64);
    let dof = na + nb - 2.0;
    let pooled = (a.sum_sq_dev() + b.sum_sq_dev()) / dof;
    let std_err = (pooled * (1.0 / na + 1.0 / nb)).sqrt();
    let diff = a.mean - b.mean;

    if std_err == 0.0 {
        return Some(if diff == 0.0 { f64::NAN } else { 0.0 });
    }

    let t = diff / std_err;
    let dist = StudentsT::new(0.0, 1.0, dof).ok()?;
    Some(2.0 * dist.sf(t.abs()))
}
