//! Scalar statistics shared by the pipeline stages.
//!
//! All reductions here skip NaN the way masked astronomical data expects:
//! a NaN pixel carries no information and never poisons a sum.

/// FWHM to Gaussian sigma conversion factor.
///
/// For a Gaussian distribution, FWHM = 2√(2ln2) × σ ≈ 2.3548 × σ.
pub const FWHM_TO_SIGMA: f64 = 2.354_82;

/// Convert FWHM to Gaussian sigma.
#[inline]
pub fn fwhm_to_sigma(fwhm: f64) -> f64 {
    fwhm / FWHM_TO_SIGMA
}

/// Count, mean and population variance of the finite values in a stream.
///
/// Uses Welford's update so a long stream of similar values keeps full precision.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub count: usize,
    pub mean: f64,
    m2: f64,
}

impl Moments {
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a f64>) -> Self {
        let mut moments = Self::default();
        for &v in values {
            moments.push(v);
        }
        moments
    }

    #[inline]
    pub fn push(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Combine two partial accumulators (Chan et al. parallel update).
    pub fn merge(self, other: Self) -> Self {
        if self.count == 0 {
            return other;
        }
        if other.count == 0 {
            return self;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * other.count as f64 / count as f64;
        let m2 = self.m2
            + other.m2
            + delta * delta * (self.count as f64 * other.count as f64) / count as f64;
        Self { count, mean, m2 }
    }

    /// Population variance (`ddof = 0`). NaN when empty.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.m2 / self.count as f64
    }

    /// Sum of squared deviations from the mean.
    pub fn sum_sq_dev(&self) -> f64 {
        self.m2
    }
}

/// Smallest non-NaN value, or `None` if every value is NaN.
pub fn nan_min(values: &[f64]) -> Option<f64> {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .reduce(f64::min)
}

/// Median of `data` in place (partial sort via quickselect).
///
/// Even lengths average the two middle values.
pub fn median_f64_mut(data: &mut [f64]) -> f64 {
    debug_assert!(!data.is_empty());

    let len = data.len();
    let mid = len / 2;

    let (left_part, median, _) = data.select_nth_unstable_by(mid, f64::total_cmp);
    let right = *median;
    if len & 1 == 1 {
        right
    } else {
        let left = left_part
            .iter()
            .copied()
            .reduce(f64::max)
            .unwrap_or(right);
        (left + right) * 0.5
    }
}
