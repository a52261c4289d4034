//! Summary statistics over timing and throughput samples.

use serde::{Deserialize, Serialize};

/// A fixed set of descriptive statistics over a sample set.
///
/// Percentiles use linear interpolation between closest ranks: for a quantile `p` over `n`
/// sorted samples, the rank is `(n - 1) * p` and the result interpolates between the samples
/// at the floor and ceiling of that rank. This is well-defined for every `n >= 1` and yields
/// the single sample when `n == 1`.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Statistics {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation (Bessel-corrected), `0` for a single sample.
    pub stddev: f64,
    pub p95: f64,
    pub p99: f64,
    pub count: usize,
}

impl Statistics {
    /// Computes statistics over `samples`.
    ///
    /// Non-finite samples are discarded. Returns `None` if no samples remain, so callers must
    /// handle the empty case instead of trusting zeroed values.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let n = count as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let stddev = if count > 1 {
            let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            variance.sqrt()
        } else {
            0.0
        };

        Some(Self {
            // Summation can drift by an ulp outside the sample range.
            mean: mean.clamp(sorted[0], sorted[count - 1]),
            median: percentile(&sorted, 0.5),
            min: sorted[0],
            max: sorted[count - 1],
            stddev,
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            count,
        })
    }
}

/// Linear-interpolated percentile of an ascending, non-empty slice.
///
/// `p` is a fraction in `[0, 1]`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());

    let rank = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Bytes per second for a transfer of `bytes` taking `seconds`.
///
/// Returns `0` for zero or invalid durations instead of dividing by zero.
pub fn throughput(bytes: u64, seconds: f64) -> f64 {
    if seconds > 0.0 && seconds.is_finite() {
        bytes as f64 / seconds
    } else {
        0.0
    }
}
