//! Per-worker random number generation.
//!
//! Every worker owns its own [`Rand`]. Sharing a single RNG behind a lock
//! would serialize every event across all workers, so a global RNG is never
//! used anywhere in the framework.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// A small, fast RNG seeded from OS entropy, with the sampling primitives the
/// data generators need layered on top.
pub struct Rand {
    rng: SmallRng,
}

impl Rand {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    /// A uniform float in `[0, 1)`.
    pub fn f64(&mut self) -> f64 {
        self.rng.gen()
    }

    /// A uniform integer in `[min, max)`.
    pub fn uniform_int(&mut self, min: i64, max: i64) -> i64 {
        self.rng.gen_range(min..max)
    }

    /// A uniform float in `[min, max)`.
    pub fn uniform_float(&mut self, min: f64, max: f64) -> f64 {
        self.rng.gen::<f64>() * (max - min) + min
    }

    pub fn normal_float(&mut self, mean: f64, stddev: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        z * stddev + mean
    }

    pub fn normal_int(&mut self, mean: i64, stddev: i64) -> i64 {
        self.normal_float(mean as f64, stddev as f64) as i64
    }

    /// A uniform index in `[0, n)`.
    pub fn usize_below(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    /// Sample a float from `hist` via inverse transform sampling.
    pub fn hist_float(&mut self, hist: &HistogramDistribution) -> f64 {
        hist.inverse_cdf(self.f64())
    }

    /// Sample an integer from `hist` by rounding the sampled float. To
    /// generate the integers 1 and 2, use the bin endpoints 0.5, 1.5, 2.5.
    pub fn hist_int(&mut self, hist: &HistogramDistribution) -> i64 {
        self.hist_float(hist).round() as i64
    }
}

impl Default for Rand {
    fn default() -> Self {
        Self::new()
    }
}

/// A discrete probability distribution represented as a histogram, sampled
/// via the inverse transform sampling algorithm
/// (<https://en.wikipedia.org/wiki/Inverse_transform_sampling>):
///
/// 1. Normalize the frequency values of the histogram to sum to 1.
/// 2. Compute the cumulative distribution of the normalized histogram, giving
///    `cdf(bin_value) -> [0, 1]`.
/// 3. Draw `x` uniformly in `[0, 1)` and compute `cdf^-1(x)` via linear
///    interpolation between the CDF points.
#[derive(Clone, Debug)]
pub struct HistogramDistribution {
    bins_end_points: Vec<f64>,
    cumulative_distribution: Vec<f64>,
}

impl HistogramDistribution {
    /// Creates a histogram distribution. `frequency[i]` corresponds to the
    /// bin `[bins_end_points[i], bins_end_points[i + 1])`, so
    /// `bins_end_points.len() == frequency.len() + 1` and the endpoints must
    /// be sorted. Violating either is a programmer error and panics.
    pub fn new(bins_end_points: Vec<f64>, frequency: &[f64]) -> Self {
        if bins_end_points.len() != frequency.len() + 1 {
            panic!(
                "histogram bins must have one more endpoint than frequencies ({} endpoints, {} frequencies)",
                bins_end_points.len(),
                frequency.len()
            );
        }

        if bins_end_points.windows(2).any(|w| w[0] > w[1]) {
            panic!("histogram bin endpoints are not sorted");
        }

        let total: f64 = frequency.iter().sum();

        let mut cumulative_distribution = Vec::with_capacity(bins_end_points.len());
        cumulative_distribution.push(0.0);
        for (i, v) in frequency.iter().enumerate() {
            cumulative_distribution.push(cumulative_distribution[i] + v / total);
        }

        Self {
            bins_end_points,
            cumulative_distribution,
        }
    }

    fn inverse_cdf(&self, x: f64) -> f64 {
        interp1d(&self.cumulative_distribution, &self.bins_end_points, x)
    }

    #[cfg(test)]
    pub(crate) fn cumulative_distribution(&self) -> &[f64] {
        &self.cumulative_distribution
    }
}

/// Linear interpolation of `x` against the sorted support points `xs`,
/// returning the corresponding interpolated value from `ys`. `xs` and `ys`
/// must be the same length. An `x` outside `[xs[0], xs[last]]` would require
/// extrapolation, which is unreachable for a well-formed CDF, so it panics.
fn interp1d(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    // Index of the first element >= x, so the interpolation range is between
    // i - 1 and i.
    let i = xs.partition_point(|&v| v < x);

    if i == 0 {
        if !xs.is_empty() && x == xs[0] {
            return ys[0];
        }
        panic!("interpolation input {x} is out of range at the beginning");
    }

    if i >= xs.len() {
        panic!("interpolation input {x} is out of range at the end");
    }

    let (x0, x1) = (xs[i - 1], xs[i]);
    let (y0, y1) = (ys[i - 1], ys[i]);

    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}
