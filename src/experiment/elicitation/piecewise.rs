//! Maximum-entropy distribution from nonparametric quantile elicitation.
//!
//! Participants report values `v_i` such that `P(X <= v_i) = p_i`. The
//! distribution that matches those points with the least extra structure has
//! a piecewise-linear CDF between knots:
//!
//! ```text
//!   cdf(x) = p_i + d_i × (x - v_i)      for v_i <= x < v_{i+1}
//!   d_i    = (p_{i+1} - p_i) / (v_{i+1} - v_i)
//! ```
//!
//! Below the lowest and above the highest value the density is zero. A
//! zero-width segment (`v_i == v_{i+1}`) carries no density; its probability
//! step shows up as a jump in the CDF at that value.

use serde::{Deserialize, Serialize};

use super::{ForecastDistribution, QuantilePair};
use crate::errors::{Error, Result};

/// Piecewise-linear CDF through the elicited (probability, value) knots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiecewiseElicitation {
    /// Knot values, weakly increasing
    values: Vec<f64>,
    /// Cumulative probability at each knot
    probs: Vec<f64>,
    /// Density on `[values[i], values[i + 1])`
    densities: Vec<f64>,
}

impl PiecewiseElicitation {
    /// Build from elicited pairs in any order.
    ///
    /// # Errors
    /// - `InvalidProbability` if a probability is outside [0, 1] or non-finite
    /// - `MalformedElicitation` if there are no pairs, a value is non-finite,
    ///   or values decrease once pairs are sorted by probability
    pub fn new(pairs: &[QuantilePair]) -> Result<Self> {
        let raw_values: Vec<f64> = pairs.iter().map(|p| p.value).collect();
        if pairs.is_empty() || raw_values.iter().any(|v| !v.is_finite()) {
            return Err(Error::MalformedElicitation { values: raw_values });
        }
        if let Some(bad) = pairs
            .iter()
            .map(|p| p.probability)
            .find(|p| !p.is_finite() || !(0.0..=1.0).contains(p))
        {
            return Err(Error::InvalidProbability(bad));
        }

        let mut sorted = pairs.to_vec();
        sorted.sort_by(|a, b| a.probability.total_cmp(&b.probability));

        let values: Vec<f64> = sorted.iter().map(|p| p.value).collect();
        let probs: Vec<f64> = sorted.iter().map(|p| p.probability).collect();

        if values.windows(2).any(|w| w[1] < w[0]) {
            return Err(Error::MalformedElicitation { values: raw_values });
        }

        let densities = values
            .windows(2)
            .zip(probs.windows(2))
            .map(|(v, p)| {
                let width = v[1] - v[0];
                if width > 0.0 {
                    (p[1] - p[0]) / width
                } else {
                    0.0
                }
            })
            .collect();

        Ok(Self {
            values,
            probs,
            densities,
        })
    }

    /// Knot values in increasing order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Cumulative probabilities at the knots.
    pub fn probabilities(&self) -> &[f64] {
        &self.probs
    }

    /// Number of knots at or below `x`.
    fn knots_at_or_below(&self, x: f64) -> usize {
        self.values.partition_point(|&v| v <= x)
    }
}

impl ForecastDistribution for PiecewiseElicitation {
    fn cdf(&self, x: f64) -> f64 {
        let n = self.values.len();
        match self.knots_at_or_below(x) {
            0 => 0.0,
            k if k == n => self.probs[n - 1].clamp(0.0, 1.0),
            k => {
                let i = k - 1;
                let cdf = self.probs[i] + self.densities[i] * (x - self.values[i]);
                cdf.clamp(0.0, 1.0)
            }
        }
    }

    fn pdf(&self, x: f64) -> f64 {
        let n = self.values.len();
        match self.knots_at_or_below(x) {
            0 => 0.0,
            k if k == n => 0.0,
            k => self.densities[k - 1],
        }
    }

    fn quantile(&self, p: f64) -> Result<f64> {
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(Error::InvalidProbability(p));
        }

        let n = self.values.len();
        let upper = self.probs.partition_point(|&q| q < p);
        if upper == 0 {
            return Ok(self.values[0]);
        }
        if upper == n {
            return Ok(self.values[n - 1]);
        }

        let lower = upper - 1;
        let (v0, v1) = (self.values[lower], self.values[upper]);
        let (p0, p1) = (self.probs[lower], self.probs[upper]);
        if v1 <= v0 {
            return Ok(v1);
        }
        // p0 < p <= p1 here, so the segment has positive probability
        Ok(v0 + (p - p0) * (v1 - v0) / (p1 - p0))
    }

    fn support(&self) -> (f64, f64) {
        (self.values[0], self.values[self.values.len() - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::CANONICAL_PROBABILITIES;

    fn canonical(values: [f64; 5]) -> PiecewiseElicitation {
        PiecewiseElicitation::new(&QuantilePair::canonical(&values)).unwrap()
    }

    #[test]
    fn test_cdf_inverts_quantile_at_canonical_probabilities() {
        let dist = canonical([80.0, 95.0, 100.0, 104.0, 130.0]);
        for &p in &CANONICAL_PROBABILITIES {
            let x = dist.quantile(p).unwrap();
            assert!(
                (dist.cdf(x) - p).abs() < 1e-12,
                "cdf(quantile({p})) = {}",
                dist.cdf(x)
            );
        }
    }

    #[test]
    fn test_quantile_hits_knots() {
        let dist = canonical([80.0, 95.0, 100.0, 104.0, 130.0]);
        assert_eq!(dist.quantile(0.0).unwrap(), 80.0);
        assert_eq!(dist.quantile(0.5).unwrap(), 100.0);
        assert_eq!(dist.quantile(1.0).unwrap(), 130.0);
        // Halfway through the second segment
        assert!((dist.quantile(0.375).unwrap() - 97.5).abs() < 1e-12);
    }

    #[test]
    fn test_cdf_monotone_and_bounded() {
        let dist = canonical([-5.0, 0.0, 0.0, 3.0, 50.0]);
        let mut prev = 0.0;
        for i in -200..=1200 {
            let x = i as f64 * 0.05 - 2.0;
            let c = dist.cdf(x);
            assert!((0.0..=1.0).contains(&c), "cdf({x}) = {c}");
            assert!(c >= prev - 1e-15, "cdf decreased at {x}: {prev} -> {c}");
            assert!(dist.pdf(x) >= 0.0);
            prev = c;
        }
    }

    #[test]
    fn test_zero_density_outside_support() {
        let dist = canonical([10.0, 20.0, 30.0, 40.0, 50.0]);
        assert_eq!(dist.pdf(9.9), 0.0);
        assert_eq!(dist.pdf(50.1), 0.0);
        assert_eq!(dist.cdf(5.0), 0.0);
        assert_eq!(dist.cdf(55.0), 1.0);
        assert!((dist.pdf(15.0) - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_decreasing_values_rejected() {
        let pairs = [
            QuantilePair::new(0.0, 10.0),
            QuantilePair::new(0.5, 5.0),
        ];
        let err = PiecewiseElicitation::new(&pairs).unwrap_err();
        assert!(matches!(err, Error::MalformedElicitation { .. }));
    }

    #[test]
    fn test_unsorted_pairs_are_sorted_by_probability() {
        let pairs = [
            QuantilePair::new(1.0, 40.0),
            QuantilePair::new(0.0, 0.0),
            QuantilePair::new(0.5, 20.0),
        ];
        let dist = PiecewiseElicitation::new(&pairs).unwrap();
        assert_eq!(dist.values(), &[0.0, 20.0, 40.0]);
        assert!((dist.cdf(10.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_point_mass_is_a_cdf_jump() {
        let dist = canonical([90.0, 100.0, 100.0, 100.0, 110.0]);
        assert!((dist.cdf(99.999) - 0.25).abs() < 1e-3);
        assert!((dist.cdf(100.0) - 0.75).abs() < 1e-12);
        assert_eq!(dist.quantile(0.5).unwrap(), 100.0);
        assert_eq!(dist.pdf(100.0), 0.025);
    }

    #[test]
    fn test_invalid_probability() {
        let dist = canonical([1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(matches!(
            dist.quantile(1.5),
            Err(Error::InvalidProbability(_))
        ));
        assert!(PiecewiseElicitation::new(&[QuantilePair::new(-0.1, 1.0)]).is_err());
    }
}
