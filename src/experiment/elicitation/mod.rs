//! Elicited-distribution builder.
//!
//! Turns a participant's quantile answers into a continuous distribution
//! exposing CDF, PDF and inverse CDF. Which construction is used depends on
//! the participant's treatment arm, expressed as an [`ElicitationStrategy`].

mod piecewise;

pub use piecewise::PiecewiseElicitation;

use serde::{Deserialize, Serialize};

use crate::consts::CANONICAL_PROBABILITIES;
use crate::errors::Result;

/// One elicited answer: the participant believes `P(X <= value) = probability`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantilePair {
    pub probability: f64,
    pub value: f64,
}

impl QuantilePair {
    pub fn new(probability: f64, value: f64) -> Self {
        Self { probability, value }
    }

    /// Pair values with [`CANONICAL_PROBABILITIES`] in order.
    ///
    /// Extra values beyond the canonical probabilities are ignored.
    pub fn canonical(values: &[f64]) -> Vec<QuantilePair> {
        CANONICAL_PROBABILITIES
            .iter()
            .zip(values)
            .map(|(&p, &v)| QuantilePair::new(p, v))
            .collect()
    }
}

/// Continuous forecast distribution queried by the scorer.
pub trait ForecastDistribution {
    /// Cumulative probability `P(X <= x)`, in [0, 1].
    fn cdf(&self, x: f64) -> f64;

    /// Density at `x`, non-negative.
    fn pdf(&self, x: f64) -> f64;

    /// Left inverse of the CDF on the support.
    fn quantile(&self, p: f64) -> Result<f64>;

    /// Lowest and highest value carrying probability.
    fn support(&self) -> (f64, f64);
}

/// How an arm's elicitation answers become a distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElicitationStrategy {
    /// Piecewise-linear CDF through the elicited quantiles
    #[default]
    Nonparametric,
}

impl ElicitationStrategy {
    /// Build the distribution for one forecast.
    pub fn build(&self, pairs: &[QuantilePair]) -> Result<ElicitedDistribution> {
        match self {
            ElicitationStrategy::Nonparametric => {
                PiecewiseElicitation::new(pairs).map(ElicitedDistribution::Nonparametric)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ElicitationStrategy::Nonparametric => "nonparametric",
        }
    }
}

/// Distribution produced by an [`ElicitationStrategy`].
#[derive(Debug, Clone, PartialEq)]
pub enum ElicitedDistribution {
    Nonparametric(PiecewiseElicitation),
}

impl ForecastDistribution for ElicitedDistribution {
    fn cdf(&self, x: f64) -> f64 {
        match self {
            ElicitedDistribution::Nonparametric(d) => d.cdf(x),
        }
    }

    fn pdf(&self, x: f64) -> f64 {
        match self {
            ElicitedDistribution::Nonparametric(d) => d.pdf(x),
        }
    }

    fn quantile(&self, p: f64) -> Result<f64> {
        match self {
            ElicitedDistribution::Nonparametric(d) => d.quantile(p),
        }
    }

    fn support(&self) -> (f64, f64) {
        match self {
            ElicitedDistribution::Nonparametric(d) => d.support(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_pairs() {
        let pairs = QuantilePair::canonical(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(pairs.len(), 5);
        assert_eq!(pairs[0], QuantilePair::new(0.0, 1.0));
        assert_eq!(pairs[4], QuantilePair::new(1.0, 5.0));
    }

    #[test]
    fn test_strategy_builds_nonparametric() {
        let pairs = QuantilePair::canonical(&[0.0, 1.0, 2.0, 3.0, 4.0]);
        let dist = ElicitationStrategy::Nonparametric.build(&pairs).unwrap();
        assert_eq!(dist.support(), (0.0, 4.0));
        assert!((dist.cdf(2.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_strategy_serde() {
        let json = serde_json::to_string(&ElicitationStrategy::Nonparametric).unwrap();
        assert_eq!(json, "\"nonparametric\"");
    }
}
