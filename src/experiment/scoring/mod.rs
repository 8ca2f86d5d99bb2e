//! Forecast scoring with the continuous ranked probability score.
//!
//! Scores are the *negative* CRPS, so higher (closer to 0) is better:
//!
//! ```text
//! score = -∫ (F(x) - 1{x > y})² dx
//! ```
//!
//! The integral is approximated on an evenly spaced grid between the
//! forecast's lower and upper percentiles (1st and 99th by default) with the
//! Riemann step implied by the grid spacing.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::elicitation::{ElicitationStrategy, ForecastDistribution, QuantilePair};
use super::infra::targets;
use crate::consts::CRPS_GRID_POINTS;
use crate::errors::{Error, Result};

/// Configuration for the CRPS grid.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Number of grid points (default: 50)
    pub grid_points: usize,
    /// Lower percentile bounding the grid (default: 0.01)
    pub lower_percentile: f64,
    /// Upper percentile bounding the grid (default: 0.99)
    pub upper_percentile: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            grid_points: CRPS_GRID_POINTS,
            lower_percentile: 0.01,
            upper_percentile: 0.99,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        if self.grid_points < 2 {
            return Err(Error::config(format!(
                "scoring.grid_points must be >= 2, got {}",
                self.grid_points
            )));
        }
        let in_unit = |p: f64| p > 0.0 && p < 1.0;
        if !in_unit(self.lower_percentile)
            || !in_unit(self.upper_percentile)
            || self.lower_percentile >= self.upper_percentile
        {
            return Err(Error::config(format!(
                "scoring percentiles must satisfy 0 < lower < upper < 1, got {} and {}",
                self.lower_percentile, self.upper_percentile
            )));
        }
        Ok(())
    }
}

/// Negative-CRPS scorer.
#[derive(Debug, Clone, Default)]
pub struct CrpsScorer {
    config: ScoringConfig,
}

impl CrpsScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a distribution against a realized outcome.
    ///
    /// Returns `None` when the forecast cannot be scored: non-finite outcome,
    /// percentile lookup failure, a grid of fewer than two points, or a
    /// non-finite result.
    pub fn score<D: ForecastDistribution + ?Sized>(&self, dist: &D, outcome: f64) -> Option<f64> {
        if !outcome.is_finite() {
            return None;
        }

        let lo = dist.quantile(self.config.lower_percentile).ok()?;
        let hi = dist.quantile(self.config.upper_percentile).ok()?;
        if !lo.is_finite() || !hi.is_finite() || hi < lo {
            return None;
        }

        let span = hi - lo;
        if span <= 0.0 {
            // Point forecast: exact CRPS of a point mass
            return Some(-(lo - outcome).abs() + 0.0);
        }

        let n = self.config.grid_points;
        if n < 2 {
            return None;
        }
        let step = span / (n - 1) as f64;
        let sum_sq: f64 = (0..n)
            .map(|i| {
                let x = if i == n - 1 { hi } else { lo + step * i as f64 };
                let indicator = if x > outcome { 1.0 } else { 0.0 };
                (dist.cdf(x) - indicator).powi(2)
            })
            .sum();

        let score = -sum_sq * step;
        score.is_finite().then_some(score)
    }

    /// Build the arm's distribution and score it.
    ///
    /// Malformed elicitations are absorbed as "no score".
    pub fn score_elicitation(
        &self,
        strategy: ElicitationStrategy,
        pairs: &[QuantilePair],
        outcome: f64,
    ) -> Option<f64> {
        match strategy.build(pairs) {
            Ok(dist) => self.score(&dist, outcome),
            Err(e) => {
                debug!(
                    target: targets::SCORING,
                    strategy = strategy.name(),
                    error = %e,
                    "Forecast not scoreable"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::elicitation::PiecewiseElicitation;

    fn dist(values: [f64; 5]) -> PiecewiseElicitation {
        PiecewiseElicitation::new(&QuantilePair::canonical(&values)).unwrap()
    }

    #[test]
    fn test_scores_are_non_positive() {
        let scorer = CrpsScorer::default();
        let d = dist([50.0, 80.0, 100.0, 120.0, 150.0]);
        for outcome in [0.0, 60.0, 100.0, 140.0, 500.0] {
            let s = scorer.score(&d, outcome).unwrap();
            assert!(s <= 0.0, "score {s} for outcome {outcome}");
        }
    }

    #[test]
    fn test_perfect_point_forecast_is_maximal() {
        let scorer = CrpsScorer::default();
        let point = dist([100.0; 5]);
        let perfect = scorer.score(&point, 100.0).unwrap();
        assert_eq!(perfect, 0.0);

        for values in [
            [99.0, 99.5, 100.0, 100.5, 101.0],
            [90.0, 95.0, 100.0, 105.0, 110.0],
            [50.0, 80.0, 100.0, 120.0, 150.0],
        ] {
            let s = scorer.score(&dist(values), 100.0).unwrap();
            assert!(s < perfect, "{values:?} scored {s}, not below {perfect}");
        }
    }

    #[test]
    fn test_wrong_point_forecast_penalized_by_distance() {
        let scorer = CrpsScorer::default();
        let s = scorer.score(&dist([90.0; 5]), 100.0).unwrap();
        assert!((s + 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_sharper_correct_forecast_scores_higher() {
        let scorer = CrpsScorer::default();
        let tight = scorer
            .score(&dist([98.0, 99.5, 100.0, 100.5, 102.0]), 100.0)
            .unwrap();
        let wide = scorer
            .score(&dist([20.0, 70.0, 100.0, 130.0, 180.0]), 100.0)
            .unwrap();
        assert!(tight > wide, "tight {tight} should beat wide {wide}");
        assert!(tight > -1.0);
        assert!(wide < -5.0);
    }

    #[test]
    fn test_non_finite_outcome_unscoreable() {
        let scorer = CrpsScorer::default();
        assert!(scorer
            .score(&dist([1.0, 2.0, 3.0, 4.0, 5.0]), f64::NAN)
            .is_none());
    }

    #[test]
    fn test_malformed_elicitation_unscoreable() {
        let scorer = CrpsScorer::default();
        let pairs = QuantilePair::canonical(&[10.0, 5.0, 20.0, 30.0, 40.0]);
        assert!(scorer
            .score_elicitation(ElicitationStrategy::Nonparametric, &pairs, 12.0)
            .is_none());
    }

    #[test]
    fn test_degenerate_grid_unscoreable() {
        let d = dist([50.0, 80.0, 100.0, 120.0, 150.0]);
        for grid_points in [0, 1] {
            let scorer = CrpsScorer::new(ScoringConfig {
                grid_points,
                ..Default::default()
            });
            assert!(scorer.score(&d, 100.0).is_none());
        }
        let two = CrpsScorer::new(ScoringConfig {
            grid_points: 2,
            ..Default::default()
        });
        assert!(two.score(&d, 100.0).is_some_and(|s| s <= 0.0));
    }

    #[test]
    fn test_config_validation() {
        assert!(ScoringConfig::default().validate().is_ok());
        let bad = ScoringConfig {
            grid_points: 1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let inverted = ScoringConfig {
            lower_percentile: 0.9,
            upper_percentile: 0.1,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }
}
