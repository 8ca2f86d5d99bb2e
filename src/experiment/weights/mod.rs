//! Adaptive assignment weights.
//!
//! Thompson-style allocation: each arm's weight is its Monte Carlo
//! probability of having the highest effect under the current posterior.
//!
//! - Control's effect is 0 by construction (effects are relative to it)
//! - Configured arms missing from the posterior draw from `N(0, unobserved_arm_sd²)`
//! - Control never drops below `control_floor`; other arms share the rest
//!
//! Weights are published as immutable snapshots. Readers clone the `Arc` and
//! always see a complete, normalized vector; an update builds a new snapshot
//! and swaps it in. Snapshots survive restarts through [`AssignmentWeights::save`]
//! and [`WeightUpdater::with_snapshot`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::ExperimentConfig;
use super::estimator::{PosteriorSummary, TreatmentPosterior};
use super::infra::{read_json, targets, write_json_atomic};
use crate::errors::{Error, Result};

/// Weight update settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WeightConfig {
    /// Monte Carlo draws per update
    pub n_draws: usize,
    /// Minimum control weight
    pub control_floor: f64,
    /// Prior std of an arm with no data yet (standardized units)
    pub unobserved_arm_sd: f64,
    /// Fixed RNG seed; entropy-seeded when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            n_draws: 10_000,
            control_floor: 0.1,
            unobserved_arm_sd: 1.0,
            seed: None,
        }
    }
}

impl WeightConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_draws == 0 {
            return Err(Error::config("weights.n_draws must be positive"));
        }
        if !(0.0..1.0).contains(&self.control_floor) {
            return Err(Error::config("weights.control_floor must be in [0, 1)"));
        }
        if !(self.unobserved_arm_sd.is_finite() && self.unobserved_arm_sd >= 0.0) {
            return Err(Error::config("weights.unobserved_arm_sd must be >= 0"));
        }
        Ok(())
    }
}

/// One published weight vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentWeights {
    /// Incremented on every publish; 0 is the initial uniform vector
    pub version: u64,
    pub weights: BTreeMap<String, f64>,
    /// Posterior the weights were drawn from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posterior: Option<PosteriorSummary>,
}

impl AssignmentWeights {
    pub fn get(&self, arm: &str) -> Option<f64> {
        self.weights.get(arm).copied()
    }

    /// Load a persisted snapshot; `Ok(None)` when none was saved yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        read_json(path)
    }

    /// Persist atomically (tmp file, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)?;
        debug!(
            target: targets::WEIGHTS,
            version = self.version,
            "Weights saved to {}",
            path.display()
        );
        Ok(())
    }
}

/// Owns the current weight snapshot.
#[derive(Debug)]
pub struct WeightUpdater {
    config: WeightConfig,
    control_arm: String,
    arms: Vec<String>,
    current: RwLock<Arc<AssignmentWeights>>,
}

impl WeightUpdater {
    /// Starts from uniform weights (control floor applied).
    pub fn new(config: WeightConfig, control_arm: impl Into<String>, arms: Vec<String>) -> Self {
        let control_arm = control_arm.into();
        let weights = uniform_weights(&arms, &control_arm, config.control_floor);

        Self {
            config,
            control_arm,
            arms,
            current: RwLock::new(Arc::new(AssignmentWeights {
                version: 0,
                weights,
                posterior: None,
            })),
        }
    }

    /// Resumes from a previously published snapshot.
    ///
    /// A snapshot whose arms differ from the configured arms is not reused:
    /// weights restart from uniform, keeping the version counter so later
    /// publishes still increase.
    pub fn with_snapshot(
        config: WeightConfig,
        control_arm: impl Into<String>,
        arms: Vec<String>,
        snapshot: AssignmentWeights,
    ) -> Self {
        let updater = Self::new(config, control_arm, arms);
        let same_arms = snapshot.weights.len() == updater.arms.len()
            && updater.arms.iter().all(|a| snapshot.weights.contains_key(a));

        let resumed = if same_arms {
            info!(
                target: targets::WEIGHTS,
                version = snapshot.version,
                "Resuming from saved weights"
            );
            snapshot
        } else {
            warn!(
                target: targets::WEIGHTS,
                version = snapshot.version,
                saved_arms = ?snapshot.weights.keys().collect::<Vec<_>>(),
                configured_arms = ?updater.arms,
                "Saved weights do not match configured arms, restarting from uniform"
            );
            AssignmentWeights {
                version: snapshot.version,
                weights: uniform_weights(
                    &updater.arms,
                    &updater.control_arm,
                    updater.config.control_floor,
                ),
                posterior: None,
            }
        };
        *updater.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(resumed);
        updater
    }

    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self::new(
            config.weights.clone(),
            config.control_arm.clone(),
            config.arm_labels(),
        )
    }

    /// Current snapshot.
    pub fn current(&self) -> Arc<AssignmentWeights> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Publish weights for a new posterior.
    ///
    /// Without a posterior the current snapshot is kept and returned.
    pub fn update(&self, posterior: Option<&TreatmentPosterior>) -> Arc<AssignmentWeights> {
        let Some(posterior) = posterior else {
            let current = self.current();
            debug!(
                target: targets::WEIGHTS,
                version = current.version,
                "No posterior, weights unchanged"
            );
            return current;
        };

        let next = self.current().version + 1;
        let mut rng = match self.config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(next)),
            None => SmallRng::from_entropy(),
        };
        let weights = self.compute_weights(posterior, &mut rng);

        let snapshot = {
            let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let snapshot = Arc::new(AssignmentWeights {
                version: slot.version + 1,
                weights,
                posterior: Some(posterior.summary()),
            });
            *slot = Arc::clone(&snapshot);
            snapshot
        };

        info!(
            target: targets::WEIGHTS,
            version = snapshot.version,
            weights = ?snapshot.weights,
            "Assignment weights published"
        );
        snapshot
    }

    /// Probability-of-best weights with the control floor applied.
    pub fn compute_weights<R: Rng + ?Sized>(
        &self,
        posterior: &TreatmentPosterior,
        rng: &mut R,
    ) -> BTreeMap<String, f64> {
        for arm in &posterior.arms {
            if !self.arms.contains(arm) {
                warn!(
                    target: targets::WEIGHTS,
                    arm = %arm,
                    "Posterior arm is not configured, ignoring"
                );
            }
        }

        // Per configured arm: posterior coefficient index, or None for prior draws
        let sources: Vec<Option<usize>> = self
            .arms
            .iter()
            .map(|a| {
                if *a == self.control_arm {
                    None
                } else {
                    posterior.index_of(a)
                }
            })
            .collect();
        let prior = Normal::new(0.0, self.config.unobserved_arm_sd).ok();

        let mut wins = vec![0.0; self.arms.len()];
        let mut effects = vec![0.0; self.arms.len()];
        for _ in 0..self.config.n_draws {
            let draw = posterior.distribution.sample(rng);
            for (i, arm) in self.arms.iter().enumerate() {
                effects[i] = if *arm == self.control_arm {
                    0.0
                } else {
                    match (sources[i], &prior) {
                        (Some(j), _) => draw[j],
                        (None, Some(p)) => p.sample(rng),
                        (None, None) => 0.0,
                    }
                };
            }

            let best = effects.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let ties = effects.iter().filter(|e| **e == best).count() as f64;
            for (w, e) in wins.iter_mut().zip(&effects) {
                if *e == best {
                    *w += 1.0 / ties;
                }
            }
        }

        let n = self.config.n_draws as f64;
        let mut weights: BTreeMap<String, f64> = self
            .arms
            .iter()
            .zip(wins)
            .map(|(a, w)| (a.clone(), w / n))
            .collect();
        apply_control_floor(&mut weights, &self.control_arm, self.config.control_floor);
        weights
    }
}

/// Raise control to `floor` and scale the other arms into the remainder.
fn uniform_weights(arms: &[String], control_arm: &str, floor: f64) -> BTreeMap<String, f64> {
    let uniform = 1.0 / arms.len().max(1) as f64;
    let mut weights: BTreeMap<String, f64> = arms.iter().map(|a| (a.clone(), uniform)).collect();
    apply_control_floor(&mut weights, control_arm, floor);
    weights
}

fn apply_control_floor(weights: &mut BTreeMap<String, f64>, control_arm: &str, floor: f64) {
    let control = weights.get(control_arm).copied().unwrap_or(0.0);
    if weights.contains_key(control_arm) && control < floor {
        let others: f64 = weights
            .iter()
            .filter(|(a, _)| a.as_str() != control_arm)
            .map(|(_, w)| w)
            .sum();
        for (arm, w) in weights.iter_mut() {
            if arm == control_arm {
                *w = floor;
            } else if others > 0.0 {
                *w *= (1.0 - floor) / others;
            }
        }
    }

    let total: f64 = weights.values().sum();
    if total > 0.0 {
        weights.values_mut().for_each(|w| *w /= total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::estimator::MultivariateNormal;
    use nalgebra::{DMatrix, DVector};

    fn arms() -> Vec<String> {
        ["control", "x", "y", "z"].iter().map(|s| s.to_string()).collect()
    }

    fn config() -> WeightConfig {
        WeightConfig {
            n_draws: 4_000,
            seed: Some(11),
            ..Default::default()
        }
    }

    fn posterior(arms: &[&str], mean: &[f64], var: f64) -> TreatmentPosterior {
        let k = arms.len();
        TreatmentPosterior {
            arms: arms.iter().map(|s| s.to_string()).collect(),
            distribution: MultivariateNormal::new(
                DVector::from_row_slice(mean),
                DMatrix::from_diagonal_element(k, k, var),
            )
            .unwrap(),
            n_obs: 20,
            n_clusters: 3,
            rank: k + 2,
        }
    }

    fn assert_normalized(w: &BTreeMap<String, f64>) {
        let total: f64 = w.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(w.values().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_resume_from_snapshot_continues_versions() {
        let first = WeightUpdater::new(config(), "control", arms());
        let published = first.update(Some(&posterior(&["x", "y", "z"], &[1.0, 0.0, -1.0], 0.01)));
        assert_eq!(published.version, 1);

        let resumed =
            WeightUpdater::with_snapshot(config(), "control", arms(), published.as_ref().clone());
        assert_eq!(*resumed.current(), *published);

        // No posterior: the resumed weights stay in force
        assert_eq!(resumed.update(None).version, 1);
        let next = resumed.update(Some(&posterior(&["x"], &[0.5], 0.01)));
        assert_eq!(next.version, 2);
    }

    #[test]
    fn test_snapshot_with_other_arms_restarts_uniform() {
        let mut weights = BTreeMap::new();
        weights.insert("control".to_string(), 0.2);
        weights.insert("old".to_string(), 0.8);
        let stale = AssignmentWeights {
            version: 7,
            weights,
            posterior: None,
        };

        let updater = WeightUpdater::with_snapshot(config(), "control", arms(), stale);
        let current = updater.current();
        assert_eq!(current.version, 7);
        assert_eq!(current.weights.len(), 4);
        assert!(current.get("old").is_none());
        assert_eq!(current.get("x"), Some(0.25));
        assert_normalized(&current.weights);
    }

    #[test]
    fn test_save_and_load_snapshot() {
        let dir = std::env::temp_dir().join(format!(
            "forecast_ax_weights_test_{}",
            std::process::id()
        ));
        let path = dir.join("weights.json");
        assert!(AssignmentWeights::load(&path).unwrap().is_none());

        let updater = WeightUpdater::new(config(), "control", arms());
        let published = updater.update(Some(&posterior(&["x"], &[1.0], 0.04)));
        published.save(&path).unwrap();

        let loaded = AssignmentWeights::load(&path).unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        for (arm, w) in &published.weights {
            assert!((loaded.get(arm).unwrap() - w).abs() < 1e-12);
        }
        assert_eq!(loaded.posterior.as_ref().unwrap().arms, vec!["x"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_initial_weights_uniform() {
        let updater = WeightUpdater::new(config(), "control", arms());
        let w = updater.current();
        assert_eq!(w.version, 0);
        assert_normalized(&w.weights);
        assert!((w.get("x").unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_dominant_arm_takes_most_weight() {
        let updater = WeightUpdater::new(config(), "control", arms());
        let post = posterior(&["x", "y", "z"], &[3.0, -1.0, -1.0], 0.01);
        let w = updater.update(Some(&post));

        assert_eq!(w.version, 1);
        assert_normalized(&w.weights);
        assert!(w.get("x").unwrap() > 0.85);
        assert!((w.get("control").unwrap() - 0.1).abs() < 1e-9);
        assert!(w.get("y").unwrap() < 0.01);
    }

    #[test]
    fn test_control_floor_holds() {
        let cfg = WeightConfig {
            control_floor: 0.3,
            ..config()
        };
        let updater = WeightUpdater::new(cfg, "control", arms());
        let post = posterior(&["x", "y", "z"], &[5.0, 5.0, 5.0], 0.1);
        let w = updater.update(Some(&post));
        assert!(w.get("control").unwrap() >= 0.3 - 1e-12);
        assert_normalized(&w.weights);
    }

    #[test]
    fn test_bad_treatments_favor_control() {
        let updater = WeightUpdater::new(config(), "control", arms());
        let post = posterior(&["x", "y", "z"], &[-3.0, -3.0, -3.0], 0.01);
        let w = updater.update(Some(&post));
        assert!(w.get("control").unwrap() > 0.99);
    }

    #[test]
    fn test_unobserved_arms_keep_exploring() {
        let updater = WeightUpdater::new(config(), "control", arms());
        // Only x has data, and it is slightly worse than control
        let post = posterior(&["x"], &[-0.5], 0.01);
        let w = updater.update(Some(&post));
        assert!(w.get("y").unwrap() > 0.2);
        assert!(w.get("z").unwrap() > 0.2);
        assert!(w.get("x").unwrap() < 0.05);
    }

    #[test]
    fn test_zero_prior_sd_ties_split() {
        let cfg = WeightConfig {
            unobserved_arm_sd: 0.0,
            control_floor: 0.0,
            ..config()
        };
        let updater = WeightUpdater::new(cfg, "control", arms());
        let post = posterior(&["x"], &[-1.0], 0.0);
        let w = updater.update(Some(&post));
        // control, y and z all sit at 0 on every draw
        for arm in ["control", "y", "z"] {
            assert!((w.get(arm).unwrap() - 1.0 / 3.0).abs() < 1e-9);
        }
        assert_eq!(w.get("x"), Some(0.0));
    }

    #[test]
    fn test_no_posterior_keeps_snapshot() {
        let updater = WeightUpdater::new(config(), "control", arms());
        let post = posterior(&["x", "y", "z"], &[1.0, 0.0, 0.0], 0.5);
        let first = updater.update(Some(&post));
        let again = updater.update(None);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(updater.current().version, 1);
    }

    #[test]
    fn test_seeded_updates_reproducible() {
        let post = posterior(&["x", "y", "z"], &[0.2, 0.1, 0.0], 0.5);
        let a = WeightUpdater::new(config(), "control", arms()).update(Some(&post));
        let b = WeightUpdater::new(config(), "control", arms()).update(Some(&post));
        assert_eq!(a.weights, b.weights);
    }

    #[test]
    fn test_config_validation() {
        assert!(WeightConfig::default().validate().is_ok());
        let bad = WeightConfig {
            control_floor: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = WeightConfig {
            n_draws: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_floor_applied_to_many_arms() {
        let many: Vec<String> = (0..20).map(|i| format!("arm{i}")).collect();
        let mut all = vec!["control".to_string()];
        all.extend(many);
        let updater = WeightUpdater::new(config(), "control", all);
        let w = updater.current();
        assert!((w.get("control").unwrap() - 0.1).abs() < 1e-12);
        assert_normalized(&w.weights);
    }
}
