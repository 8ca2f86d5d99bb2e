//! Treatment-effect estimation.
//!
//! Fits
//!
//! ```text
//! z ~ Σ_a β_a · 1[arm = a] + Σ_c α_c · 1[cell = c]
//! ```
//!
//! over the standardized working dataset, where `a` ranges over the
//! non-control arms present in the data and `c` over (date, question) cells.
//! There is no global intercept: the cell effects saturate it. Covariance is
//! clustered by date, and the arm block `(β, V_ββ)` becomes the posterior.

mod ols;
mod posterior;

pub use posterior::MultivariateNormal;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::dataset::WorkingDataset;
use super::infra::targets;

use crate::errors::Result;

/// Joint posterior over non-control arm effects, relative to control.
#[derive(Debug, Clone)]
pub struct TreatmentPosterior {
    /// Arm labels in coefficient order
    pub arms: Vec<String>,
    pub distribution: MultivariateNormal,
    pub n_obs: usize,
    pub n_clusters: usize,
    pub rank: usize,
}

impl TreatmentPosterior {
    /// Index of an arm's coefficient.
    pub fn index_of(&self, arm: &str) -> Option<usize> {
        self.arms.iter().position(|a| a == arm)
    }

    pub fn summary(&self) -> PosteriorSummary {
        PosteriorSummary {
            arms: self.arms.clone(),
            mean: self.distribution.mean().iter().copied().collect(),
            std: self.distribution.std_devs(),
            singular: self.distribution.is_singular(),
            n_obs: self.n_obs,
            n_clusters: self.n_clusters,
        }
    }
}

/// Serializable digest of a [`TreatmentPosterior`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSummary {
    pub arms: Vec<String>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub singular: bool,
    pub n_obs: usize,
    pub n_clusters: usize,
}

/// Fixed-effects treatment estimator.
#[derive(Debug, Clone)]
pub struct TreatmentEffectEstimator {
    control_arm: String,
}

impl TreatmentEffectEstimator {
    pub fn new(control_arm: impl Into<String>) -> Self {
        Self {
            control_arm: control_arm.into(),
        }
    }

    /// Fit the model.
    ///
    /// Returns `Ok(None)` when there is nothing to fit: the dataset is empty,
    /// was not standardized, or holds no non-control arm.
    pub fn estimate(&self, dataset: &WorkingDataset) -> Result<Option<TreatmentPosterior>> {
        if !dataset.is_standardized() || dataset.is_empty() {
            debug!(
                target: targets::ESTIMATOR,
                status = dataset.status.label(),
                rows = dataset.len(),
                "Dataset not fit for estimation"
            );
            return Ok(None);
        }

        let arm_index = index_labels(
            dataset
                .rows
                .iter()
                .filter(|r| r.arm != self.control_arm)
                .map(|r| r.arm.clone()),
        );
        if arm_index.is_empty() {
            debug!(target: targets::ESTIMATOR, "Only control rows, no treatment effect to fit");
            return Ok(None);
        }
        let cell_index = index_labels(dataset.rows.iter().map(|r| r.cell()));
        let date_index = index_labels::<NaiveDate>(dataset.rows.iter().map(|r| r.date));

        let n = dataset.len();
        let n_arms = arm_index.len();
        let mut x = DMatrix::<f64>::zeros(n, n_arms + cell_index.len());
        let mut y = DVector::<f64>::zeros(n);
        let mut clusters = Vec::with_capacity(n);

        for (i, row) in dataset.rows.iter().enumerate() {
            if let Some(&a) = arm_index.get(&row.arm) {
                x[(i, a)] = 1.0;
            }
            x[(i, n_arms + cell_index[&row.cell()])] = 1.0;
            y[i] = row.target();
            clusters.push(date_index[&row.date]);
        }

        let fit = ols::fit_clustered(&x, &y, &clusters)?;

        let mean = fit.beta.rows(0, n_arms).into_owned();
        let covariance = fit.covariance.view((0, 0), (n_arms, n_arms)).into_owned();
        let distribution = MultivariateNormal::new(mean, covariance)?;

        let mut arms = vec![String::new(); n_arms];
        for (arm, &i) in &arm_index {
            arms[i] = arm.clone();
        }

        info!(
            target: targets::ESTIMATOR,
            n_obs = fit.n_obs,
            n_clusters = fit.n_clusters,
            rank = fit.rank,
            n_cells = cell_index.len(),
            arms = ?arms,
            effects = ?distribution.mean().as_slice(),
            singular = distribution.is_singular(),
            "Treatment effects fitted"
        );

        Ok(Some(TreatmentPosterior {
            arms,
            distribution,
            n_obs: fit.n_obs,
            n_clusters: fit.n_clusters,
            rank: fit.rank,
        }))
    }
}

/// Sorted distinct labels → dense column index.
fn index_labels<K: Ord>(labels: impl Iterator<Item = K>) -> BTreeMap<K, usize> {
    let mut index: BTreeMap<K, usize> = labels.map(|k| (k, 0)).collect();
    for (i, v) in index.values_mut().enumerate() {
        *v = i;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::dataset::{DatasetStatus, WorkingRow};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn row(day: u32, question: &str, arm: &str, z: f64) -> WorkingRow {
        let mut r = WorkingRow::new(d(day), question, arm, z);
        r.standardized = Some(z);
        r
    }

    fn standardized(rows: Vec<WorkingRow>) -> WorkingDataset {
        WorkingDataset {
            rows,
            status: DatasetStatus::Standardized {
                dropped: 0,
                excluded: Vec::new(),
            },
        }
    }

    #[test]
    fn test_unstandardized_dataset_not_fitted() {
        let ds = WorkingDataset {
            rows: vec![row(1, "crude", "control", 0.0), row(1, "crude", "x", 1.0)],
            status: DatasetStatus::Unstandardized {
                reason: crate::errors::ControlShortfall::ZeroVariance {
                    date: "2024-03-01".into(),
                    question: "crude".into(),
                },
                dropped: 0,
            },
        };
        let est = TreatmentEffectEstimator::new("control");
        assert!(est.estimate(&ds).unwrap().is_none());
    }

    #[test]
    fn test_control_only_not_fitted() {
        let ds = standardized(vec![
            row(1, "crude", "control", -0.7),
            row(1, "crude", "control", 0.7),
        ]);
        assert!(TreatmentEffectEstimator::new("control")
            .estimate(&ds)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_arm_effect_net_of_cell_effects() {
        // Cell baselines differ (0 on day 1, 5 on day 2); x is +1 in both
        let ds = standardized(vec![
            row(1, "crude", "control", -0.5),
            row(1, "crude", "control", 0.5),
            row(1, "crude", "x", 1.2),
            row(1, "crude", "x", 0.8),
            row(2, "crude", "control", 4.5),
            row(2, "crude", "control", 5.5),
            row(2, "crude", "x", 6.1),
            row(2, "crude", "x", 5.9),
            row(3, "crude", "control", -1.0),
            row(3, "crude", "control", 1.0),
            row(3, "crude", "x", 1.0),
        ]);
        let post = TreatmentEffectEstimator::new("control")
            .estimate(&ds)
            .unwrap()
            .unwrap();
        assert_eq!(post.arms, vec!["x"]);
        assert_eq!(post.n_clusters, 3);
        assert_eq!(post.n_obs, 11);
        assert_eq!(post.rank, 4);
        assert!((post.distribution.mean()[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_arms_sorted_and_indexed() {
        let ds = standardized(vec![
            row(1, "crude", "control", -1.0),
            row(1, "crude", "control", 1.0),
            row(1, "crude", "z", 2.0),
            row(1, "crude", "y", -2.0),
            row(1, "s_and_p", "control", -1.0),
            row(1, "s_and_p", "control", 1.0),
            row(1, "s_and_p", "z", 1.0),
            row(1, "s_and_p", "y", -1.0),
        ]);
        let post = TreatmentEffectEstimator::new("control")
            .estimate(&ds)
            .unwrap()
            .unwrap();
        assert_eq!(post.arms, vec!["y", "z"]);
        assert_eq!(post.index_of("z"), Some(1));
        assert_eq!(post.distribution.dim(), 2);

        let summary = post.summary();
        assert!((summary.mean[0] + 1.5).abs() < 1e-9);
        assert!((summary.mean[1] - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_index_labels_dense() {
        let idx = index_labels(["b", "a", "b", "c"].into_iter());
        assert_eq!(idx["a"], 0);
        assert_eq!(idx["b"], 1);
        assert_eq!(idx["c"], 2);
    }
}
