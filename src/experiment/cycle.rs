//! One experiment cycle: reconcile → standardize → estimate → reweight.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use super::config::ExperimentConfig;
use super::dataset::{ArmSummary, DatasetStatus, StandardizationPipeline, WorkingDataset};
use super::estimator::{PosteriorSummary, TreatmentEffectEstimator, TreatmentPosterior};
use super::infra::targets;
use super::questions::OutcomeSource;
use super::reconcile::{OutcomeReconciler, ReconcileReport};
use super::records::RecordStore;
use super::weights::{AssignmentWeights, WeightUpdater};
use crate::errors::Result;

/// Summary of a cycle, suitable for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub today: NaiveDate,
    pub reconcile: ReconcileReport,
    pub dataset_rows: usize,
    pub dataset_status: &'static str,
    /// Outlier rows removed by the cutoff
    pub dropped_rows: usize,
    /// Cells left out for lack of control data
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excluded_cells: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<String>,
    pub arms: BTreeMap<String, ArmSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posterior: Option<PosteriorSummary>,
    pub weights: AssignmentWeights,
}

/// Wires the pipeline stages together and owns the weight state across cycles.
#[derive(Debug)]
pub struct ExperimentCycle {
    reconciler: OutcomeReconciler,
    pipeline: StandardizationPipeline,
    estimator: TreatmentEffectEstimator,
    weights: WeightUpdater,
}

impl ExperimentCycle {
    pub fn new(config: &ExperimentConfig) -> Self {
        Self::with_snapshot(config, None)
    }

    /// Start from previously published weights when there are any.
    pub fn with_snapshot(config: &ExperimentConfig, snapshot: Option<AssignmentWeights>) -> Self {
        let weights = match snapshot {
            Some(snapshot) => WeightUpdater::with_snapshot(
                config.weights.clone(),
                config.control_arm.clone(),
                config.arm_labels(),
                snapshot,
            ),
            None => WeightUpdater::from_config(config),
        };
        Self {
            reconciler: OutcomeReconciler::from_config(config),
            pipeline: StandardizationPipeline::from_config(config),
            estimator: TreatmentEffectEstimator::new(config.control_arm.clone()),
            weights,
        }
    }

    /// Latest published weights.
    pub fn weights(&self) -> Arc<AssignmentWeights> {
        self.weights.current()
    }

    /// Run every stage once.
    ///
    /// Only structural failures (store, schema, outcome transport) are
    /// returned. A dataset that cannot be standardized or fitted leaves the
    /// weights unchanged.
    pub fn run(
        &self,
        store: &dyn RecordStore,
        source: &dyn OutcomeSource,
        today: NaiveDate,
    ) -> Result<CycleReport> {
        let reconcile = self.reconciler.run(store, source, today)?;

        let completed = store.completed()?;
        let dataset = self.pipeline.run(&completed);
        let posterior = self.fit(&dataset);
        let weights = self.weights.update(posterior.as_ref());

        let dropped_rows = match &dataset.status {
            DatasetStatus::Empty => 0,
            DatasetStatus::Standardized { dropped, .. }
            | DatasetStatus::Unstandardized { dropped, .. } => *dropped,
        };

        info!(
            target: targets::CYCLE,
            %today,
            resolved = reconcile.records_resolved,
            rows = dataset.len(),
            status = dataset.status.label(),
            weights_version = weights.version,
            "Cycle complete"
        );

        Ok(CycleReport {
            today,
            reconcile,
            dataset_rows: dataset.len(),
            dataset_status: dataset.status.label(),
            dropped_rows,
            excluded_cells: dataset
                .excluded_cells()
                .iter()
                .map(ToString::to_string)
                .collect(),
            shortfall: dataset.shortfall().map(|e| e.to_string()),
            arms: dataset.arm_summary(),
            posterior: posterior.as_ref().map(TreatmentPosterior::summary),
            weights: weights.as_ref().clone(),
        })
    }

    fn fit(&self, dataset: &WorkingDataset) -> Option<TreatmentPosterior> {
        match self.estimator.estimate(dataset) {
            Ok(posterior) => posterior,
            Err(e) => {
                warn!(
                    target: targets::CYCLE,
                    error = %e,
                    "Estimation failed, keeping current weights"
                );
                None
            }
        }
    }
}
