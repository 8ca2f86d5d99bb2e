//! Working dataset assembly, standardization and outlier filtering.
//!
//! Raw CRPS values are not comparable across questions or days: a crude oil
//! forecast on a volatile day scores on a different scale from an S&P 500
//! forecast on a calm one. Each (date, question) cell is therefore
//! standardized against its own control arm before estimation.
//!
//! Pipeline:
//! 1. Keep completed records that have an arm and a score
//! 2. Guard: a cell needs `min_control_rows` control rows with varying scores;
//!    cells that fail are left out and listed in [`DatasetStatus`]
//! 3. Standardize
//! 4. Drop rows below `cutoff_std` (inattentive or confused participants)
//! 5. Guard again and re-standardize the filtered rows
//!
//! When no cell passes the guard the dataset is returned unstandardized with
//! the reason; this is not an error.

mod standardize;

pub use standardize::{cell_shortfalls, control_stats, standardize, ControlStats, Standardized};

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::config::ExperimentConfig;
use super::infra::targets;
use super::records::ForecastRecord;
use crate::consts::{CUTOFF_STD, MIN_CONTROL_ROWS};
use crate::errors::{ControlShortfall, Error, Result};

/// Standardization settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Control rows required in every (date, question) cell
    pub min_control_rows: usize,
    /// Rows with a standardized score below this are dropped
    pub cutoff_std: f64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            min_control_rows: MIN_CONTROL_ROWS,
            cutoff_std: CUTOFF_STD,
        }
    }
}

impl DatasetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_control_rows < 2 {
            return Err(Error::config(
                "dataset.min_control_rows must be >= 2 for a control standard deviation",
            ));
        }
        if !self.cutoff_std.is_finite() {
            return Err(Error::config("dataset.cutoff_std must be finite"));
        }
        Ok(())
    }
}

/// One (participant, question) observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingRow {
    pub date: NaiveDate,
    pub question: String,
    pub arm: String,
    pub raw_score: f64,
    pub standardized: Option<f64>,
}

impl WorkingRow {
    pub fn new(
        date: NaiveDate,
        question: impl Into<String>,
        arm: impl Into<String>,
        raw_score: f64,
    ) -> Self {
        Self {
            date,
            question: question.into(),
            arm: arm.into(),
            raw_score,
            standardized: None,
        }
    }

    /// Fixed-effect cell of the row.
    pub fn cell(&self) -> (NaiveDate, String) {
        (self.date, self.question.clone())
    }

    /// Regression target: the standardized score when available.
    pub fn target(&self) -> f64 {
        self.standardized.unwrap_or(self.raw_score)
    }
}

/// How far the pipeline got.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetStatus {
    /// No scored rows
    Empty,
    /// Standardized, with the number of outlier rows dropped and the cells
    /// left out for lack of control data
    Standardized {
        dropped: usize,
        excluded: Vec<ControlShortfall>,
    },
    /// Guard failed; rows carry raw scores only
    Unstandardized {
        reason: ControlShortfall,
        dropped: usize,
    },
}

impl DatasetStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DatasetStatus::Empty => "empty",
            DatasetStatus::Standardized { .. } => "standardized",
            DatasetStatus::Unstandardized { .. } => "unstandardized",
        }
    }
}

/// Rows ready for estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingDataset {
    pub rows: Vec<WorkingRow>,
    pub status: DatasetStatus,
}

impl WorkingDataset {
    pub fn is_standardized(&self) -> bool {
        matches!(self.status, DatasetStatus::Standardized { .. })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Why the dataset could not be standardized, as an error.
    pub fn shortfall(&self) -> Option<Error> {
        match &self.status {
            DatasetStatus::Unstandardized { reason, .. } => {
                Some(Error::InsufficientControlData(reason.clone()))
            }
            _ => None,
        }
    }

    /// Cells left out of a standardized dataset.
    pub fn excluded_cells(&self) -> &[ControlShortfall] {
        match &self.status {
            DatasetStatus::Standardized { excluded, .. } => excluded,
            _ => &[],
        }
    }

    /// Row count and mean regression target per arm.
    pub fn arm_summary(&self) -> BTreeMap<String, ArmSummary> {
        let mut acc: BTreeMap<String, (usize, f64)> = BTreeMap::new();
        for row in &self.rows {
            let e = acc.entry(row.arm.clone()).or_insert((0, 0.0));
            e.0 += 1;
            e.1 += row.target();
        }
        acc.into_iter()
            .map(|(arm, (rows, sum))| {
                let summary = ArmSummary {
                    rows,
                    mean_target: sum / rows as f64,
                };
                (arm, summary)
            })
            .collect()
    }
}

/// Per-arm view of the working dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmSummary {
    pub rows: usize,
    pub mean_target: f64,
}

/// Builds the working dataset from completed records.
#[derive(Debug, Clone)]
pub struct StandardizationPipeline {
    config: DatasetConfig,
    control_arm: String,
}

impl StandardizationPipeline {
    pub fn new(config: DatasetConfig, control_arm: impl Into<String>) -> Self {
        Self {
            config,
            control_arm: control_arm.into(),
        }
    }

    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self::new(config.dataset.clone(), config.control_arm.clone())
    }

    /// Rows with an arm label and a finite score.
    pub fn rows_from_records(records: &[ForecastRecord]) -> Vec<WorkingRow> {
        records
            .iter()
            .filter(|r| !r.arm().is_empty())
            .filter_map(|r| {
                let score = r.score().filter(|s| s.is_finite())?;
                Some(WorkingRow::new(r.date(), r.question(), r.arm(), score))
            })
            .collect()
    }

    pub fn run(&self, records: &[ForecastRecord]) -> WorkingDataset {
        self.run_rows(Self::rows_from_records(records))
    }

    pub fn run_rows(&self, rows: Vec<WorkingRow>) -> WorkingDataset {
        if rows.is_empty() {
            return WorkingDataset {
                rows,
                status: DatasetStatus::Empty,
            };
        }
        let min = self.config.min_control_rows;

        let first = match standardize(rows, &self.control_arm, min) {
            Ok(first) => first,
            Err((reason, rows)) => return self.unstandardized(rows, reason, 0),
        };
        let mut excluded = first.excluded;
        let mut excluded_rows = first.excluded_rows;

        let before = first.rows.len();
        let kept: Vec<WorkingRow> = first
            .rows
            .into_iter()
            .filter(|r| r.standardized.is_some_and(|z| z >= self.config.cutoff_std))
            .map(|mut r| {
                r.standardized = None;
                r
            })
            .collect();
        let dropped = before - kept.len();

        match standardize(kept, &self.control_arm, min) {
            Ok(second) => {
                excluded.extend(second.excluded);
                excluded_rows += second.excluded_rows;
                for reason in &excluded {
                    warn!(
                        target: targets::DATASET,
                        %reason,
                        "Cell left out of the working dataset"
                    );
                }
                info!(
                    target: targets::DATASET,
                    rows = second.rows.len(),
                    dropped,
                    excluded_cells = excluded.len(),
                    excluded_rows,
                    cutoff = self.config.cutoff_std,
                    "Working dataset standardized"
                );
                WorkingDataset {
                    rows: second.rows,
                    status: DatasetStatus::Standardized { dropped, excluded },
                }
            }
            Err((reason, rows)) => self.unstandardized(rows, reason, dropped),
        }
    }

    fn unstandardized(
        &self,
        rows: Vec<WorkingRow>,
        reason: ControlShortfall,
        dropped: usize,
    ) -> WorkingDataset {
        warn!(
            target: targets::DATASET,
            rows = rows.len(),
            dropped,
            %reason,
            "Insufficient control data, dataset left unstandardized"
        );
        WorkingDataset {
            rows,
            status: DatasetStatus::Unstandardized { reason, dropped },
        }
    }
}
