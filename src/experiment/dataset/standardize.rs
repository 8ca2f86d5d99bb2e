//! Control-arm standardization within (date, question) cells.
//!
//! ```text
//! z = (score - mean_control) / std_control
//! ```
//!
//! Statistics come from the control rows of the row's own cell, with the
//! sample (n - 1) standard deviation. A cell with too few control rows, or
//! with control scores that do not vary, cannot be standardized and is left
//! out of the working dataset.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::WorkingRow;
use crate::errors::ControlShortfall;

type CellKey = (NaiveDate, String);

/// Control-arm statistics of one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
}

impl ControlStats {
    fn from_scores(scores: &[f64]) -> Self {
        let count = scores.len();
        if count == 0 {
            return Self {
                count,
                mean: f64::NAN,
                std: f64::NAN,
            };
        }
        let mean = scores.iter().sum::<f64>() / count as f64;
        let std = if count < 2 {
            f64::NAN
        } else {
            let ss: f64 = scores.iter().map(|s| (s - mean).powi(2)).sum();
            (ss / (count - 1) as f64).sqrt()
        };
        Self { count, mean, std }
    }
}

/// Control statistics for every cell that has rows.
pub fn control_stats(rows: &[WorkingRow], control_arm: &str) -> BTreeMap<CellKey, ControlStats> {
    let mut scores: BTreeMap<CellKey, Vec<f64>> = BTreeMap::new();
    for row in rows {
        let entry = scores.entry(row.cell()).or_default();
        if row.arm == control_arm {
            entry.push(row.raw_score);
        }
    }
    scores
        .into_iter()
        .map(|(cell, s)| (cell, ControlStats::from_scores(&s)))
        .collect()
}

/// Every cell that cannot be standardized, with the reason.
pub fn cell_shortfalls(
    stats: &BTreeMap<CellKey, ControlStats>,
    min_control_rows: usize,
) -> BTreeMap<CellKey, ControlShortfall> {
    stats
        .iter()
        .filter_map(|((date, question), s)| {
            let shortfall = if s.count < min_control_rows {
                ControlShortfall::TooFewRows {
                    date: date.to_string(),
                    question: question.clone(),
                    found: s.count,
                    required: min_control_rows,
                }
            } else if !(s.std.is_finite() && s.std > 0.0) {
                ControlShortfall::ZeroVariance {
                    date: date.to_string(),
                    question: question.clone(),
                }
            } else {
                return None;
            };
            Some(((*date, question.clone()), shortfall))
        })
        .collect()
}

/// Rows of the healthy cells, standardized, plus the cells left out.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardized {
    pub rows: Vec<WorkingRow>,
    pub excluded: Vec<ControlShortfall>,
    pub excluded_rows: usize,
}

/// Standardize each row's raw score against its cell's control arm.
///
/// Cells that fail the control guard are left out and reported. When no
/// cell passes, the first shortfall is returned with the rows unchanged.
pub fn standardize(
    rows: Vec<WorkingRow>,
    control_arm: &str,
    min_control_rows: usize,
) -> Result<Standardized, (ControlShortfall, Vec<WorkingRow>)> {
    let stats = control_stats(&rows, control_arm);
    let mut failing = cell_shortfalls(&stats, min_control_rows);
    if failing.len() == stats.len() {
        if let Some((_, first)) = failing.pop_first() {
            return Err((first, rows));
        }
    }

    let before = rows.len();
    let rows: Vec<WorkingRow> = rows
        .into_iter()
        .filter(|row| !failing.contains_key(&row.cell()))
        .map(|mut row| {
            let s = &stats[&row.cell()];
            row.standardized = Some((row.raw_score - s.mean) / s.std);
            row
        })
        .collect();
    Ok(Standardized {
        excluded_rows: before - rows.len(),
        rows,
        excluded: failing.into_values().collect(),
    })
}
