//! Outcome reconciliation.
//!
//! Joins pending forecast records with realized outcomes once they exist,
//! scores the newly resolved forecasts and marks participants complete.
//!
//! ```text
//! store.pending(today - lookback)   participants active in the window
//!   │ every incomplete record of those participants, any date
//!   ▼
//! left join on (date, question) ◄── OutcomeSource (one fetch per question)
//!   │ score newly resolved rows with the arm's elicitation strategy
//!   ▼
//! store.commit(batch)            (all or nothing)
//! ```
//!
//! Records that are already complete are never read, so re-running a pass
//! without new outcomes changes nothing.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::ExperimentConfig;
use super::elicitation::ElicitationStrategy;
use super::infra::targets;
use super::questions::{OutcomeSource, QuestionDefinition};
use super::records::{ForecastRecord, RecordStore};
use super::scoring::CrpsScorer;
use crate::errors::Result;

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Only participants surveyed within this many days are considered
    pub lookback_days: u32,
    /// Ignore outcomes dated today (the session has not closed yet)
    pub exclude_today: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            lookback_days: 5,
            exclude_today: true,
        }
    }
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Incomplete participants with a record inside the lookback window
    pub participants_scanned: usize,
    /// Records that received an outcome this pass
    pub records_resolved: usize,
    /// Resolved records whose forecast could not be scored
    pub records_unscored: usize,
    /// Participants whose every record now has an outcome
    pub participants_completed: usize,
    /// Questions whose outcome table could not be fetched
    pub questions_skipped: Vec<String>,
    /// Records written in the committed batch
    pub records_committed: usize,
}

/// Fills in outcomes and scores for pending forecast records.
#[derive(Debug, Clone)]
pub struct OutcomeReconciler {
    config: ReconcileConfig,
    scorer: CrpsScorer,
    strategies: BTreeMap<String, ElicitationStrategy>,
    questions: Vec<QuestionDefinition>,
}

impl OutcomeReconciler {
    pub fn new(
        config: ReconcileConfig,
        scorer: CrpsScorer,
        strategies: BTreeMap<String, ElicitationStrategy>,
        questions: Vec<QuestionDefinition>,
    ) -> Self {
        Self {
            config,
            scorer,
            strategies,
            questions,
        }
    }

    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self::new(
            config.reconcile.clone(),
            CrpsScorer::new(config.scoring.clone()),
            config.strategies(),
            config.questions.clone(),
        )
    }

    /// Earliest survey date still inside the lookback window.
    pub fn window_start(&self, today: NaiveDate) -> NaiveDate {
        today - Duration::days(i64::from(self.config.lookback_days))
    }

    /// Run one pass and commit the resulting batch.
    ///
    /// Outcome sources that report `DataUnavailable` are skipped until the
    /// next pass; store failures propagate and leave the store unchanged.
    pub fn run(
        &self,
        store: &dyn RecordStore,
        source: &dyn OutcomeSource,
        today: NaiveDate,
    ) -> Result<ReconcileReport> {
        let since = self.window_start(today);
        let active: BTreeSet<String> = store
            .pending(since)?
            .iter()
            .map(|r| r.participant_id().to_string())
            .collect();

        let mut report = ReconcileReport::default();
        if active.is_empty() {
            debug!(target: targets::RECONCILE, %since, "No pending records");
            return Ok(report);
        }

        // Completion is judged on all of a participant's records, including
        // ones surveyed before the window
        let mut by_participant: BTreeMap<String, Vec<ForecastRecord>> = BTreeMap::new();
        for record in store.load_all()? {
            if !record.is_complete() && active.contains(record.participant_id()) {
                by_participant
                    .entry(record.participant_id().to_string())
                    .or_default()
                    .push(record);
            }
        }
        report.participants_scanned = by_participant.len();

        let unresolved = || by_participant.values().flatten().filter(|r| !r.has_outcome());
        let wanted: BTreeSet<&str> = unresolved().map(|r| r.question()).collect();
        let fetch_since = unresolved().map(|r| r.date()).fold(since, NaiveDate::min);
        let outcomes = self.fetch_outcomes(source, &wanted, fetch_since, today, &mut report)?;

        let mut batch = Vec::new();
        for (participant_id, mut records) in by_participant {
            let mut changed = false;

            for record in records.iter_mut().filter(|r| !r.has_outcome()) {
                let key = (record.question().to_string(), record.date());
                let Some(&outcome) = outcomes.get(&key) else {
                    continue;
                };

                let score = match self.strategies.get(record.arm()) {
                    Some(&strategy) => {
                        self.scorer
                            .score_elicitation(strategy, record.quantiles(), outcome)
                    }
                    None => {
                        warn!(
                            target: targets::RECONCILE,
                            participant = %participant_id,
                            arm = %record.arm(),
                            "Unknown arm, outcome recorded without a score"
                        );
                        None
                    }
                };

                if score.is_none() {
                    report.records_unscored += 1;
                }
                record.resolve(outcome, score);
                report.records_resolved += 1;
                changed = true;
            }

            if records.iter().all(ForecastRecord::has_outcome) {
                records.iter_mut().for_each(ForecastRecord::mark_complete);
                report.participants_completed += 1;
                changed = true;
            }

            if changed {
                batch.extend(records);
            }
        }

        if !batch.is_empty() {
            report.records_committed = store.commit(batch)?;
        }

        info!(
            target: targets::RECONCILE,
            participants = report.participants_scanned,
            resolved = report.records_resolved,
            unscored = report.records_unscored,
            completed = report.participants_completed,
            skipped = ?report.questions_skipped,
            "Reconciliation pass finished"
        );
        Ok(report)
    }

    /// One outcome fetch per configured question that has pending rows.
    fn fetch_outcomes(
        &self,
        source: &dyn OutcomeSource,
        wanted: &BTreeSet<&str>,
        since: NaiveDate,
        today: NaiveDate,
        report: &mut ReconcileReport,
    ) -> Result<BTreeMap<(String, NaiveDate), f64>> {
        let mut joined = BTreeMap::new();

        for name in wanted {
            let Some(question) = self.questions.iter().find(|q| q.name == *name) else {
                warn!(
                    target: targets::RECONCILE,
                    question = %name,
                    "Records reference an unconfigured question"
                );
                report.questions_skipped.push(name.to_string());
                continue;
            };

            match source.outcomes(question, since) {
                Ok(rows) => {
                    for row in rows {
                        if self.config.exclude_today && row.date == today {
                            continue;
                        }
                        joined.insert((question.name.clone(), row.date), row.outcome);
                    }
                }
                Err(e) if e.is_local() => {
                    warn!(
                        target: targets::RECONCILE,
                        question = %question.name,
                        error = %e,
                        "Outcome data unavailable, retrying next cycle"
                    );
                    report.questions_skipped.push(question.name.clone());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(joined)
    }
}
