//! Forecast records: one participant × one question.
//!
//! Records are created when a participant submits elicitation answers and are
//! only ever mutated by outcome reconciliation, which fills in the realized
//! outcome and score and eventually marks the participant complete.

mod store;

pub use store::{JsonRecordStore, MemoryRecordStore, RecordStore};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::elicitation::QuantilePair;
use crate::consts::{CANONICAL_PROBABILITIES, DATE_FORMAT};
use crate::errors::{Error, Result};

/// Store key of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub participant_id: String,
    pub question: String,
}

/// A participant's forecast for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    participant_id: String,
    arm: String,
    question: String,
    /// Survey start date (trading day, local to the outcome's exchange)
    date: NaiveDate,
    quantiles: Vec<QuantilePair>,
    #[serde(default)]
    outcome: Option<f64>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    complete: bool,
}

impl ForecastRecord {
    /// Create a pending record.
    ///
    /// # Errors
    /// Schema violation unless exactly one value is given per canonical
    /// probability (0, 0.25, 0.5, 0.75, 1).
    pub fn new(
        participant_id: impl Into<String>,
        arm: impl Into<String>,
        question: impl Into<String>,
        date: NaiveDate,
        quantiles: Vec<QuantilePair>,
    ) -> Result<Self> {
        let record = Self {
            participant_id: participant_id.into(),
            arm: arm.into(),
            question: question.into(),
            date,
            quantiles,
            outcome: None,
            score: None,
            complete: false,
        };
        record.validate()?;
        Ok(record)
    }

    /// Create a pending record from values at the canonical probabilities.
    pub fn from_values(
        participant_id: impl Into<String>,
        arm: impl Into<String>,
        question: impl Into<String>,
        date: NaiveDate,
        values: &[f64],
    ) -> Result<Self> {
        if values.len() != CANONICAL_PROBABILITIES.len() {
            return Err(Error::schema(format!(
                "expected {} elicited values, got {}",
                CANONICAL_PROBABILITIES.len(),
                values.len()
            )));
        }
        Self::new(
            participant_id,
            arm,
            question,
            date,
            QuantilePair::canonical(values),
        )
    }

    /// Check the persisted schema.
    pub fn validate(&self) -> Result<()> {
        if self.participant_id.is_empty() || self.question.is_empty() {
            return Err(Error::schema("participant id and question are required"));
        }
        let mut probs: Vec<f64> = self.quantiles.iter().map(|q| q.probability).collect();
        probs.sort_by(f64::total_cmp);
        if probs.len() != CANONICAL_PROBABILITIES.len()
            || probs
                .iter()
                .zip(CANONICAL_PROBABILITIES.iter())
                .any(|(a, b)| (a - b).abs() > 1e-9)
        {
            return Err(Error::schema(format!(
                "record ({}, {}) must elicit exactly the canonical probabilities, got {:?}",
                self.participant_id, self.question, probs
            )));
        }
        Ok(())
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            participant_id: self.participant_id.clone(),
            question: self.question.clone(),
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn arm(&self) -> &str {
        &self.arm
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Survey date as a `YYYY-MM-DD` string.
    pub fn date_str(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn quantiles(&self) -> &[QuantilePair] {
        &self.quantiles
    }

    pub fn outcome(&self) -> Option<f64> {
        self.outcome
    }

    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn has_outcome(&self) -> bool {
        self.outcome.is_some()
    }

    pub(crate) fn resolve(&mut self, outcome: f64, score: Option<f64>) {
        self.outcome = Some(outcome);
        self.score = score;
    }

    pub(crate) fn mark_complete(&mut self) {
        self.complete = true;
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| Error::schema(format!("invalid date '{s}': {e}")))
}
