//! Forecasting questions and their realized-outcome sources.
//!
//! A question is static: a name, an informational URL, and a source that
//! reports realized outcomes keyed by trading date. Sources omit dates with no
//! observation (weekends, holidays) rather than reporting gaps.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::infra::targets;
use crate::errors::{Error, Result};

/// A forecasting question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDefinition {
    /// Question id, as stored on forecast records
    pub name: String,
    /// Where participants can read about the forecast variable
    pub url: String,
}

impl QuestionDefinition {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Questions asked when no configuration overrides them: end-of-day crude
/// oil futures price and S&P 500 index close.
pub fn default_questions() -> Vec<QuestionDefinition> {
    vec![
        QuestionDefinition::new("crude", "https://finance.yahoo.com/chart/CL%3DF"),
        QuestionDefinition::new("s_and_p", "https://finance.yahoo.com/chart/%5EGSPC"),
    ]
}

/// Market date of an instant: the calendar day in New York, where both
/// default questions settle.
pub fn trading_day(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&New_York).date_naive()
}

/// Today's market date.
pub fn trading_today() -> NaiveDate {
    trading_day(Utc::now())
}

/// Realized outcome for one date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeObservation {
    pub date: NaiveDate,
    pub outcome: f64,
}

/// Flat outcome row, as found in outcome files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRow {
    pub question: String,
    pub date: NaiveDate,
    pub outcome: f64,
}

/// Provider of realized outcomes.
pub trait OutcomeSource: Send + Sync {
    /// Outcomes for `question` dated on or after `since`, in date order.
    ///
    /// # Errors
    /// `DataUnavailable` if the source cannot be reached or has nothing for
    /// the window. Callers skip the question for this cycle.
    fn outcomes(
        &self,
        question: &QuestionDefinition,
        since: NaiveDate,
    ) -> Result<Vec<OutcomeObservation>>;
}

/// Outcome source over an in-memory table.
#[derive(Debug, Clone, Default)]
pub struct StaticOutcomeSource {
    tables: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
}

impl StaticOutcomeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = OutcomeRow>) -> Self {
        let mut source = Self::new();
        for row in rows {
            source.insert(row.question, row.date, row.outcome);
        }
        source
    }

    /// Load a JSON array of [`OutcomeRow`]s.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        let rows: Vec<OutcomeRow> = serde_json::from_str(&json)?;
        Ok(Self::from_rows(rows))
    }

    /// Record an outcome, replacing any previous value for the date.
    pub fn insert(&mut self, question: impl Into<String>, date: NaiveDate, outcome: f64) {
        self.tables
            .entry(question.into())
            .or_default()
            .insert(date, outcome);
    }
}

impl OutcomeSource for StaticOutcomeSource {
    fn outcomes(
        &self,
        question: &QuestionDefinition,
        since: NaiveDate,
    ) -> Result<Vec<OutcomeObservation>> {
        let table = self
            .tables
            .get(&question.name)
            .ok_or_else(|| Error::data_unavailable(&question.name, "no outcome table"))?;

        let rows: Vec<OutcomeObservation> = table
            .range(since..)
            .filter(|(_, v)| v.is_finite())
            .map(|(&date, &outcome)| OutcomeObservation { date, outcome })
            .collect();

        if rows.is_empty() {
            return Err(Error::data_unavailable(
                &question.name,
                format!("no outcomes since {since}"),
            ));
        }
        debug!(
            target: targets::RECONCILE,
            question = %question.name,
            rows = rows.len(),
            "Outcome table fetched"
        );
        Ok(rows)
    }
}
