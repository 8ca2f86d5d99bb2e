//! Adaptive forecasting experiment.
//!
//! Participants in one of several treatment arms answer five quantile
//! questions about a market's next close. Once outcomes are known:
//!
//! - **elicitation**: quantile answers → piecewise-linear forecast distribution
//! - **scoring**: negative CRPS of the distribution against the outcome
//! - **reconcile**: fills outcomes and scores into pending records
//! - **dataset**: standardizes scores against the control arm per (date, question)
//! - **estimator**: fixed-effects OLS with date-clustered covariance
//! - **weights**: probability-of-best assignment weights with a control floor
//!
//! [`ExperimentCycle`] runs the stages in order against a [`RecordStore`] and
//! an [`OutcomeSource`].

pub mod config;
pub mod cycle;
pub mod dataset;
pub mod elicitation;
pub mod estimator;
pub mod infra;
pub mod questions;
pub mod reconcile;
pub mod records;
pub mod scoring;
pub mod weights;

pub use config::{ArmConfig, ExperimentConfig};
pub use cycle::{CycleReport, ExperimentCycle};
pub use dataset::{
    ArmSummary, DatasetConfig, DatasetStatus, StandardizationPipeline, WorkingDataset,
    WorkingRow,
};
pub use elicitation::{
    ElicitationStrategy, ElicitedDistribution, ForecastDistribution, PiecewiseElicitation,
    QuantilePair,
};
pub use estimator::{
    MultivariateNormal, PosteriorSummary, TreatmentEffectEstimator, TreatmentPosterior,
};
pub use infra::{init_logging, LogConfig, LogFormat};
pub use questions::{
    default_questions, trading_day, trading_today, OutcomeObservation, OutcomeRow,
    OutcomeSource, QuestionDefinition, StaticOutcomeSource,
};
pub use reconcile::{OutcomeReconciler, ReconcileConfig, ReconcileReport};
pub use records::{ForecastRecord, JsonRecordStore, MemoryRecordStore, RecordKey, RecordStore};
pub use scoring::{CrpsScorer, ScoringConfig};
pub use weights::{AssignmentWeights, WeightConfig, WeightUpdater};
