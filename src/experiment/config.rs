//! Experiment configuration.
//!
//! Loaded from TOML; every field has a default so a missing or partial file
//! still yields a runnable experiment (control, x, y and z arms forecasting
//! crude oil and the S&P 500).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::dataset::DatasetConfig;
use super::elicitation::ElicitationStrategy;
use super::infra::LogConfig;
use super::questions::{default_questions, QuestionDefinition};
use super::reconcile::ReconcileConfig;
use super::scoring::ScoringConfig;
use super::weights::WeightConfig;
use crate::consts::CONTROL_ARM;
use crate::errors::{Error, Result};

/// A treatment arm and how its participants' answers become distributions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArmConfig {
    pub name: String,
    #[serde(default)]
    pub strategy: ElicitationStrategy,
}

impl ArmConfig {
    pub fn nonparametric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: ElicitationStrategy::Nonparametric,
        }
    }
}

fn default_arms() -> Vec<ArmConfig> {
    [CONTROL_ARM, "x", "y", "z"]
        .into_iter()
        .map(ArmConfig::nonparametric)
        .collect()
}

/// Top-level experiment configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Baseline arm label
    pub control_arm: String,
    pub arms: Vec<ArmConfig>,
    pub questions: Vec<QuestionDefinition>,
    pub scoring: ScoringConfig,
    pub reconcile: ReconcileConfig,
    pub dataset: DatasetConfig,
    pub weights: WeightConfig,
    pub logging: LogConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            control_arm: CONTROL_ARM.to_string(),
            arms: default_arms(),
            questions: default_questions(),
            scoring: ScoringConfig::default(),
            reconcile: ReconcileConfig::default(),
            dataset: DatasetConfig::default(),
            weights: WeightConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Load and validate a TOML config file.
    ///
    /// A missing file yields the default configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.arms.is_empty() {
            return Err(Error::config("at least one arm is required"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for arm in &self.arms {
            if arm.name.is_empty() {
                return Err(Error::config("arm names must be non-empty"));
            }
            if !seen.insert(arm.name.as_str()) {
                return Err(Error::config(format!("duplicate arm '{}'", arm.name)));
            }
        }
        if !seen.contains(self.control_arm.as_str()) {
            return Err(Error::config(format!(
                "control arm '{}' is not one of the configured arms",
                self.control_arm
            )));
        }
        if self.questions.is_empty() {
            return Err(Error::config("at least one question is required"));
        }
        self.scoring.validate()?;
        self.dataset.validate()?;
        self.weights.validate()?;
        Ok(())
    }

    /// Arm labels in configuration order.
    pub fn arm_labels(&self) -> Vec<String> {
        self.arms.iter().map(|a| a.name.clone()).collect()
    }

    /// Arm label → elicitation strategy.
    pub fn strategies(&self) -> BTreeMap<String, ElicitationStrategy> {
        self.arms
            .iter()
            .map(|a| (a.name.clone(), a.strategy))
            .collect()
    }
}
