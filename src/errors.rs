use thiserror::Error;

/// Reasons a cell of the working dataset cannot be standardized.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlShortfall {
    #[error("cell ({date}, {question}) has {found} control rows, need {required}")]
    TooFewRows {
        date: String,
        question: String,
        found: usize,
        required: usize,
    },
    #[error("cell ({date}, {question}) has zero control score variance")]
    ZeroVariance { date: String, question: String },
}

/// Storage-layer errors
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Record store unavailable: {0}")]
    Unavailable(String),
    #[error("Unknown record ({participant_id}, {question})")]
    UnknownRecord {
        participant_id: String,
        question: String,
    },
    #[error("Schema violation: {0}")]
    Schema(String),
}

/// Main crate error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Elicited values are not weakly increasing with probability
    #[error("Malformed elicitation: values must be weakly increasing with the cdf, got {values:?}")]
    MalformedElicitation { values: Vec<f64> },

    /// Probability argument outside [0, 1] or non-finite
    #[error("Invalid probability: {0}")]
    InvalidProbability(f64),

    /// Outcome source could not produce a table for the window
    #[error("Outcome data unavailable for question '{question}': {reason}")]
    DataUnavailable { question: String, reason: String },

    /// Standardization guard failed
    #[error("Insufficient control data: {0}")]
    InsufficientControlData(ControlShortfall),

    /// Regression could not be solved
    #[error("Estimation error: {0}")]
    Estimation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid experiment configuration
    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Json parse error: {0}")]
    Json(String),

    #[error("Toml error: {0}")]
    Toml(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Toml(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Toml(e.to_string())
    }
}

// Convenience constructors for common error patterns
impl Error {
    /// Create a data-unavailable error for a question
    pub fn data_unavailable(question: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::DataUnavailable {
            question: question.into(),
            reason: reason.into(),
        }
    }

    /// Create a config validation error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a schema violation error
    pub fn schema(msg: impl Into<String>) -> Self {
        Error::Store(StoreError::Schema(msg.into()))
    }

    /// Whether the error is local to one unit of work (record, cell, question)
    /// and should be absorbed rather than propagated.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::MalformedElicitation { .. }
                | Error::InvalidProbability(_)
                | Error::DataUnavailable { .. }
                | Error::InsufficientControlData(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
