use thiserror::Error;

/// A match record or parameter that failed validation. `field` names the
/// offending input so the caller can point at it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("calibration grid is empty")]
    EmptyGrid,

    #[error("warm-up fraction {0} must lie in [0, 1)")]
    InvalidWarmup(f64),

    #[error("no matches left to score: history has {matches} matches, warm-up takes {warmup}")]
    NoScoredMatches { matches: usize, warmup: usize },

    #[error("objective is undefined for candidate {index}: {reason}")]
    UndefinedObjective { index: usize, reason: String },

    #[error("no calibration trial completed ({cancelled} cancelled, {failed} failed)")]
    NoCompletedTrials { cancelled: usize, failed: usize },
}

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unknown team '{team}'{}", did_you_mean(.suggestion))]
    UnknownTeam {
        team: String,
        suggestion: Option<String>,
    },

    #[error("calibration failed: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("goal model fit failed: {0}")]
    Model(String),

    #[error("trial cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean '{}'?)", s))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, ForgeError>;
