//! Error types.
//!
//! - [`EngineError`] is what the engine (simulation, segmentation, fitting,
//!   timelines, scenarios) returns.
//! - [`AppError`] is what the binary returns; it only carries a message and the
//!   process exit code.

use chrono::NaiveDate;
use thiserror::Error;

/// Engine-level result alias.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the phase-dependent ODE engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A parameter value is missing, non-finite or outside the declared bounds.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A date range is inverted or otherwise unusable.
    #[error("Invalid date range: {start} > {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    /// The observed series breaks one of its invariants.
    #[error("Invalid observed series: {0}")]
    InvalidSeries(String),

    /// A model schema was rejected at registration.
    #[error("Invalid model '{model}': {reason}")]
    InvalidModel { model: String, reason: String },

    #[error("Unknown ODE model '{0}'")]
    UnknownModel(String),

    /// The optimizer did not reach an acceptable fit.
    ///
    /// The best-found parameters are carried so that callers can still use
    /// them as a low-confidence result.
    #[error("Estimation of phase {phase} did not reach an acceptable fit (score={score:.6})")]
    EstimationFailure {
        phase: String,
        params: Vec<f64>,
        score: f64,
    },

    /// A mutating timeline operation would break contiguity/non-overlap.
    #[error("Dynamics consistency: {0}")]
    DynamicsConsistency(String),

    #[error("Unknown scenario '{0}'")]
    UnknownScenario(String),

    #[error("Scenario '{0}' already exists")]
    DuplicateScenario(String),

    #[error("Unknown phase '{0}'")]
    UnknownPhase(String),

    /// A phase without parameter values has no earlier phase to inherit from.
    #[error("Phase {0} has no parameter values to simulate with")]
    MissingParameters(String),

    /// The external predictor broke its contract.
    #[error("Predictor error: {0}")]
    Predictor(String),

    /// An `argmin` run failed before producing a result.
    #[error("Optimizer error: {0}")]
    Optimizer(String),

    /// Propagated unchanged from the data provider.
    #[error("Data unavailable for '{geo}': {reason}")]
    DataUnavailable { geo: String, reason: String },
}

impl EngineError {
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        EngineError::InvalidParameter(message.into())
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        EngineError::DynamicsConsistency(message.into())
    }

    pub fn invalid_series(message: impl Into<String>) -> Self {
        EngineError::InvalidSeries(message.into())
    }

    /// Check `start <= end`.
    pub fn check_range(start: NaiveDate, end: NaiveDate) -> EngineResult<()> {
        if end < start {
            return Err(EngineError::InvalidRange { start, end });
        }
        Ok(())
    }

    /// Process exit code used by the binary.
    ///
    /// - 2: caller input (bad parameters, ranges, names)
    /// - 3: data (series invariants, provider)
    /// - 4: numerical / internal
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::InvalidParameter(_)
            | EngineError::InvalidRange { .. }
            | EngineError::UnknownModel(_)
            | EngineError::UnknownScenario(_)
            | EngineError::DuplicateScenario(_)
            | EngineError::UnknownPhase(_)
            | EngineError::DynamicsConsistency(_) => 2,
            EngineError::InvalidSeries(_) | EngineError::DataUnavailable { .. } => 3,
            EngineError::InvalidModel { .. }
            | EngineError::EstimationFailure { .. }
            | EngineError::MissingParameters(_)
            | EngineError::Predictor(_)
            | EngineError::Optimizer(_) => 4,
        }
    }
}

impl From<argmin::core::Error> for EngineError {
    fn from(err: argmin::core::Error) -> Self {
        EngineError::Optimizer(err.to_string())
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
