use thiserror::Error;

/// Errors raised while configuring or solving an optimal control problem.
#[derive(Debug, Error)]
pub enum OcpError {
    #[error("invalid discretization: {0}")]
    InvalidDiscretization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("structural model for `{model}` unavailable: {reason}")]
    MissingStructuralModel { model: String, reason: String },

    #[error("integrator diverged at stage {stage}: residual {residual:e} after {iterations} Newton iterations")]
    IntegratorDivergence {
        stage: usize,
        iterations: usize,
        residual: f64,
    },

    #[error("QP sub-problem infeasible: {0}")]
    QpInfeasible(String),

    #[error("maximum number of iterations ({iterations}) reached")]
    MaxIterationsReached { iterations: usize },

    #[error("non-finite value detected in {0}")]
    NanDetected(String),

    #[error("stage {stage} out of range (N = {n})")]
    InvalidStage { stage: usize, n: usize },

    #[error("field `{field}` is not available at stage {stage}")]
    FieldUnavailable { stage: usize, field: &'static str },

    #[error("dimension mismatch for `{field}`: expected {expected}, got {got}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl OcpError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        OcpError::Configuration(msg.into())
    }

    pub(crate) fn dims(field: impl Into<String>, expected: usize, got: usize) -> Self {
        OcpError::DimensionMismatch {
            field: field.into(),
            expected,
            got,
        }
    }

    /// Status code a solve reports when it aborts with this error.
    pub fn status(&self) -> SolverStatus {
        match self {
            OcpError::NanDetected(_) => SolverStatus::NanDetected,
            OcpError::MaxIterationsReached { .. } => SolverStatus::MaxIterations,
            _ => SolverStatus::Failure,
        }
    }
}

/// Outcome of [`OcpSolver::solve`](crate::OcpSolver::solve).
///
/// Only [`Success`](SolverStatus::Success) and
/// [`MaxIterations`](SolverStatus::MaxIterations) leave a usable trajectory
/// behind; every other status is fatal to the calling workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[repr(i32)]
pub enum SolverStatus {
    Success = 0,
    /// QP sub-problem failure or integrator divergence.
    Failure = 1,
    /// Best-effort primal result.
    MaxIterations = 2,
    /// No trial point of the line search could be evaluated.
    MinStep = 3,
    NanDetected = 4,
}

impl SolverStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_usable(self) -> bool {
        matches!(self, SolverStatus::Success | SolverStatus::MaxIterations)
    }

    /// Turns anything but a converged solve into an error, for callers
    /// that cannot work with best-effort results.
    pub fn ensure_converged(self, iterations: usize) -> Result<(), OcpError> {
        match self {
            SolverStatus::Success => Ok(()),
            SolverStatus::MaxIterations => Err(OcpError::MaxIterationsReached { iterations }),
            SolverStatus::NanDetected => Err(OcpError::NanDetected("SQP iterate".to_string())),
            SolverStatus::MinStep => Err(OcpError::QpInfeasible(
                "no line search trial point could be evaluated".to_string(),
            )),
            SolverStatus::Failure => Err(OcpError::QpInfeasible("solver failure".to_string())),
        }
    }
}
