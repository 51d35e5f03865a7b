use serde::Serialize;
use thiserror::Error;

/// Application-level error carried up to `main` (message + process exit code).
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

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let exit_code = match err.kind() {
            FailureKind::Validation => 2,
            _ => 4,
        };
        AppError::new(exit_code, err.to_string())
    }
}

/// Errors produced by the fitting engine.
///
/// `Validation` is a caller bug (shapes, unknown names) and aborts whatever
/// operation saw it. The other three are expected per-spectrum outcomes: the
/// region driver records them against the pixel and moves on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("no usable initial guess: {0}")]
    GuessUnavailable(String),
    #[error("fit did not converge: {0}")]
    ConvergenceFailure(String),
    #[error("degenerate fit: {0}")]
    DegenerateFit(String),
}

impl FitError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            FitError::Validation(_) => FailureKind::Validation,
            FitError::GuessUnavailable(_) => FailureKind::GuessUnavailable,
            FitError::ConvergenceFailure(_) => FailureKind::ConvergenceFailure,
            FitError::DegenerateFit(_) => FailureKind::DegenerateFit,
        }
    }

    /// Whether a batch caller may record this error and continue.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FitError::Validation(_))
    }
}

/// Payload-free discriminant of [`FitError`], used for failure tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    GuessUnavailable,
    ConvergenceFailure,
    DegenerateFit,
}

impl FailureKind {
    pub const RECOVERABLE: [FailureKind; 3] = [
        FailureKind::GuessUnavailable,
        FailureKind::ConvergenceFailure,
        FailureKind::DegenerateFit,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::GuessUnavailable => "guess unavailable",
            FailureKind::ConvergenceFailure => "convergence failure",
            FailureKind::DegenerateFit => "degenerate fit",
        }
    }
}
