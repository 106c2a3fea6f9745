//! Error types for targeted estimation

use thiserror::Error;

/// Estimation error type.
///
/// The four causal-unit variants (`PositivityViolation`, `ConvergenceFailure`,
/// `InvalidQuery`, `DimensionMismatch`) are scoped to a single
/// (target, query) computation and end up in that cell of a report matrix.
/// `Clone` lets a shared failure (for example a treatment-mechanism fit) be
/// recorded in every cell it affects.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Input contract violation (shapes, types, configuration)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Numerical failure outside the fluctuation step
    #[error("Computation error: {0}")]
    Computation(String),

    /// A learner rejected its input or failed to fit/predict
    #[error("Learner error: {0}")]
    Learner(String),

    /// A queried treatment combination is absent from the observed data
    #[error("Positivity violation: {0}")]
    PositivityViolation(String),

    /// The fluctuation sub-model fit did not converge
    #[error("Convergence failure: {0}")]
    ConvergenceFailure(String),

    /// Case equals control, or the query references undeclared treatments/levels
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Two influence curves computed over different observation counts
    #[error("Dimension mismatch: {left} vs {right} observations")]
    DimensionMismatch {
        /// Observation count of the left operand.
        left: usize,
        /// Observation count of the right operand.
        right: usize,
    },
}

impl Error {
    /// Short machine-readable tag for the error variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Computation(_) => "computation",
            Error::Learner(_) => "learner",
            Error::PositivityViolation(_) => "positivity_violation",
            Error::ConvergenceFailure(_) => "convergence_failure",
            Error::InvalidQuery(_) => "invalid_query",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_payload() {
        let e = Error::PositivityViolation("t=a never observed".into());
        assert_eq!(e.to_string(), "Positivity violation: t=a never observed");
        let e = Error::DimensionMismatch { left: 10, right: 12 };
        assert_eq!(e.to_string(), "Dimension mismatch: 10 vs 12 observations");
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(Error::ConvergenceFailure(String::new()).kind(), "convergence_failure");
        assert_eq!(Error::InvalidQuery(String::new()).kind(), "invalid_query");
    }
}
