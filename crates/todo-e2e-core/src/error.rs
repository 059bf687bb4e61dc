use std::fmt;
use std::time::Duration;

use crate::scenario::Phase;

/// Machine-readable error codes for harness failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidTag,
    SutUnavailable,
    SutRejected,
    SutDecodeFailed,
    DriverFailed,
    ConvergenceTimeout,
    AssertionFailed,
    InvalidStateTransition,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::InvalidTag => "E1003",
            Self::SutUnavailable => "E4001",
            Self::SutRejected => "E4002",
            Self::SutDecodeFailed => "E4003",
            Self::DriverFailed => "E4004",
            Self::ConvergenceTimeout => "E5001",
            Self::AssertionFailed => "E6001",
            Self::InvalidStateTransition => "E9002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidTag => "Malformed scope tag",
            Self::SutUnavailable => "TODO service unreachable",
            Self::SutRejected => "TODO service rejected the request",
            Self::SutDecodeFailed => "TODO service returned an unexpected body",
            Self::DriverFailed => "Page driver failed",
            Self::ConvergenceTimeout => "View did not converge in time",
            Self::AssertionFailed => "Expectation did not hold",
            Self::InvalidStateTransition => "Invalid scenario phase transition",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in todo-e2e.toml and retry."),
            Self::InvalidTag => None,
            Self::SutUnavailable => {
                Some("Check that the TODO service is running at the configured base_url.")
            }
            Self::SutRejected | Self::SutDecodeFailed => {
                Some("Verify the service implements GET/POST/DELETE /api/todos.")
            }
            Self::DriverFailed => Some("Navigate the page before interacting with it."),
            Self::ConvergenceTimeout => {
                Some("Raise [wait] timeout_ms or max_attempts if the service is under load.")
            }
            Self::AssertionFailed => {
                Some("Check the leaked items list: non-empty means isolation leakage, not a defect.")
            }
            Self::InvalidStateTransition => Some("Report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failure talking to the system under test, either over HTTP or through a
/// page driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SutError {
    #[error("{operation}: transport error: {message}")]
    Transport { operation: String, message: String },

    #[error("{operation}: unexpected status {status}")]
    Status { operation: String, status: u16 },

    #[error("{operation}: could not decode response: {message}")]
    Decode { operation: String, message: String },

    #[error("driver: {0}")]
    Driver(String),
}

impl SutError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Transport { .. } => ErrorCode::SutUnavailable,
            Self::Status { .. } => ErrorCode::SutRejected,
            Self::Decode { .. } => ErrorCode::SutDecodeFailed,
            Self::Driver(_) => ErrorCode::DriverFailed,
        }
    }
}

/// An expectation that did not hold after convergence.
///
/// `leaked` holds in-scope item texts the failing test did not create
/// itself. A non-empty list points at isolation leakage (residue from an
/// earlier or concurrent run) rather than an application defect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailure {
    pub expectation: String,
    pub expected: String,
    pub actual: String,
    pub leaked: Vec<String>,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, got {}",
            self.expectation, self.expected, self.actual
        )?;
        if !self.leaked.is_empty() {
            write!(f, " (leaked items: {:?})", self.leaked)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Sut(#[from] SutError),

    #[error(
        "{what} did not converge to {expected} within {waited:?} \
         ({attempts} attempts, last observed {observed})"
    )]
    ConvergenceTimeout {
        what: String,
        expected: usize,
        observed: usize,
        attempts: u32,
        waited: Duration,
    },

    #[error("{0}")]
    Assertion(AssertionFailure),

    #[error("invalid phase transition {from:?} -> {to:?}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("invalid scope tag {input:?}: {reason}")]
    InvalidTag { input: String, reason: &'static str },

    #[error("config: {0}")]
    Config(String),
}

impl HarnessError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Sut(err) => err.code(),
            Self::ConvergenceTimeout { .. } => ErrorCode::ConvergenceTimeout,
            Self::Assertion(_) => ErrorCode::AssertionFailed,
            Self::InvalidTransition { .. } => ErrorCode::InvalidStateTransition,
            Self::InvalidTag { .. } => ErrorCode::InvalidTag,
            Self::Config(_) => ErrorCode::ConfigParseError,
        }
    }

    /// Whether this failure is a timing problem rather than a wrong answer.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ConvergenceTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::InvalidTag,
            ErrorCode::SutUnavailable,
            ErrorCode::SutRejected,
            ErrorCode::SutDecodeFailed,
            ErrorCode::DriverFailed,
            ErrorCode::ConvergenceTimeout,
            ErrorCode::AssertionFailed,
            ErrorCode::InvalidStateTransition,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::ConvergenceTimeout.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn timeout_is_distinguishable_from_assertion() {
        let timeout = HarnessError::ConvergenceTimeout {
            what: "scoped items".into(),
            expected: 1,
            observed: 0,
            attempts: 5,
            waited: Duration::from_millis(250),
        };
        let assertion = HarnessError::Assertion(AssertionFailure {
            expectation: "scoped items".into(),
            expected: "1".into(),
            actual: "0".into(),
            leaked: Vec::new(),
        });

        assert!(timeout.is_timeout());
        assert!(!assertion.is_timeout());
        assert_ne!(timeout.code(), assertion.code());
    }

    #[test]
    fn assertion_message_names_leaked_items() {
        let failure = AssertionFailure {
            expectation: "items tagged for chromium/can add".into(),
            expected: "1".into(),
            actual: "2".into(),
            leaked: vec!["TODO for chromium can add zzzz0000".into()],
        };
        let rendered = failure.to_string();
        assert!(rendered.contains("expected 1, got 2"));
        assert!(rendered.contains("zzzz0000"));
    }

    #[test]
    fn sut_error_codes_follow_variant() {
        let err = SutError::Status {
            operation: "DELETE /api/todos".into(),
            status: 500,
        };
        assert_eq!(HarnessError::from(err).code(), ErrorCode::SutRejected);
    }
}
