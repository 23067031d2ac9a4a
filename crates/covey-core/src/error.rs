//! Error taxonomy for coordination operations.
//!
//! The underlying service has a much wider error-code space; everything it
//! can report collapses into this closed set. Codes that are clearly
//! authorization or structural failures map to their variant, everything
//! unrecognized maps to [`CoordinationError::ConnectionLoss`] so callers
//! treat it as retryable.

use snafu::Snafu;

/// Errors surfaced by the coordination session and the primitives above it.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// The session's credentials lack the required permission.
    #[snafu(display("not authorized at '{path}'"))]
    NotAuthorized {
        /// Path the operation targeted.
        path: String,
    },

    /// An entry already exists where the operation tried to create one.
    #[snafu(display("node already exists at '{path}'"))]
    NodeExists {
        /// Path the operation targeted.
        path: String,
    },

    /// The targeted entry does not exist.
    #[snafu(display("no node at '{path}'"))]
    NoNode {
        /// Path the operation targeted.
        path: String,
    },

    /// The targeted entry still has children.
    #[snafu(display("node at '{path}' has children"))]
    NotEmpty {
        /// Path the operation targeted.
        path: String,
    },

    /// The session epoch ended; everything created under it is invalid.
    #[snafu(display("session expired"))]
    SessionExpired,

    /// Connectivity to the service was lost mid-operation.
    #[snafu(display("connection to the coordination service lost"))]
    ConnectionLoss,
}

impl CoordinationError {
    /// True for disruptions that a retry against a fresh session may absorb.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinationError::ConnectionLoss | CoordinationError::SessionExpired
        )
    }

    /// True for namespace-shape failures that retrying will not fix.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CoordinationError::NodeExists { .. }
                | CoordinationError::NoNode { .. }
                | CoordinationError::NotEmpty { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors_are_retryable() {
        assert!(CoordinationError::ConnectionLoss.is_retryable());
        assert!(CoordinationError::SessionExpired.is_retryable());
        assert!(!CoordinationError::NotAuthorized { path: "/a".into() }.is_retryable());
        assert!(!CoordinationError::NoNode { path: "/a".into() }.is_retryable());
    }

    #[test]
    fn structural_errors_are_not_retryable() {
        for err in [
            CoordinationError::NodeExists { path: "/a".into() },
            CoordinationError::NoNode { path: "/a".into() },
            CoordinationError::NotEmpty { path: "/a".into() },
        ] {
            assert!(err.is_structural());
            assert!(!err.is_retryable());
        }
        assert!(!CoordinationError::NotAuthorized { path: "/a".into() }.is_structural());
    }
}
