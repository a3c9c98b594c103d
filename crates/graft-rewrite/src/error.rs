//! Error types for pattern compilation and rewriting.

use thiserror::Error;

/// Result type for rewrite operations.
pub type Result<T> = std::result::Result<T, RewriteError>;

/// Errors that can occur while compiling patterns or rewriting a graph.
///
/// A candidate rejected by a pass's `matches` predicate is not an error; the
/// matcher simply moves on to the next anchor.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("Malformed pattern in pass '{pass}' (line {line}): {reason}")]
    MalformedPattern {
        pass: String,
        line: usize,
        reason: String,
    },

    #[error("Pass '{pass}' broke graph invariants rewriting [{}]: {reason}", operators.join(", "))]
    InternalInvariantViolation {
        pass: String,
        operators: Vec<String>,
        reason: String,
    },

    #[error("No fixed point reached after {sweeps} sweeps")]
    FixedPointNotReached { sweeps: usize },

    #[error("Pass '{pass}' failed: {source}")]
    PassFailed {
        pass: String,
        #[source]
        source: graft_core::Error,
    },

    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    #[error("Graph error: {0}")]
    Core(#[from] graft_core::Error),
}

impl RewriteError {
    /// Whether this error reports a defect in a pass definition rather than
    /// a property of the input graph.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            RewriteError::InternalInvariantViolation { .. }
                | RewriteError::FixedPointNotReached { .. }
        )
    }
}
