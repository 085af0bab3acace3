//! Compiler error kinds.
//!
//! Per the error handling policy: `Unsupported` is the only error kind
//! that escapes to callers as a typed `Result`. `EstimateOnly` and
//! `AllocationFailure` are modeled as values (an `EstimateOnly` op, and a
//! `None`/`Err` return from the SRAM/DRAM allocators respectively) and are
//! handled locally by pruning the search space; they never become a
//! `CompileError`. Invariant violations panic via `invariant!` rather than
//! returning a `Result` — they indicate a programming error, not a user
//! mistake.

use std::fmt;

/// Top-level compiler error.
#[derive(thiserror::Error, Debug, Clone)]
pub enum CompileError {
    /// The graph contains an operator/shape combination with no surviving
    /// plan. Raised from metadata construction when a non-terminal part
    /// ends with no compatible plans, or from the combiner driver
    /// when no combination survives to completion.
    #[error("unsupported graph: {reason}")]
    Unsupported {
        reason: String,
        operation_ids: Vec<u32>,
    },
}

pub type Result<T> = std::result::Result<T, CompileError>;

impl CompileError {
    pub fn unsupported(reason: impl Into<String>, operation_ids: impl Into<Vec<u32>>) -> Self {
        CompileError::Unsupported {
            reason: reason.into(),
            operation_ids: operation_ids.into(),
        }
    }
}

/// Where an invariant was violated, captured via `#[track_caller]`.
#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

impl From<&'static std::panic::Location<'static>> for Location {
    fn from(l: &'static std::panic::Location<'static>) -> Self {
        Location {
            file: l.file(),
            line: l.line(),
            column: l.column(),
        }
    }
}

/// Fail fast on a programming-error invariant violation. Never caught.
#[track_caller]
pub fn invariant(condition: bool, message: impl fmt::Display) {
    if !condition {
        let loc = Location::from(std::panic::Location::caller());
        panic!("invariant violation at {loc}: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_carries_operation_ids() {
        let e = CompileError::unsupported("no plan for Transpose", vec![3, 7]);
        match e {
            CompileError::Unsupported {
                reason,
                operation_ids,
            } => {
                assert_eq!(reason, "no plan for Transpose");
                assert_eq!(operation_ids, vec![3, 7]);
            }
        }
    }

    #[test]
    #[should_panic(expected = "invariant violation")]
    fn invariant_panics_on_false() {
        invariant(false, "op must have at least one input");
    }

    #[test]
    fn invariant_is_silent_on_true() {
        invariant(true, "unreachable");
    }
}
