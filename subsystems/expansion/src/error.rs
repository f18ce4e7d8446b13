//! # Error Types
//!
//! The expansion subsystem keeps one small error surface: two retryable
//! back-pressure refusals and one fatal contract violation. Registry-level
//! failures never escape raw; the engine translates them before they reach a
//! caller.

use core::fmt;

/// Result type for expansion operations
pub type AmeResult<T> = Result<T, AmeError>;

/// Expansion error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmeError {
    /// No rank in the free pool could be acquired right now.
    ///
    /// Retryable back-pressure, not a fault: every free rank was pinned or
    /// contended at scan time.
    NoFreeRank,
    /// The requested grow/shrink cannot proceed right now.
    ///
    /// Retryable back-pressure, not a fault. Callers own retry policy and
    /// must not spin on it.
    Busy,
    /// The caller broke an API precondition.
    ///
    /// Fatal to the calling operation; indicates a bug in the caller, never
    /// a transient condition.
    ContractViolation(&'static str),
}

impl AmeError {
    /// Whether the caller may simply retry later
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoFreeRank | Self::Busy)
    }
}

impl fmt::Display for AmeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFreeRank => write!(f, "No free rank available"),
            Self::Busy => write!(f, "No capacity to grow or shrink"),
            Self::ContractViolation(msg) => write!(f, "Contract violation: {msg}"),
        }
    }
}
