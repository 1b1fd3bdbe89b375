//! Validation errors shared by the engines.

use alloc::string::String;
use serde::{Deserialize, Serialize};

/// Rejection of a bad field value at an entity-creation boundary.
///
/// Raised both for interactive commands and when rebuilding state from a
/// saved record; the same rules apply on both paths. A rejected command
/// leaves engine state unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    /// Entity name is empty
    EmptyName,
    /// A duration field is zero where a positive value is required
    ZeroDuration {
        /// Which field was zero
        what: String,
    },
    /// A size field is zero where a positive value is required
    ZeroSize {
        /// Which field was zero
        what: String,
    },
    /// A numeric field is outside its allowed range
    OutOfRange {
        /// Which field was out of range
        what: String,
        /// The offending value
        value: u64,
        /// Largest allowed value
        max: u64,
    },
    /// Fields are individually valid but mutually inconsistent
    /// (e.g. segment sizes not summing to the declared process size)
    Inconsistent {
        /// What did not line up
        reason: String,
    },
}

impl ValidationError {
    /// Create a zero-duration error.
    pub fn zero_duration(what: impl Into<String>) -> Self {
        Self::ZeroDuration { what: what.into() }
    }

    /// Create a zero-size error.
    pub fn zero_size(what: impl Into<String>) -> Self {
        Self::ZeroSize { what: what.into() }
    }

    /// Create an out-of-range error.
    pub fn out_of_range(what: impl Into<String>, value: u64, max: u64) -> Self {
        Self::OutOfRange {
            what: what.into(),
            value,
            max,
        }
    }

    /// Create an inconsistency error.
    pub fn inconsistent(reason: impl Into<String>) -> Self {
        Self::Inconsistent {
            reason: reason.into(),
        }
    }
}
