//! State records.
//!
//! Engine state is exchanged with persistence collaborators as a nested
//! key/value tree (`serde_json::Value`). The on-disk format is the
//! collaborator's concern; the engines only guarantee that
//! `to_record` / `from_record` round-trip state bit-for-bit (same queue
//! order, same remaining times) and that malformed records surface as a
//! single typed error with no partially-applied state.

use alloc::string::{String, ToString};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ValidationError;

/// Nested key/value record tree holding serialized engine state.
pub type StateRecord = serde_json::Value;

/// Failure to encode engine state into a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveError {
    /// State could not be encoded
    Encode {
        /// Decoder-reported detail
        detail: String,
    },
}

/// Failure to rebuild engine state from a record.
///
/// Loading is atomic: a fresh engine is built from the record and validated
/// before anything is swapped in, so any of these errors leaves the live
/// state untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadError {
    /// Record did not decode into the expected state shape
    Malformed {
        /// Decoder-reported detail
        detail: String,
    },
    /// Record decoded but failed the same validation applied to
    /// interactively created entities
    Invalid(ValidationError),
    /// Record names a teaching module this build does not know
    UnknownModule {
        /// The unrecognized module tag
        found: String,
    },
}

impl LoadError {
    /// Create a malformed-record error.
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::Malformed {
            detail: detail.into(),
        }
    }

    /// True if the record failed to decode at all.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

impl From<ValidationError> for LoadError {
    fn from(err: ValidationError) -> Self {
        Self::Invalid(err)
    }
}

/// Encode a state value into a record tree.
pub fn to_record<T: Serialize>(state: &T) -> Result<StateRecord, SaveError> {
    serde_json::to_value(state).map_err(|e| SaveError::Encode {
        detail: e.to_string(),
    })
}

/// Decode a state value out of a record tree.
///
/// Shape errors only; semantic validation is the caller's job.
pub fn from_record<T: DeserializeOwned>(record: StateRecord) -> Result<T, LoadError> {
    serde_json::from_value(record).map_err(|e| LoadError::malformed(e.to_string()))
}
