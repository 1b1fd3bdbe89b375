//! Error types for the disk engine.

use serde::{Deserialize, Serialize};

use tos_core::{RequestId, ValidationError};

/// Errors from disk-engine commands.
///
/// A rejected command leaves engine state unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskError {
    /// Bad field values in a request spec
    Validation(ValidationError),
    /// Request table is full
    CapacityExceeded {
        /// The configured limit
        limit: usize,
    },
    /// Command is only permitted before the first `forward_time` call
    SimulationStarted,
    /// No request with the given id
    UnknownRequest(RequestId),
}

impl DiskError {
    /// True if this is a validation rejection.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<ValidationError> for DiskError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}
