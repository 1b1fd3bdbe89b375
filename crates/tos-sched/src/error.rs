//! Error types for the scheduling engine.

use serde::{Deserialize, Serialize};

use tos_core::{Pid, ValidationError};

/// Errors from scheduling-engine commands.
///
/// A rejected command leaves engine state unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedError {
    /// Bad field values in a process spec
    Validation(ValidationError),
    /// Process table is full
    CapacityExceeded {
        /// The configured limit
        limit: usize,
    },
    /// Command is only permitted before the first `forward_time` call
    SimulationStarted,
    /// No process with the given pid
    UnknownProcess(Pid),
}

impl SchedError {
    /// True if this is a validation rejection.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<ValidationError> for SchedError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}
