//! Error types for the memory engine.

use alloc::string::String;
use serde::{Deserialize, Serialize};

use tos_core::{Pid, ValidationError};

/// Errors from memory-engine commands.
///
/// A rejected command leaves engine state unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemError {
    /// Bad field values in a spec
    Validation(ValidationError),
    /// Process or partition table is full
    CapacityExceeded {
        /// The configured limit
        limit: usize,
    },
    /// Command is only permitted before the first `forward_time` call
    SimulationStarted,
    /// No process with the given pid
    UnknownProcess(Pid),
    /// No such component on the process
    UnknownComponent {
        /// Owning process
        pid: Pid,
        /// Offending component index
        component: u32,
    },
    /// No partition with the given index
    UnknownPartition(u32),
    /// Operation not available under the active policy
    NotSupported(String),
    /// No free region or partition can hold the request
    NoFit {
        /// Requested size in bytes
        requested: usize,
    },
    /// Swap-out of a component that is not in main memory
    NotResident,
    /// Swap-in of a component that is not in the backing store
    NotSwapped,
}

impl MemError {
    /// Create a not-supported error.
    pub fn not_supported(what: impl Into<String>) -> Self {
        Self::NotSupported(what.into())
    }

    /// True if this is an allocation failure.
    pub fn is_no_fit(&self) -> bool {
        matches!(self, Self::NoFit { .. })
    }
}

impl From<ValidationError> for MemError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

/// Failures of logical-to-physical address translation.
///
/// Translation is a query; it never mutates engine state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslateError {
    /// No process with the given pid
    UnknownProcess(Pid),
    /// No such segment on the process
    UnknownSegment(u32),
    /// Offset beyond the addressed unit
    OutOfBounds {
        /// The offending logical offset
        offset: usize,
        /// One past the largest valid offset
        limit: usize,
    },
    /// The addressed component is waiting or swapped out
    NotResident,
    /// Address form does not match the active policy (linear vs segmented)
    PolicyMismatch,
}
