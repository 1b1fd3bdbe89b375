//! Allocation policies.
//!
//! Pure candidate selection over the free-region set; the engine performs
//! the actual split/merge bookkeeping. Ties resolve to the lowest address.

use core::cmp::Reverse;

use serde::{Deserialize, Serialize};

use tos_core::ValidationError;

/// How to choose among sufficient free candidates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitPolicy {
    /// First sufficient candidate in address order
    FirstFit,
    /// Smallest sufficient candidate
    BestFit,
    /// Largest sufficient candidate
    WorstFit,
}

impl FitPolicy {
    /// Choose a candidate `(start, size)` able to hold `request` bytes.
    ///
    /// Returns the chosen start offset. Candidates may come in any order;
    /// the result only depends on their contents.
    pub fn choose<I>(&self, candidates: I, request: usize) -> Option<usize>
    where
        I: Iterator<Item = (usize, usize)>,
    {
        let mut fitting = candidates.filter(|(_, size)| *size >= request);
        match self {
            Self::FirstFit => fitting.min_by_key(|(start, _)| *start),
            Self::BestFit => fitting.min_by_key(|(start, size)| (*size, *start)),
            Self::WorstFit => fitting.max_by_key(|(start, size)| (*size, Reverse(*start))),
        }
        .map(|(start, _)| start)
    }
}

/// The closed set of memory management policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemPolicy {
    /// User-declared fixed partitions; no splitting
    Fixed {
        /// Partition selection rule
        fit: FitPolicy,
    },
    /// Regions split at allocation and coalesced on free
    Variable {
        /// Hole selection rule
        fit: FitPolicy,
    },
    /// Fixed-size frames; processes split into pages
    Paged {
        /// Frame/page size in bytes
        page_size: usize,
    },
    /// User-declared segments, each placed like a variable sub-request
    Segmented {
        /// Hole selection rule
        fit: FitPolicy,
    },
}

impl MemPolicy {
    /// Check policy parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Paged { page_size } if *page_size == 0 => {
                Err(ValidationError::zero_size("page size"))
            }
            _ => Ok(()),
        }
    }

    /// True if allocations are contiguous per component and freed space is
    /// coalesced (the policies compaction applies to).
    pub fn is_coalescing(&self) -> bool {
        matches!(self, Self::Variable { .. } | Self::Segmented { .. })
    }

    /// True if processes decompose into user-declared segments.
    pub fn is_segmented(&self) -> bool {
        matches!(self, Self::Segmented { .. })
    }
}
