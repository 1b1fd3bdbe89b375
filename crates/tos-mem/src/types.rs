//! Region, component and process types for the memory engine.

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use tos_core::{Pid, Rgb, Tick};

/// Reference to one placeable component (whole process, page or segment).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentRef {
    /// Owning process
    pub pid: Pid,
    /// Component index within the process
    pub component: u32,
}

/// How a region of physical memory is being used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionKind {
    /// Unoccupied, allocatable space
    Free,
    /// Permanently reserved for the operating system
    Os,
    /// A user-declared fixed partition, occupied or not
    Partition {
        /// Partition number, stable across occupancy changes
        index: u32,
        /// Component currently placed here, if any
        occupant: Option<ComponentRef>,
    },
    /// A dynamically created allocation (variable, page or segment)
    Allocated {
        /// The component placed here
        owner: ComponentRef,
    },
}

/// One contiguous span of physical memory.
///
/// The engine keeps regions offset-sorted, non-overlapping and covering
/// `[0, memory_size)` at all times.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// First byte offset
    pub start: usize,
    /// Span length in bytes
    pub size: usize,
    /// Current use
    pub kind: RegionKind,
}

impl Region {
    /// One-past-the-end offset.
    pub fn end(&self) -> usize {
        self.start + self.size
    }

    /// True if the region may receive an allocation.
    pub fn is_free(&self) -> bool {
        matches!(self.kind, RegionKind::Free)
    }
}

/// Where a component currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Residence {
    /// Not yet placed (process still arriving)
    Waiting,
    /// Placed in main memory at the given base offset
    Resident {
        /// Physical base offset
        base: usize,
    },
    /// Moved out to the backing store
    Swapped,
}

/// A placeable unit of a process's address space.
///
/// Fixed and variable placements use a single component covering the whole
/// process; paging and segmentation decompose the process into several.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemComponent {
    /// Component index within the owning process
    pub index: u32,
    /// Display label ("p3", "p3/2", or the segment name)
    pub label: String,
    /// Logical size in bytes (for pages, the last one may be partial)
    pub size: usize,
    /// Current placement
    pub residence: Residence,
}

impl MemComponent {
    /// Physical base offset, if resident.
    pub fn base(&self) -> Option<usize> {
        match self.residence {
            Residence::Resident { base } => Some(base),
            _ => None,
        }
    }
}

/// A user-declared segment of a process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpec {
    /// Segment name
    pub name: String,
    /// Segment size in bytes
    pub size: usize,
}

/// User-supplied fields for creating or editing a memory process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemProcessSpec {
    /// Display name
    pub name: String,
    /// Display color; `None` picks the next palette color
    pub color: Option<Rgb>,
    /// Tick at which the process arrives
    pub arrival: Tick,
    /// Declared total size in bytes
    pub size: usize,
    /// Segment decomposition; required under segmentation, rejected otherwise
    pub segments: Vec<SegmentSpec>,
}

impl Default for MemProcessSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            color: None,
            arrival: 0,
            size: 0,
            segments: Vec::new(),
        }
    }
}

/// A process tracked by the memory engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemProcess {
    /// Process ID
    pub pid: Pid,
    /// Display name
    pub name: String,
    /// Display color
    pub color: Rgb,
    /// Arrival tick
    pub arrival: Tick,
    /// Declared total size in bytes
    pub size: usize,
    /// Declared segment decomposition (empty unless segmentation is active)
    pub segments: Vec<SegmentSpec>,
    /// Placeable components; sizes sum to `size`
    pub components: Vec<MemComponent>,
}

impl MemProcess {
    /// True once every component has been placed at least once.
    pub fn is_admitted(&self) -> bool {
        self.components
            .iter()
            .all(|c| c.residence != Residence::Waiting)
    }

    /// True if every component is currently in main memory.
    pub fn is_fully_resident(&self) -> bool {
        self.components
            .iter()
            .all(|c| matches!(c.residence, Residence::Resident { .. }))
    }
}

/// Aggregate memory statistics for display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Bytes reserved for the OS
    pub os_bytes: usize,
    /// Bytes inside occupied partitions and allocations
    pub used_bytes: usize,
    /// Bytes in free regions (and unoccupied partitions)
    pub free_bytes: usize,
    /// Number of distinct free regions (external fragmentation indicator)
    pub free_fragments: usize,
    /// Components currently in main memory
    pub resident_components: usize,
    /// Components currently in the backing store
    pub swapped_components: usize,
    /// Bytes allocated but unusable (partition slack, partial last pages)
    pub internal_fragmentation: usize,
}
