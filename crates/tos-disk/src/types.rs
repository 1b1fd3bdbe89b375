//! Request and geometry types for the disk engine.

use serde::{Deserialize, Serialize};

use tos_core::{RequestId, Rgb, Tick};

/// Disk shape: cylinders and sectors per cylinder.
///
/// A block index is `cylinder * sectors + sector`; seek costs are measured
/// in whole cylinders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskGeometry {
    /// Number of cylinders
    pub cylinders: u32,
    /// Sectors per cylinder
    pub sectors: u32,
}

impl DiskGeometry {
    /// Total number of addressable blocks.
    pub fn block_count(&self) -> u32 {
        self.cylinders * self.sectors
    }

    /// Largest cylinder index; the SCAN boundary.
    pub fn max_cylinder(&self) -> u32 {
        self.cylinders - 1
    }

    /// The cylinder holding a block.
    pub fn cylinder_of(&self, block: u32) -> u32 {
        block / self.sectors
    }

    /// Linear block index of a (cylinder, sector) pair.
    pub fn block_of(&self, cylinder: u32, sector: u32) -> u32 {
        cylinder * self.sectors + sector
    }
}

/// Lifecycle of a block request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    /// Waiting to be served
    Pending,
    /// Served; see the served list for its statistics
    Served,
}

/// User-supplied fields for creating or editing a block request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequestSpec {
    /// Target cylinder
    pub cylinder: u32,
    /// Target sector within the cylinder
    pub sector: u32,
    /// Tick at which the request becomes servable
    pub arrival: Tick,
    /// Display color; `None` picks the next palette color
    pub color: Option<Rgb>,
}

/// A block request tracked by the disk engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequest {
    /// Request ID
    pub id: RequestId,
    /// Target block index
    pub block: u32,
    /// Tick at which the request becomes servable
    pub arrival: Tick,
    /// Display color
    pub color: Rgb,
    /// Current state
    pub state: RequestState,
}

/// Service statistics recorded when a request is served.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServedRequest {
    /// The served request
    pub id: RequestId,
    /// 1-based service order
    pub order: u32,
    /// Cylinders traveled to reach this request, boundary legs included
    pub movement: u32,
    /// Running total of cylinders traveled
    pub cumulative: u32,
}

/// Aggregate disk statistics for display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStats {
    /// Requests served so far
    pub serves: u32,
    /// Total cylinders traveled
    pub total_movement: u32,
}
