//! Tick OS memory management engine
//!
//! Models the memory teaching module:
//! - An offset-sorted region table covering all of physical memory, with a
//!   permanently reserved OS block at the bottom
//! - Fixed partitions, variable partitions (first/best/worst fit), paging
//!   and segmentation
//! - Swap-out/swap-in through a backing-store queue
//! - Compaction and logical-to-physical address translation
//!
//! Processes arrive on their tick and are placed by the active policy;
//! placements that do not fit are reported once and retried silently.

#![no_std]
extern crate alloc;

mod engine;
mod error;
mod strategy;
mod types;

pub use engine::{MemEngine, MemEvent, MAX_MEM_PROCESSES, MAX_PARTITIONS};
pub use error::{MemError, TranslateError};
pub use strategy::{FitPolicy, MemPolicy};
pub use types::{
    ComponentRef, MemComponent, MemProcess, MemProcessSpec, MemoryUsage, Region, RegionKind,
    Residence, SegmentSpec,
};
