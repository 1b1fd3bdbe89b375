//! Tick OS disk scheduling engine
//!
//! Models the disk teaching module:
//! - Block requests addressed as cylinder x sectors-per-cylinder + sector
//! - FIFO, LIFO, SSTF and the SCAN/C-SCAN/LOOK/C-LOOK sweep family
//! - One served request per tick; seek cost tracked in cylinder units
//!
//! SCAN and C-SCAN travel to the track boundary before reversing or
//! wrapping; LOOK and C-LOOK turn at the last request. The C variants do
//! not serve on the return sweep.

#![no_std]
extern crate alloc;

mod engine;
mod error;
mod strategy;
mod types;

pub use engine::{DiskEngine, DiskEvent, MAX_REQUESTS};
pub use error::DiskError;
pub use strategy::{DiskPolicy, PickOutcome, SweepDirection};
pub use types::{
    BlockRequest, BlockRequestSpec, DiskGeometry, DiskStats, RequestState, ServedRequest,
};
