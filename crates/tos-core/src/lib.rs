//! Tick OS simulation core
//!
//! Shared substrate for the teaching engines:
//! - Simulation clock and entity identifiers
//! - Append-only event log (audit trail)
//! - Deep-copy snapshots for rewind-to-start
//! - State records for save/load

#![no_std]
extern crate alloc;

mod error;
mod types;

pub mod event;
pub mod record;
pub mod snapshot;

pub use error::ValidationError;
pub use event::{EventLog, SimEvent};
pub use record::{from_record, to_record, LoadError, SaveError, StateRecord};
pub use snapshot::Snapshot;
pub use types::{Pid, RequestId, Rgb, SimClock, Tick};
