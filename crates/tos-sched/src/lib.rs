//! Tick OS process scheduling engine
//!
//! Models the CPU scheduling teaching module:
//! - Processes as sequences of CPU and IO bursts
//! - Arriving / Ready / Running / Blocked / Finished lifecycle
//! - FCFS, SJF, Priority and Round-Robin policies, with optional preemption
//! - One discrete tick per `forward_time` call
//!
//! The engine owns its queues exclusively and exposes plain commands and
//! state queries; rendering and input handling live elsewhere.

#![no_std]
extern crate alloc;

mod engine;
mod error;
mod strategy;
mod types;

pub use engine::{SchedEngine, SchedEvent, MAX_PROCESSES};
pub use error::SchedError;
pub use strategy::SchedPolicy;
pub use types::{Burst, BurstKind, ProcState, Process, ProcessMetrics, ProcessSpec};
