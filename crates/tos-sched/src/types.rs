//! Process and burst types.

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use tos_core::{Pid, Rgb, Tick};

/// Kind of demand a burst places on the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BurstKind {
    /// Needs the CPU
    Cpu,
    /// Waits on an IO device
    Io,
}

/// One contiguous span of CPU or IO demand within a process's lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Burst {
    /// What the process is doing during this span
    pub kind: BurstKind,
    /// Length of the span in ticks
    pub duration: Tick,
}

impl Burst {
    /// A CPU burst of the given length.
    pub const fn cpu(duration: Tick) -> Self {
        Self {
            kind: BurstKind::Cpu,
            duration,
        }
    }

    /// An IO burst of the given length.
    pub const fn io(duration: Tick) -> Self {
        Self {
            kind: BurstKind::Io,
            duration,
        }
    }
}

/// Lifecycle state of a simulated process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcState {
    /// Not yet admitted; waiting for its arrival tick
    Arriving,
    /// Admitted and waiting for the CPU
    Ready,
    /// Holding the CPU
    Running,
    /// Waiting for an IO burst to drain
    Blocked,
    /// All bursts completed
    Finished,
}

/// Per-process counters maintained by the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMetrics {
    /// Ticks spent holding the CPU
    pub cpu_ticks: Tick,
    /// Ticks spent blocked on IO
    pub io_ticks: Tick,
    /// Ticks spent waiting in the ready queue
    pub ready_ticks: Tick,
    /// Times the process was handed the CPU
    pub dispatches: u32,
    /// Times the process lost the CPU before finishing a burst
    pub preemptions: u32,
    /// Tick at which the last burst drained (one-shot processes only)
    pub finished_at: Option<Tick>,
}

/// User-supplied fields for creating or editing a process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Display name
    pub name: String,
    /// Display color; `None` picks the next palette color
    pub color: Option<Rgb>,
    /// Tick at which the process first arrives
    pub arrival: Tick,
    /// Scheduling priority; lower value means more urgent
    pub priority: u8,
    /// Re-arrival delay for periodic processes; `None` = one-shot
    pub period: Option<Tick>,
    /// Burst sequence, executed in order
    pub bursts: Vec<Burst>,
}

impl Default for ProcessSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            color: None,
            arrival: 0,
            priority: 0,
            period: None,
            bursts: Vec::new(),
        }
    }
}

/// A simulated process, owned exclusively by the scheduling engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Process {
    /// Process ID
    pub pid: Pid,
    /// Display name
    pub name: String,
    /// Display color
    pub color: Rgb,
    /// Declared arrival tick (first arrival for periodic processes)
    pub arrival: Tick,
    /// Scheduling priority; lower value means more urgent
    pub priority: u8,
    /// Re-arrival delay for periodic processes
    pub period: Option<Tick>,
    /// Burst sequence
    pub bursts: Vec<Burst>,
    /// Current lifecycle state
    pub state: ProcState,
    /// Index of the burst currently draining
    pub current_burst: usize,
    /// Ticks left in the current burst
    pub remaining: Tick,
    /// Next effective arrival tick (advances for periodic processes)
    pub next_arrival: Tick,
    /// Tick at which the process last entered the ready queue
    pub ready_since: Tick,
    /// Accumulated counters
    pub metrics: ProcessMetrics,
}

impl Process {
    /// The burst currently draining, if any remain.
    pub fn active_burst(&self) -> Option<&Burst> {
        self.bursts.get(self.current_burst)
    }

    /// True if the process has been admitted and has work left.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ProcState::Ready | ProcState::Running | ProcState::Blocked
        )
    }
}
