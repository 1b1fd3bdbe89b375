//! Scheduling policies.
//!
//! Pure decision logic: given the ready candidates (and, for preemption, the
//! running process), pick who should hold the CPU. No queues are mutated
//! here; the engine applies the decisions.
//!
//! Ties resolve by lowest pid throughout, so identical inputs always yield
//! identical selections.

use serde::{Deserialize, Serialize};

use tos_core::{Pid, Tick, ValidationError};

use crate::types::Process;

/// The closed set of scheduling policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedPolicy {
    /// First-come first-served, non-preemptive
    Fcfs,
    /// Shortest job first, by remaining time of the current CPU burst
    Sjf {
        /// Preempt the running process when a shorter one becomes ready
        preemptive: bool,
    },
    /// Lowest priority value first
    Priority {
        /// Preempt the running process when a more urgent one becomes ready
        preemptive: bool,
    },
    /// Cyclic dispatch with a fixed time slice
    RoundRobin {
        /// Ticks a process may hold the CPU before forced requeue
        quantum: Tick,
    },
}

impl SchedPolicy {
    /// Check policy parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::RoundRobin { quantum } if *quantum == 0 => {
                Err(ValidationError::zero_duration("quantum"))
            }
            _ => Ok(()),
        }
    }

    /// True if the policy may take the CPU away before a burst drains.
    pub fn is_preemptive(&self) -> bool {
        match self {
            Self::Fcfs => false,
            Self::Sjf { preemptive } | Self::Priority { preemptive } => *preemptive,
            Self::RoundRobin { .. } => true,
        }
    }

    /// The Round-Robin time slice, if this policy has one.
    pub fn quantum(&self) -> Option<Tick> {
        match self {
            Self::RoundRobin { quantum } => Some(*quantum),
            _ => None,
        }
    }

    /// Select the next process to run from the ready candidates.
    pub fn pick_next<'a, I>(&self, ready: I) -> Option<Pid>
    where
        I: Iterator<Item = &'a Process>,
    {
        match self {
            // FCFS and Round-Robin serve in order of entry to the ready
            // queue; a re-queued process goes to the back of the rotation.
            Self::Fcfs | Self::RoundRobin { .. } => {
                ready.min_by_key(|p| (p.ready_since, p.pid)).map(|p| p.pid)
            }
            Self::Sjf { .. } => ready.min_by_key(|p| (p.remaining, p.pid)).map(|p| p.pid),
            Self::Priority { .. } => ready.min_by_key(|p| (p.priority, p.pid)).map(|p| p.pid),
        }
    }

    /// True if `challenger` should take the CPU from `running`.
    ///
    /// Equal keys never preempt; the holder keeps the CPU.
    pub fn preempts(&self, running: &Process, challenger: &Process) -> bool {
        match self {
            Self::Sjf { preemptive: true } => challenger.remaining < running.remaining,
            Self::Priority { preemptive: true } => challenger.priority < running.priority,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Burst, ProcState, ProcessMetrics};
    use alloc::string::ToString;
    use tos_core::Rgb;

    fn ready_proc(pid: u32, ready_since: Tick, remaining: Tick, priority: u8) -> Process {
        Process {
            pid: Pid(pid),
            name: "p".to_string(),
            color: Rgb::palette(pid as usize),
            arrival: 0,
            priority,
            period: None,
            bursts: alloc::vec![Burst::cpu(remaining)],
            state: ProcState::Ready,
            current_burst: 0,
            remaining,
            next_arrival: 0,
            ready_since,
            metrics: ProcessMetrics::default(),
        }
    }

    #[test]
    fn test_pick_next_is_deterministic() {
        let procs = alloc::vec![
            ready_proc(3, 0, 5, 2),
            ready_proc(1, 0, 5, 2),
            ready_proc(2, 0, 5, 2),
        ];
        for policy in [
            SchedPolicy::Fcfs,
            SchedPolicy::Sjf { preemptive: false },
            SchedPolicy::Priority { preemptive: true },
            SchedPolicy::RoundRobin { quantum: 2 },
        ] {
            let first = policy.pick_next(procs.iter());
            let second = policy.pick_next(procs.iter());
            assert_eq!(first, second);
            // all keys tie, so the lowest pid wins
            assert_eq!(first, Some(Pid(1)));
        }
    }

    #[test]
    fn test_sjf_picks_shortest() {
        let procs = alloc::vec![
            ready_proc(1, 0, 9, 0),
            ready_proc(2, 0, 3, 0),
            ready_proc(3, 0, 7, 0),
        ];
        let policy = SchedPolicy::Sjf { preemptive: false };
        assert_eq!(policy.pick_next(procs.iter()), Some(Pid(2)));
    }

    #[test]
    fn test_priority_lower_value_wins() {
        let procs = alloc::vec![ready_proc(1, 0, 5, 4), ready_proc(2, 0, 5, 1)];
        let policy = SchedPolicy::Priority { preemptive: false };
        assert_eq!(policy.pick_next(procs.iter()), Some(Pid(2)));
    }

    #[test]
    fn test_equal_keys_do_not_preempt() {
        let running = ready_proc(1, 0, 4, 2);
        let challenger = ready_proc(2, 1, 4, 2);
        assert!(!SchedPolicy::Sjf { preemptive: true }.preempts(&running, &challenger));
        assert!(!SchedPolicy::Priority { preemptive: true }.preempts(&running, &challenger));
        let shorter = ready_proc(2, 1, 3, 2);
        assert!(SchedPolicy::Sjf { preemptive: true }.preempts(&running, &shorter));
    }

    #[test]
    fn test_zero_quantum_rejected() {
        assert!(SchedPolicy::RoundRobin { quantum: 0 }.validate().is_err());
        assert!(SchedPolicy::RoundRobin { quantum: 1 }.validate().is_ok());
    }
}
