//! The scheduling engine.
//!
//! Owns the process table and the ready/blocked/finished queues, and advances
//! them one tick per `forward_time` call:
//!
//! 1. Admit due arrivals (gated by the multiprogramming toggle)
//! 2. Drain IO bursts; unblock processes whose IO finished
//! 3. Dispatch: quantum expiry, comparative preemption, fill an idle CPU
//! 4. Execute one CPU tick; handle burst completion
//!
//! A burst that drains during tick `t` completes at `t + 1`; the freed CPU is
//! re-assigned at the dispatch step of the following tick, so completions are
//! always processed before the next pick.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use tos_core::{
    from_record, to_record, EventLog, LoadError, Pid, Rgb, SaveError, SimClock, Snapshot,
    StateRecord, Tick, ValidationError,
};

use crate::error::SchedError;
use crate::strategy::SchedPolicy;
use crate::types::{Burst, BurstKind, ProcState, Process, ProcessMetrics, ProcessSpec};

/// Maximum number of processes one engine instance tracks.
pub const MAX_PROCESSES: usize = 64;

/// Events recorded by the scheduling engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedEvent {
    /// Process moved from Arriving to Ready
    Admitted { pid: Pid },
    /// Process was handed the CPU
    Dispatched { pid: Pid },
    /// Running process was displaced by a more urgent one
    Preempted { pid: Pid, by: Pid },
    /// Round-Robin time slice ran out
    QuantumExpired { pid: Pid },
    /// Process entered an IO burst
    IoStarted { pid: Pid, duration: Tick },
    /// IO burst drained; process is ready again
    IoFinished { pid: Pid },
    /// All bursts drained
    Finished { pid: Pid },
    /// Periodic process scheduled its next arrival
    Rearmed { pid: Pid, next_arrival: Tick },
}

/// The rewindable, serializable state of the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct SchedState {
    clock: SimClock,
    policy: SchedPolicy,
    multiprogramming: bool,
    procs: Vec<Process>,
    ready: VecDeque<Pid>,
    blocked: Vec<Pid>,
    finished: Vec<Pid>,
    running: Option<Pid>,
    quantum_used: Tick,
    next_pid: u32,
}

impl SchedState {
    fn new(policy: SchedPolicy) -> Self {
        Self {
            clock: SimClock::new(),
            policy,
            multiprogramming: true,
            procs: Vec::new(),
            ready: VecDeque::new(),
            blocked: Vec::new(),
            finished: Vec::new(),
            running: None,
            quantum_used: 0,
            next_pid: 1,
        }
    }

    /// Re-check every invariant a loaded record must satisfy.
    fn validate(&self) -> Result<(), ValidationError> {
        self.policy.validate()?;

        for (n, p) in self.procs.iter().enumerate() {
            validate_fields(&p.name, &p.bursts, p.period)?;
            if self.procs[..n].iter().any(|q| q.pid == p.pid) {
                return Err(ValidationError::inconsistent("duplicate pid"));
            }
            if p.pid.0 >= self.next_pid {
                return Err(ValidationError::inconsistent("pid above allocator cursor"));
            }
            match p.state {
                ProcState::Finished => {}
                _ => {
                    let burst = p
                        .bursts
                        .get(p.current_burst)
                        .ok_or_else(|| ValidationError::inconsistent("burst index out of range"))?;
                    if p.remaining == 0 || p.remaining > burst.duration {
                        return Err(ValidationError::inconsistent("remaining outside burst"));
                    }
                }
            }
            let queued = match p.state {
                ProcState::Ready => self.ready.contains(&p.pid),
                ProcState::Blocked => self.blocked.contains(&p.pid),
                ProcState::Finished => self.finished.contains(&p.pid),
                ProcState::Running => self.running == Some(p.pid),
                ProcState::Arriving => true,
            };
            if !queued {
                return Err(ValidationError::inconsistent("state does not match queues"));
            }
        }

        let queue_total = self.ready.len() + self.blocked.len() + self.finished.len();
        let state_total = self
            .procs
            .iter()
            .filter(|p| {
                matches!(
                    p.state,
                    ProcState::Ready | ProcState::Blocked | ProcState::Finished
                )
            })
            .count();
        if queue_total != state_total {
            return Err(ValidationError::inconsistent("queue entry without process"));
        }
        if let Some(pid) = self.running {
            if !self.procs.iter().any(|p| p.pid == pid) {
                return Err(ValidationError::inconsistent("running pid unknown"));
            }
        }
        Ok(())
    }
}

fn validate_fields(
    name: &str,
    bursts: &[Burst],
    period: Option<Tick>,
) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if bursts.is_empty() {
        return Err(ValidationError::inconsistent("process has no bursts"));
    }
    if bursts.iter().any(|b| b.duration == 0) {
        return Err(ValidationError::zero_duration("burst"));
    }
    if period == Some(0) {
        return Err(ValidationError::zero_duration("period"));
    }
    Ok(())
}

fn find(procs: &[Process], pid: Pid) -> Option<usize> {
    procs.iter().position(|p| p.pid == pid)
}

/// The process scheduling engine.
#[derive(Debug)]
pub struct SchedEngine {
    state: SchedState,
    started: bool,
    snapshot: Snapshot<SchedState>,
    log: EventLog<SchedEvent>,
}

impl SchedEngine {
    /// Create an engine with the given policy.
    pub fn new(policy: SchedPolicy) -> Result<Self, SchedError> {
        policy.validate()?;
        Ok(Self {
            state: SchedState::new(policy),
            started: false,
            snapshot: Snapshot::new(),
            log: EventLog::new(),
        })
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Swap the active policy. Only permitted before the simulation starts.
    pub fn set_policy(&mut self, policy: SchedPolicy) -> Result<(), SchedError> {
        self.ensure_not_started()?;
        policy.validate()?;
        self.state.policy = policy;
        Ok(())
    }

    /// Toggle multiprogramming. When off, at most one process may be
    /// admitted (non-finished, non-arriving) at a time.
    pub fn set_multiprogramming(&mut self, enabled: bool) -> Result<(), SchedError> {
        self.ensure_not_started()?;
        self.state.multiprogramming = enabled;
        Ok(())
    }

    /// Create a process. Permitted at any time; a process added mid-run is
    /// discarded again by `rewind`.
    pub fn add_process(&mut self, spec: ProcessSpec) -> Result<Pid, SchedError> {
        validate_fields(&spec.name, &spec.bursts, spec.period)?;
        if self.state.procs.len() >= MAX_PROCESSES {
            return Err(SchedError::CapacityExceeded {
                limit: MAX_PROCESSES,
            });
        }
        let pid = Pid(self.state.next_pid);
        self.state.next_pid += 1;
        let remaining = spec.bursts.first().map(|b| b.duration).unwrap_or(0);
        self.state.procs.push(Process {
            pid,
            name: spec.name,
            color: spec
                .color
                .unwrap_or_else(|| Rgb::palette(pid.0 as usize - 1)),
            arrival: spec.arrival,
            priority: spec.priority,
            period: spec.period,
            bursts: spec.bursts,
            state: ProcState::Arriving,
            current_burst: 0,
            remaining,
            next_arrival: spec.arrival,
            ready_since: 0,
            metrics: ProcessMetrics::default(),
        });
        Ok(pid)
    }

    /// Replace a process's user-editable fields. Only before start.
    pub fn update_process(&mut self, pid: Pid, spec: ProcessSpec) -> Result<(), SchedError> {
        self.ensure_not_started()?;
        validate_fields(&spec.name, &spec.bursts, spec.period)?;
        let i = find(&self.state.procs, pid).ok_or(SchedError::UnknownProcess(pid))?;
        let remaining = spec.bursts.first().map(|b| b.duration).unwrap_or(0);
        let p = &mut self.state.procs[i];
        p.name = spec.name;
        if let Some(color) = spec.color {
            p.color = color;
        }
        p.arrival = spec.arrival;
        p.priority = spec.priority;
        p.period = spec.period;
        p.bursts = spec.bursts;
        p.current_burst = 0;
        p.remaining = remaining;
        p.next_arrival = spec.arrival;
        Ok(())
    }

    /// Destroy a process. Only before start.
    pub fn remove_process(&mut self, pid: Pid) -> Result<(), SchedError> {
        self.ensure_not_started()?;
        let i = find(&self.state.procs, pid).ok_or(SchedError::UnknownProcess(pid))?;
        self.state.procs.remove(i);
        self.state.ready.retain(|q| *q != pid);
        self.state.blocked.retain(|q| *q != pid);
        self.state.finished.retain(|q| *q != pid);
        if self.state.running == Some(pid) {
            self.state.running = None;
        }
        Ok(())
    }

    /// Advance the simulation by one tick.
    ///
    /// The first call arms the rollback snapshot and marks the simulation
    /// started. Returns true when no process has work left now or in the
    /// future.
    pub fn forward_time(&mut self) -> bool {
        if !self.started {
            self.snapshot.arm(&self.state);
            self.started = true;
        }
        let now = self.state.clock.now();

        self.admit_arrivals(now);
        self.tick_io(now);
        self.dispatch(now);
        self.execute(now);
        self.account_waiting();

        self.state.clock.advance();
        self.ended()
    }

    /// Stop the run: restore the state captured at start.
    ///
    /// Returns false if the simulation was never started.
    pub fn rewind(&mut self) -> bool {
        match self.snapshot.restore() {
            Some(saved) => {
                self.state = saved;
                self.started = false;
                true
            }
            None => false,
        }
    }

    /// Destroy all processes and return to tick 0, keeping the policy and
    /// multiprogramming settings.
    pub fn reset(&mut self) {
        let policy = self.state.policy;
        let multiprogramming = self.state.multiprogramming;
        self.state = SchedState::new(policy);
        self.state.multiprogramming = multiprogramming;
        self.snapshot.clear();
        self.log = EventLog::new();
        self.started = false;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current tick.
    pub fn now(&self) -> Tick {
        self.state.clock.now()
    }

    /// True once `forward_time` has been called since creation/rewind/reset.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// The active policy.
    pub fn policy(&self) -> SchedPolicy {
        self.state.policy
    }

    /// The multiprogramming toggle.
    pub fn multiprogramming(&self) -> bool {
        self.state.multiprogramming
    }

    /// True when every process is finished and none can arrive again.
    pub fn ended(&self) -> bool {
        self.state
            .procs
            .iter()
            .all(|p| p.state == ProcState::Finished && p.period.is_none())
    }

    /// The process holding the CPU.
    pub fn running(&self) -> Option<Pid> {
        self.state.running
    }

    /// Ready-queue contents in queue order.
    pub fn ready_ids(&self) -> Vec<Pid> {
        self.state.ready.iter().copied().collect()
    }

    /// Not-yet-admitted processes in creation order.
    pub fn arriving_ids(&self) -> Vec<Pid> {
        self.ids_in_state(ProcState::Arriving)
    }

    /// Blocked processes in blocking order.
    pub fn blocked_ids(&self) -> Vec<Pid> {
        self.state.blocked.clone()
    }

    /// Finished processes in completion order.
    pub fn finished_ids(&self) -> Vec<Pid> {
        self.state.finished.clone()
    }

    /// All processes in creation order.
    pub fn process_ids(&self) -> Vec<Pid> {
        self.state.procs.iter().map(|p| p.pid).collect()
    }

    /// Full process record for display.
    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.state.procs.iter().find(|p| p.pid == pid)
    }

    /// The engine's event log.
    pub fn log(&self) -> &EventLog<SchedEvent> {
        &self.log
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Serialize the engine state into a record tree.
    pub fn to_record(&self) -> Result<StateRecord, SaveError> {
        to_record(&self.state)
    }

    /// Rebuild an engine from a record tree.
    ///
    /// The record is decoded and fully re-validated before an engine is
    /// constructed; any failure leaves nothing half-built. The result is a
    /// not-yet-started engine with an empty log.
    pub fn from_record(record: StateRecord) -> Result<Self, LoadError> {
        let state: SchedState = from_record(record)?;
        state.validate()?;
        Ok(Self {
            state,
            started: false,
            snapshot: Snapshot::new(),
            log: EventLog::new(),
        })
    }

    // ========================================================================
    // Tick phases
    // ========================================================================

    fn ids_in_state(&self, state: ProcState) -> Vec<Pid> {
        self.state
            .procs
            .iter()
            .filter(|p| p.state == state)
            .map(|p| p.pid)
            .collect()
    }

    fn active_count(&self) -> usize {
        self.state.procs.iter().filter(|p| p.is_active()).count()
    }

    fn ensure_not_started(&self) -> Result<(), SchedError> {
        if self.started {
            return Err(SchedError::SimulationStarted);
        }
        Ok(())
    }

    fn admit_arrivals(&mut self, now: Tick) {
        let mut due: Vec<(Tick, Pid)> = self
            .state
            .procs
            .iter()
            .filter(|p| p.state == ProcState::Arriving && p.next_arrival <= now)
            .map(|p| (p.next_arrival, p.pid))
            .collect();
        due.sort();
        for (_, pid) in due {
            if !self.state.multiprogramming && self.active_count() > 0 {
                break;
            }
            if let Some(i) = find(&self.state.procs, pid) {
                let p = &mut self.state.procs[i];
                p.state = ProcState::Ready;
                p.ready_since = now;
                self.state.ready.push_back(pid);
                self.log.push(now, SchedEvent::Admitted { pid });
            }
        }
    }

    fn tick_io(&mut self, now: Tick) {
        let blocked = self.state.blocked.clone();
        for pid in blocked {
            let Some(i) = find(&self.state.procs, pid) else {
                continue;
            };
            let drained = {
                let p = &mut self.state.procs[i];
                p.remaining -= 1;
                p.metrics.io_ticks += 1;
                p.remaining == 0
            };
            if drained {
                self.after_io_burst(i, now);
            }
        }
    }

    fn dispatch(&mut self, now: Tick) {
        // Quantum expiry first, so the displaced process is immediately
        // eligible for re-selection on this same tick. Expiry requeues even
        // a process running alone.
        if let SchedPolicy::RoundRobin { quantum } = self.state.policy {
            if let Some(pid) = self.state.running {
                if self.state.quantum_used >= quantum {
                    self.requeue_running(now);
                    self.log.push(now, SchedEvent::QuantumExpired { pid });
                }
            }
        }

        // Comparative preemption (preemptive SJF / Priority).
        if self.state.policy.is_preemptive() && self.state.running.is_some() {
            let challenger = self.pick_from_ready();
            if let (Some(run_pid), Some(ch_pid)) = (self.state.running, challenger) {
                let should = match (
                    find(&self.state.procs, run_pid),
                    find(&self.state.procs, ch_pid),
                ) {
                    (Some(ri), Some(ci)) => self
                        .state
                        .policy
                        .preempts(&self.state.procs[ri], &self.state.procs[ci]),
                    _ => false,
                };
                if should {
                    self.requeue_running(now);
                    self.log.push(
                        now,
                        SchedEvent::Preempted {
                            pid: run_pid,
                            by: ch_pid,
                        },
                    );
                    self.dispatch_pid(ch_pid, now);
                }
            }
        }

        // Fill an idle CPU.
        if self.state.running.is_none() {
            if let Some(pid) = self.pick_from_ready() {
                self.dispatch_pid(pid, now);
            }
        }
    }

    fn pick_from_ready(&self) -> Option<Pid> {
        let procs = &self.state.procs;
        let candidates = self
            .state
            .ready
            .iter()
            .filter_map(|pid| procs.iter().find(|p| p.pid == *pid));
        self.state.policy.pick_next(candidates)
    }

    fn requeue_running(&mut self, now: Tick) {
        if let Some(pid) = self.state.running.take() {
            if let Some(i) = find(&self.state.procs, pid) {
                let p = &mut self.state.procs[i];
                p.state = ProcState::Ready;
                p.ready_since = now;
                p.metrics.preemptions += 1;
                self.state.ready.push_back(pid);
            }
        }
    }

    fn dispatch_pid(&mut self, pid: Pid, now: Tick) {
        self.state.ready.retain(|q| *q != pid);
        if let Some(i) = find(&self.state.procs, pid) {
            let p = &mut self.state.procs[i];
            p.state = ProcState::Running;
            p.metrics.dispatches += 1;
        }
        self.state.running = Some(pid);
        self.state.quantum_used = 0;
        self.log.push(now, SchedEvent::Dispatched { pid });
    }

    fn execute(&mut self, now: Tick) {
        let Some(pid) = self.state.running else {
            return;
        };
        let Some(i) = find(&self.state.procs, pid) else {
            return;
        };
        let drained = {
            let p = &mut self.state.procs[i];
            p.remaining -= 1;
            p.metrics.cpu_ticks += 1;
            p.remaining == 0
        };
        self.state.quantum_used += 1;
        if drained {
            self.after_cpu_burst(i, now);
        }
    }

    fn after_cpu_burst(&mut self, i: usize, now: Tick) {
        let pid = self.state.procs[i].pid;
        self.state.procs[i].current_burst += 1;
        let next = self.state.procs[i]
            .bursts
            .get(self.state.procs[i].current_burst)
            .copied();
        match next {
            Some(Burst {
                kind: BurstKind::Cpu,
                duration,
            }) => {
                // back-to-back CPU bursts keep the CPU
                self.state.procs[i].remaining = duration;
            }
            Some(Burst {
                kind: BurstKind::Io,
                duration,
            }) => {
                {
                    let p = &mut self.state.procs[i];
                    p.remaining = duration;
                    p.state = ProcState::Blocked;
                }
                self.state.blocked.push(pid);
                self.state.running = None;
                self.log.push(now, SchedEvent::IoStarted { pid, duration });
            }
            None => {
                self.state.running = None;
                self.finish_or_rearm(i, now);
            }
        }
    }

    fn after_io_burst(&mut self, i: usize, now: Tick) {
        let pid = self.state.procs[i].pid;
        self.state.procs[i].current_burst += 1;
        let next = self.state.procs[i]
            .bursts
            .get(self.state.procs[i].current_burst)
            .copied();
        match next {
            Some(Burst {
                kind: BurstKind::Cpu,
                duration,
            }) => {
                self.state.blocked.retain(|q| *q != pid);
                {
                    let p = &mut self.state.procs[i];
                    p.remaining = duration;
                    p.state = ProcState::Ready;
                    p.ready_since = now;
                }
                self.state.ready.push_back(pid);
                self.log.push(now, SchedEvent::IoFinished { pid });
            }
            Some(Burst {
                kind: BurstKind::Io,
                duration,
            }) => {
                // consecutive IO bursts stay on the device queue
                self.state.procs[i].remaining = duration;
            }
            None => {
                self.state.blocked.retain(|q| *q != pid);
                self.finish_or_rearm(i, now);
            }
        }
    }

    fn finish_or_rearm(&mut self, i: usize, now: Tick) {
        let pid = self.state.procs[i].pid;
        if let Some(period) = self.state.procs[i].period {
            let next_arrival = now + 1 + period;
            {
                let p = &mut self.state.procs[i];
                p.current_burst = 0;
                if let Some(first) = p.bursts.first() {
                    p.remaining = first.duration;
                }
                p.next_arrival = next_arrival;
                p.state = ProcState::Arriving;
            }
            self.log.push(now, SchedEvent::Rearmed { pid, next_arrival });
        } else {
            {
                let p = &mut self.state.procs[i];
                p.state = ProcState::Finished;
                p.metrics.finished_at = Some(now + 1);
            }
            self.state.finished.push(pid);
            self.log.push(now, SchedEvent::Finished { pid });
        }
    }

    fn account_waiting(&mut self) {
        for p in self.state.procs.iter_mut() {
            if p.state == ProcState::Ready {
                p.metrics.ready_ticks += 1;
            }
        }
    }
}
