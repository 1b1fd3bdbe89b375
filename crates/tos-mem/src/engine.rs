//! The memory management engine.
//!
//! Owns the region table, the process table and the backing-store queue.
//! Each `forward_time` tick attempts to place every process whose arrival is
//! due; a process that does not fit stays arriving, is reported once, and is
//! retried silently on later ticks. Swap and compaction are explicit
//! commands issued by the driver between ticks.

use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use tos_core::{
    from_record, to_record, EventLog, LoadError, Pid, Rgb, SaveError, SimClock, Snapshot,
    StateRecord, Tick, ValidationError,
};

use crate::error::{MemError, TranslateError};
use crate::strategy::{FitPolicy, MemPolicy};
use crate::types::{
    ComponentRef, MemComponent, MemProcess, MemProcessSpec, MemoryUsage, Region, RegionKind,
    Residence, SegmentSpec,
};

/// Maximum number of processes one engine instance tracks.
pub const MAX_MEM_PROCESSES: usize = 32;

/// Maximum number of fixed partitions.
pub const MAX_PARTITIONS: usize = 16;

/// Events recorded by the memory engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemEvent {
    /// Every component of the process was placed
    Admitted { pid: Pid },
    /// One component landed at a base offset
    ComponentPlaced { who: ComponentRef, base: usize },
    /// Admission failed for lack of space (reported once per condition)
    AllocationFailed { pid: Pid },
    /// Swap-in failed for lack of space (reported once per condition)
    SwapInFailed { who: ComponentRef },
    /// Process removed; its regions were freed
    Deallocated { pid: Pid },
    /// Component moved to the backing store
    SwappedOut { who: ComponentRef },
    /// Component returned to main memory
    SwappedIn { who: ComponentRef, base: usize },
    /// Occupied regions were packed downwards
    Compacted { moved: usize },
}

/// The rewindable, serializable state of the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct MemState {
    clock: SimClock,
    policy: MemPolicy,
    memory_size: usize,
    os_size: usize,
    regions: Vec<Region>,
    procs: Vec<MemProcess>,
    backing: VecDeque<ComponentRef>,
    failed_admissions: Vec<Pid>,
    failed_swapins: Vec<ComponentRef>,
    next_pid: u32,
    next_partition: u32,
}

impl MemState {
    fn new(policy: MemPolicy, memory_size: usize, os_size: usize) -> Self {
        let mut regions = Vec::new();
        regions.push(Region {
            start: 0,
            size: os_size,
            kind: RegionKind::Os,
        });
        if os_size < memory_size {
            regions.push(Region {
                start: os_size,
                size: memory_size - os_size,
                kind: RegionKind::Free,
            });
        }
        Self {
            clock: SimClock::new(),
            policy,
            memory_size,
            os_size,
            regions,
            procs: Vec::new(),
            backing: VecDeque::new(),
            failed_admissions: Vec::new(),
            failed_swapins: Vec::new(),
            next_pid: 1,
            next_partition: 1,
        }
    }

    fn proc_index(&self, pid: Pid) -> Option<usize> {
        self.procs.iter().position(|p| p.pid == pid)
    }

    /// Bytes a component occupies when placed (frames are full pages).
    fn alloc_size(&self, component: &MemComponent) -> usize {
        match self.policy {
            MemPolicy::Paged { page_size } => page_size,
            _ => component.size,
        }
    }

    /// Re-check every invariant a loaded record must satisfy.
    fn validate(&self) -> Result<(), ValidationError> {
        self.policy.validate()?;
        if self.memory_size == 0 {
            return Err(ValidationError::zero_size("memory"));
        }
        if self.os_size == 0 || self.os_size >= self.memory_size {
            return Err(ValidationError::out_of_range(
                "os block",
                self.os_size as u64,
                self.memory_size as u64,
            ));
        }

        // region table: sorted, gapless, covering all of memory
        let mut cursor = 0usize;
        for r in &self.regions {
            if r.start != cursor || r.size == 0 {
                return Err(ValidationError::inconsistent("region table has gaps"));
            }
            cursor = r.end();
        }
        if cursor != self.memory_size {
            return Err(ValidationError::inconsistent(
                "region table does not cover memory",
            ));
        }
        match self.regions.first() {
            Some(r) if r.kind == RegionKind::Os && r.size == self.os_size => {}
            _ => return Err(ValidationError::inconsistent("missing os block")),
        }
        if self.regions[1..].iter().any(|r| r.kind == RegionKind::Os) {
            return Err(ValidationError::inconsistent("stray os region"));
        }

        for (n, p) in self.procs.iter().enumerate() {
            validate_fields(&self.policy, &p.name, p.size, &p.segments)?;
            if self.procs[..n].iter().any(|q| q.pid == p.pid) {
                return Err(ValidationError::inconsistent("duplicate pid"));
            }
            if p.pid.0 >= self.next_pid {
                return Err(ValidationError::inconsistent("pid above allocator cursor"));
            }
            let total: usize = p.components.iter().map(|c| c.size).sum();
            if p.components.is_empty() || total != p.size {
                return Err(ValidationError::inconsistent(
                    "component sizes do not sum to process size",
                ));
            }
            for c in &p.components {
                let who = ComponentRef {
                    pid: p.pid,
                    component: c.index,
                };
                let placed = self
                    .regions
                    .iter()
                    .filter(|r| match r.kind {
                        RegionKind::Allocated { owner } => owner == who,
                        RegionKind::Partition { occupant, .. } => occupant == Some(who),
                        _ => false,
                    })
                    .count();
                let swapped = self.backing.iter().filter(|b| **b == who).count();
                match c.residence {
                    Residence::Resident { base } => {
                        if placed != 1 || swapped != 0 {
                            return Err(ValidationError::inconsistent(
                                "resident component not placed exactly once",
                            ));
                        }
                        let ok = self.regions.iter().any(|r| match r.kind {
                            RegionKind::Allocated { owner } => {
                                owner == who && r.start == base && r.size == self.alloc_size(c)
                            }
                            RegionKind::Partition { occupant, .. } => {
                                occupant == Some(who) && r.start == base && r.size >= c.size
                            }
                            _ => false,
                        });
                        if !ok {
                            return Err(ValidationError::inconsistent(
                                "component base disagrees with region table",
                            ));
                        }
                    }
                    Residence::Swapped => {
                        if placed != 0 || swapped != 1 {
                            return Err(ValidationError::inconsistent(
                                "swapped component not queued exactly once",
                            ));
                        }
                    }
                    Residence::Waiting => {
                        if placed != 0 || swapped != 0 {
                            return Err(ValidationError::inconsistent(
                                "waiting component holds resources",
                            ));
                        }
                    }
                }
            }
        }

        // every occupant/owner must resolve to a live component
        for r in &self.regions {
            let who = match r.kind {
                RegionKind::Allocated { owner } => Some(owner),
                RegionKind::Partition {
                    occupant: Some(occ),
                    ..
                } => Some(occ),
                _ => None,
            };
            if let Some(who) = who {
                let known = self.proc_index(who.pid).is_some_and(|i| {
                    self.procs[i]
                        .components
                        .iter()
                        .any(|c| c.index == who.component)
                });
                if !known {
                    return Err(ValidationError::inconsistent("region owned by no process"));
                }
            }
            if let RegionKind::Partition { index, .. } = r.kind {
                if index >= self.next_partition {
                    return Err(ValidationError::inconsistent(
                        "partition above allocator cursor",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn validate_fields(
    policy: &MemPolicy,
    name: &str,
    size: usize,
    segments: &[SegmentSpec],
) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if size == 0 {
        return Err(ValidationError::zero_size("process"));
    }
    if policy.is_segmented() {
        if segments.is_empty() {
            return Err(ValidationError::inconsistent(
                "segmentation requires at least one segment",
            ));
        }
        if segments.iter().any(|s| s.name.is_empty()) {
            return Err(ValidationError::EmptyName);
        }
        if segments.iter().any(|s| s.size == 0) {
            return Err(ValidationError::zero_size("segment"));
        }
        let total: usize = segments.iter().map(|s| s.size).sum();
        if total != size {
            return Err(ValidationError::inconsistent(
                "segment sizes do not sum to process size",
            ));
        }
    } else if !segments.is_empty() {
        return Err(ValidationError::inconsistent(
            "segments only apply under segmentation",
        ));
    }
    Ok(())
}

fn build_components(policy: &MemPolicy, name: &str, size: usize, segments: &[SegmentSpec]) -> Vec<MemComponent> {
    match policy {
        MemPolicy::Paged { page_size } => {
            let pages = size.div_ceil(*page_size);
            (0..pages)
                .map(|i| MemComponent {
                    index: i as u32,
                    label: format!("{}/{}", name, i),
                    size: (size - i * page_size).min(*page_size),
                    residence: Residence::Waiting,
                })
                .collect()
        }
        MemPolicy::Segmented { .. } => segments
            .iter()
            .enumerate()
            .map(|(i, s)| MemComponent {
                index: i as u32,
                label: s.name.clone(),
                size: s.size,
                residence: Residence::Waiting,
            })
            .collect(),
        _ => {
            let mut comps = Vec::new();
            comps.push(MemComponent {
                index: 0,
                label: String::from(name),
                size,
                residence: Residence::Waiting,
            });
            comps
        }
    }
}

/// The memory management engine.
#[derive(Debug)]
pub struct MemEngine {
    state: MemState,
    started: bool,
    snapshot: Snapshot<MemState>,
    log: EventLog<MemEvent>,
}

impl MemEngine {
    /// Create an engine managing `memory_size` bytes with the bottom
    /// `os_size` bytes permanently reserved.
    pub fn new(policy: MemPolicy, memory_size: usize, os_size: usize) -> Result<Self, MemError> {
        policy.validate()?;
        if memory_size == 0 {
            return Err(ValidationError::zero_size("memory").into());
        }
        if os_size == 0 || os_size >= memory_size {
            return Err(ValidationError::out_of_range(
                "os block",
                os_size as u64,
                memory_size as u64,
            )
            .into());
        }
        Ok(Self {
            state: MemState::new(policy, memory_size, os_size),
            started: false,
            snapshot: Snapshot::new(),
            log: EventLog::new(),
        })
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Swap the active policy. Only before start.
    ///
    /// Partitions belong to the fixed scheme and are discarded on a switch;
    /// process decompositions are re-derived for the new policy.
    pub fn set_policy(&mut self, policy: MemPolicy) -> Result<(), MemError> {
        self.ensure_not_started()?;
        policy.validate()?;
        for p in &self.state.procs {
            validate_fields(&policy, &p.name, p.size, &p.segments)?;
        }
        self.state.policy = policy;
        self.state.regions = MemState::new(policy, self.state.memory_size, self.state.os_size).regions;
        self.state.next_partition = 1;
        for p in self.state.procs.iter_mut() {
            p.components = build_components(&policy, &p.name, p.size, &p.segments);
        }
        Ok(())
    }

    /// Declare a fixed partition of `size` bytes. Fixed policy only, before
    /// start; placed into the first free region that can hold it.
    pub fn add_partition(&mut self, size: usize) -> Result<u32, MemError> {
        self.ensure_not_started()?;
        if !matches!(self.state.policy, MemPolicy::Fixed { .. }) {
            return Err(MemError::not_supported(
                "partitions only exist under fixed partitioning",
            ));
        }
        if size == 0 {
            return Err(ValidationError::zero_size("partition").into());
        }
        let count = self
            .state
            .regions
            .iter()
            .filter(|r| matches!(r.kind, RegionKind::Partition { .. }))
            .count();
        if count >= MAX_PARTITIONS {
            return Err(MemError::CapacityExceeded {
                limit: MAX_PARTITIONS,
            });
        }
        let start = FitPolicy::FirstFit
            .choose(self.free_candidates(), size)
            .ok_or(MemError::NoFit { requested: size })?;
        let index = self.state.next_partition;
        self.state.next_partition += 1;
        self.carve(
            start,
            size,
            RegionKind::Partition {
                index,
                occupant: None,
            },
        );
        Ok(index)
    }

    /// Drop an unoccupied partition, returning its span to free space.
    pub fn remove_partition(&mut self, index: u32) -> Result<(), MemError> {
        self.ensure_not_started()?;
        let pos = self
            .state
            .regions
            .iter()
            .position(|r| matches!(r.kind, RegionKind::Partition { index: i, .. } if i == index))
            .ok_or(MemError::UnknownPartition(index))?;
        if let RegionKind::Partition {
            occupant: Some(_), ..
        } = self.state.regions[pos].kind
        {
            return Err(MemError::not_supported("partition is occupied"));
        }
        self.state.regions[pos].kind = RegionKind::Free;
        self.coalesce();
        Ok(())
    }

    /// Create a process. Permitted at any time; additions made mid-run are
    /// discarded again by `rewind`.
    pub fn add_process(&mut self, spec: MemProcessSpec) -> Result<Pid, MemError> {
        validate_fields(&self.state.policy, &spec.name, spec.size, &spec.segments)?;
        if self.state.procs.len() >= MAX_MEM_PROCESSES {
            return Err(MemError::CapacityExceeded {
                limit: MAX_MEM_PROCESSES,
            });
        }
        let pid = Pid(self.state.next_pid);
        self.state.next_pid += 1;
        let components = build_components(&self.state.policy, &spec.name, spec.size, &spec.segments);
        self.state.procs.push(MemProcess {
            pid,
            name: spec.name,
            color: spec
                .color
                .unwrap_or_else(|| Rgb::palette(pid.0 as usize - 1)),
            arrival: spec.arrival,
            size: spec.size,
            segments: spec.segments,
            components,
        });
        Ok(pid)
    }

    /// Replace a process's user-editable fields. Only before start.
    pub fn update_process(&mut self, pid: Pid, spec: MemProcessSpec) -> Result<(), MemError> {
        self.ensure_not_started()?;
        validate_fields(&self.state.policy, &spec.name, spec.size, &spec.segments)?;
        let i = self
            .state
            .proc_index(pid)
            .ok_or(MemError::UnknownProcess(pid))?;
        let components = build_components(&self.state.policy, &spec.name, spec.size, &spec.segments);
        let p = &mut self.state.procs[i];
        p.name = spec.name;
        if let Some(color) = spec.color {
            p.color = color;
        }
        p.arrival = spec.arrival;
        p.size = spec.size;
        p.segments = spec.segments;
        p.components = components;
        Ok(())
    }

    /// Destroy a process, freeing whatever it occupies.
    pub fn remove_process(&mut self, pid: Pid) -> Result<(), MemError> {
        let i = self
            .state
            .proc_index(pid)
            .ok_or(MemError::UnknownProcess(pid))?;
        let refs: Vec<ComponentRef> = self.state.procs[i]
            .components
            .iter()
            .map(|c| ComponentRef {
                pid,
                component: c.index,
            })
            .collect();
        for who in &refs {
            self.release(*who);
        }
        self.state.backing.retain(|b| b.pid != pid);
        self.state.failed_admissions.retain(|f| *f != pid);
        self.state.failed_swapins.retain(|f| f.pid != pid);
        self.state.procs.remove(i);
        self.coalesce();
        let now = self.state.clock.now();
        self.log.push(now, MemEvent::Deallocated { pid });
        Ok(())
    }

    /// Advance the simulation by one tick: attempt to place every process
    /// whose arrival is due. Returns true when nothing is left to place.
    pub fn forward_time(&mut self) -> bool {
        if !self.started {
            self.snapshot.arm(&self.state);
            self.started = true;
        }
        let now = self.state.clock.now();

        let mut due: Vec<(Tick, Pid)> = self
            .state
            .procs
            .iter()
            .filter(|p| !p.is_admitted() && p.arrival <= now)
            .map(|p| (p.arrival, p.pid))
            .collect();
        due.sort();
        for (_, pid) in due {
            if self.try_admit(pid, now) {
                self.state.failed_admissions.retain(|f| *f != pid);
                self.log.push(now, MemEvent::Admitted { pid });
            } else if !self.state.failed_admissions.contains(&pid) {
                self.state.failed_admissions.push(pid);
                self.log.push(now, MemEvent::AllocationFailed { pid });
            }
        }

        self.state.clock.advance();
        self.ended()
    }

    /// Move a resident component out to the backing store.
    pub fn swap_out(&mut self, pid: Pid, component: u32) -> Result<(), MemError> {
        let who = self.component_ref(pid, component)?;
        let (pi, ci) = self.component_indices(who)?;
        match self.state.procs[pi].components[ci].residence {
            Residence::Resident { .. } => {}
            _ => return Err(MemError::NotResident),
        }
        self.release(who);
        self.coalesce();
        self.state.procs[pi].components[ci].residence = Residence::Swapped;
        self.state.backing.push_back(who);
        let now = self.state.clock.now();
        self.log.push(now, MemEvent::SwappedOut { who });
        Ok(())
    }

    /// Bring a swapped component back into main memory.
    ///
    /// On failure the component stays in the backing store; the failure is
    /// logged once per unresolved condition and surfaced to the caller.
    pub fn swap_in(&mut self, pid: Pid, component: u32) -> Result<(), MemError> {
        let who = self.component_ref(pid, component)?;
        let (pi, ci) = self.component_indices(who)?;
        if self.state.procs[pi].components[ci].residence != Residence::Swapped {
            return Err(MemError::NotSwapped);
        }
        let request = self.state.alloc_size(&self.state.procs[pi].components[ci]);
        let now = self.state.clock.now();
        match self.place(who, request) {
            Some(base) => {
                self.state.procs[pi].components[ci].residence = Residence::Resident { base };
                self.state.backing.retain(|b| *b != who);
                self.state.failed_swapins.retain(|f| *f != who);
                self.log.push(now, MemEvent::SwappedIn { who, base });
                Ok(())
            }
            None => {
                if !self.state.failed_swapins.contains(&who) {
                    self.state.failed_swapins.push(who);
                    self.log.push(now, MemEvent::SwapInFailed { who });
                }
                Err(MemError::NoFit { requested: request })
            }
        }
    }

    /// Pack every allocation downwards, eliminating external fragmentation.
    /// Coalescing policies only.
    pub fn compaction(&mut self) -> Result<(), MemError> {
        if !self.state.policy.is_coalescing() {
            return Err(MemError::not_supported(
                "compaction requires a coalescing policy",
            ));
        }
        let mut packed: Vec<Region> = Vec::new();
        let mut cursor = 0usize;
        let mut moved = 0usize;
        for r in &self.state.regions {
            if r.kind == RegionKind::Os {
                packed.push(*r);
                cursor = r.end();
            }
        }
        let allocs: Vec<Region> = self
            .state
            .regions
            .iter()
            .filter(|r| matches!(r.kind, RegionKind::Allocated { .. }))
            .copied()
            .collect();
        for r in allocs {
            if r.start != cursor {
                moved += 1;
            }
            if let RegionKind::Allocated { owner } = r.kind {
                if let Ok((pi, ci)) = self.component_indices(owner) {
                    self.state.procs[pi].components[ci].residence =
                        Residence::Resident { base: cursor };
                }
            }
            packed.push(Region {
                start: cursor,
                size: r.size,
                kind: r.kind,
            });
            cursor += r.size;
        }
        if cursor < self.state.memory_size {
            packed.push(Region {
                start: cursor,
                size: self.state.memory_size - cursor,
                kind: RegionKind::Free,
            });
        }
        self.state.regions = packed;
        let now = self.state.clock.now();
        self.log.push(now, MemEvent::Compacted { moved });
        Ok(())
    }

    /// Stop the run: restore the state captured at start.
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

    /// Destroy all processes and partitions, keeping policy and geometry.
    pub fn reset(&mut self) {
        let policy = self.state.policy;
        self.state = MemState::new(policy, self.state.memory_size, self.state.os_size);
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
    pub fn policy(&self) -> MemPolicy {
        self.state.policy
    }

    /// Total managed bytes.
    pub fn memory_size(&self) -> usize {
        self.state.memory_size
    }

    /// True when every process has been placed.
    pub fn ended(&self) -> bool {
        self.state.procs.iter().all(|p| p.is_admitted())
    }

    /// The region table in address order.
    pub fn regions(&self) -> &[Region] {
        &self.state.regions
    }

    /// Backing-store queue contents in swap-out order.
    pub fn backing_ids(&self) -> Vec<ComponentRef> {
        self.state.backing.iter().copied().collect()
    }

    /// All processes in creation order.
    pub fn process_ids(&self) -> Vec<Pid> {
        self.state.procs.iter().map(|p| p.pid).collect()
    }

    /// Full process record for display.
    pub fn process(&self, pid: Pid) -> Option<&MemProcess> {
        self.state.procs.iter().find(|p| p.pid == pid)
    }

    /// Aggregate statistics for display.
    pub fn usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage {
            os_bytes: self.state.os_size,
            ..MemoryUsage::default()
        };
        for r in &self.state.regions {
            match r.kind {
                RegionKind::Free => {
                    usage.free_bytes += r.size;
                    usage.free_fragments += 1;
                }
                RegionKind::Partition { occupant: None, .. } => {
                    usage.free_bytes += r.size;
                }
                RegionKind::Partition {
                    occupant: Some(who),
                    ..
                } => {
                    usage.used_bytes += r.size;
                    if let Ok((pi, ci)) = self.component_indices(who) {
                        usage.internal_fragmentation +=
                            r.size - self.state.procs[pi].components[ci].size;
                    }
                }
                RegionKind::Allocated { owner } => {
                    usage.used_bytes += r.size;
                    if let Ok((pi, ci)) = self.component_indices(owner) {
                        usage.internal_fragmentation +=
                            r.size - self.state.procs[pi].components[ci].size;
                    }
                }
                RegionKind::Os => {}
            }
        }
        for p in &self.state.procs {
            for c in &p.components {
                match c.residence {
                    Residence::Resident { .. } => usage.resident_components += 1,
                    Residence::Swapped => usage.swapped_components += 1,
                    Residence::Waiting => {}
                }
            }
        }
        usage
    }

    /// The engine's event log.
    pub fn log(&self) -> &EventLog<MemEvent> {
        &self.log
    }

    // ========================================================================
    // Address translation (queries; never mutate state)
    // ========================================================================

    /// Translate a linear logical address. Fixed, variable and paged
    /// policies; segmented processes are addressed via `translate_segment`.
    pub fn translate(&self, pid: Pid, logical: usize) -> Result<usize, TranslateError> {
        let i = self
            .state
            .proc_index(pid)
            .ok_or(TranslateError::UnknownProcess(pid))?;
        let p = &self.state.procs[i];
        match self.state.policy {
            MemPolicy::Segmented { .. } => Err(TranslateError::PolicyMismatch),
            MemPolicy::Paged { page_size } => {
                if logical >= p.size {
                    return Err(TranslateError::OutOfBounds {
                        offset: logical,
                        limit: p.size,
                    });
                }
                let page = logical / page_size;
                let comp = p
                    .components
                    .get(page)
                    .ok_or(TranslateError::NotResident)?;
                let base = comp.base().ok_or(TranslateError::NotResident)?;
                Ok(base + logical % page_size)
            }
            _ => {
                if logical >= p.size {
                    return Err(TranslateError::OutOfBounds {
                        offset: logical,
                        limit: p.size,
                    });
                }
                let comp = p.components.first().ok_or(TranslateError::NotResident)?;
                let base = comp.base().ok_or(TranslateError::NotResident)?;
                Ok(base + logical)
            }
        }
    }

    /// Translate a (segment, offset) pair. Segmented policy only; the
    /// offset is bounds-checked against the segment size.
    pub fn translate_segment(
        &self,
        pid: Pid,
        segment: u32,
        offset: usize,
    ) -> Result<usize, TranslateError> {
        if !self.state.policy.is_segmented() {
            return Err(TranslateError::PolicyMismatch);
        }
        let i = self
            .state
            .proc_index(pid)
            .ok_or(TranslateError::UnknownProcess(pid))?;
        let comp = self.state.procs[i]
            .components
            .iter()
            .find(|c| c.index == segment)
            .ok_or(TranslateError::UnknownSegment(segment))?;
        if offset >= comp.size {
            return Err(TranslateError::OutOfBounds {
                offset,
                limit: comp.size,
            });
        }
        let base = comp.base().ok_or(TranslateError::NotResident)?;
        Ok(base + offset)
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
    /// constructed; any failure leaves nothing half-built.
    pub fn from_record(record: StateRecord) -> Result<Self, LoadError> {
        let state: MemState = from_record(record)?;
        state.validate()?;
        Ok(Self {
            state,
            started: false,
            snapshot: Snapshot::new(),
            log: EventLog::new(),
        })
    }

    // ========================================================================
    // Region bookkeeping
    // ========================================================================

    fn ensure_not_started(&self) -> Result<(), MemError> {
        if self.started {
            return Err(MemError::SimulationStarted);
        }
        Ok(())
    }

    fn component_ref(&self, pid: Pid, component: u32) -> Result<ComponentRef, MemError> {
        let i = self
            .state
            .proc_index(pid)
            .ok_or(MemError::UnknownProcess(pid))?;
        if !self.state.procs[i]
            .components
            .iter()
            .any(|c| c.index == component)
        {
            return Err(MemError::UnknownComponent { pid, component });
        }
        Ok(ComponentRef { pid, component })
    }

    fn component_indices(&self, who: ComponentRef) -> Result<(usize, usize), MemError> {
        let pi = self
            .state
            .proc_index(who.pid)
            .ok_or(MemError::UnknownProcess(who.pid))?;
        let ci = self.state.procs[pi]
            .components
            .iter()
            .position(|c| c.index == who.component)
            .ok_or(MemError::UnknownComponent {
                pid: who.pid,
                component: who.component,
            })?;
        Ok((pi, ci))
    }

    fn free_candidates(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.state
            .regions
            .iter()
            .filter(|r| r.is_free())
            .map(|r| (r.start, r.size))
    }

    /// Place one component, returning its base offset.
    fn place(&mut self, who: ComponentRef, request: usize) -> Option<usize> {
        match self.state.policy {
            MemPolicy::Fixed { fit } => {
                let candidates = self.state.regions.iter().filter_map(|r| match r.kind {
                    RegionKind::Partition { occupant: None, .. } => Some((r.start, r.size)),
                    _ => None,
                });
                let start = fit.choose(candidates, request)?;
                for r in self.state.regions.iter_mut() {
                    if r.start == start {
                        if let RegionKind::Partition { index, .. } = r.kind {
                            r.kind = RegionKind::Partition {
                                index,
                                occupant: Some(who),
                            };
                        }
                    }
                }
                Some(start)
            }
            MemPolicy::Variable { fit } | MemPolicy::Segmented { fit } => {
                let start = fit.choose(self.free_candidates(), request)?;
                self.carve(start, request, RegionKind::Allocated { owner: who });
                Some(start)
            }
            MemPolicy::Paged { .. } => {
                let start = FitPolicy::FirstFit.choose(self.free_candidates(), request)?;
                self.carve(start, request, RegionKind::Allocated { owner: who });
                Some(start)
            }
        }
    }

    /// Split the free region starting at `start`, giving its head to `kind`.
    fn carve(&mut self, start: usize, size: usize, kind: RegionKind) {
        let Some(pos) = self
            .state
            .regions
            .iter()
            .position(|r| r.is_free() && r.start == start)
        else {
            return;
        };
        let residual = self.state.regions[pos].size - size;
        self.state.regions[pos] = Region { start, size, kind };
        if residual > 0 {
            self.state.regions.insert(
                pos + 1,
                Region {
                    start: start + size,
                    size: residual,
                    kind: RegionKind::Free,
                },
            );
        }
    }

    /// Return a component's span to free space (or vacate its partition).
    /// Callers coalesce afterwards.
    fn release(&mut self, who: ComponentRef) {
        for r in self.state.regions.iter_mut() {
            match r.kind {
                RegionKind::Allocated { owner } if owner == who => {
                    r.kind = RegionKind::Free;
                }
                RegionKind::Partition {
                    index,
                    occupant: Some(occ),
                } if occ == who => {
                    r.kind = RegionKind::Partition {
                        index,
                        occupant: None,
                    };
                }
                _ => {}
            }
        }
    }

    /// Merge adjacent free regions.
    fn coalesce(&mut self) {
        let mut merged: Vec<Region> = Vec::with_capacity(self.state.regions.len());
        for r in self.state.regions.drain(..) {
            match merged.last_mut() {
                Some(prev) if prev.is_free() && r.is_free() => {
                    prev.size += r.size;
                }
                _ => merged.push(r),
            }
        }
        self.state.regions = merged;
    }

    /// Attempt to place every waiting component of `pid`; all or nothing.
    fn try_admit(&mut self, pid: Pid, now: Tick) -> bool {
        let Some(pi) = self.state.proc_index(pid) else {
            return false;
        };
        let waiting: Vec<(u32, usize)> = self.state.procs[pi]
            .components
            .iter()
            .filter(|c| c.residence == Residence::Waiting)
            .map(|c| (c.index, self.state.alloc_size(c)))
            .collect();

        let saved = self.state.regions.clone();
        let mut placements: Vec<(u32, usize)> = Vec::new();
        for (index, request) in &waiting {
            let who = ComponentRef {
                pid,
                component: *index,
            };
            match self.place(who, *request) {
                Some(base) => placements.push((*index, base)),
                None => {
                    self.state.regions = saved.clone();
                    return false;
                }
            }
        }
        for (index, base) in placements {
            if let Some(c) = self.state.procs[pi]
                .components
                .iter_mut()
                .find(|c| c.index == index)
            {
                c.residence = Residence::Resident { base };
            }
            self.log.push(
                now,
                MemEvent::ComponentPlaced {
                    who: ComponentRef {
                        pid,
                        component: index,
                    },
                    base,
                },
            );
        }
        true
    }
}
