//! The disk scheduling engine.
//!
//! Owns the request table, the served list and the head position. Each
//! `forward_time` tick serves at most one arrived pending request, chosen by
//! the active policy; the head moves to the served block and the seek cost
//! is accumulated in cylinder units.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use tos_core::{
    from_record, to_record, EventLog, LoadError, RequestId, Rgb, SaveError, SimClock, Snapshot,
    StateRecord, Tick, ValidationError,
};

use crate::error::DiskError;
use crate::strategy::{Candidate, DiskPolicy, SweepDirection};
use crate::types::{
    BlockRequest, BlockRequestSpec, DiskGeometry, DiskStats, RequestState, ServedRequest,
};

/// Maximum number of block requests one engine instance tracks.
pub const MAX_REQUESTS: usize = 128;

/// Events recorded by the disk engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiskEvent {
    /// A request was served; the head moved to its block
    Served {
        id: RequestId,
        movement: u32,
    },
    /// The sweep direction flipped
    Reversed {
        direction: SweepDirection,
    },
}

/// The rewindable, serializable state of the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct DiskState {
    clock: SimClock,
    policy: DiskPolicy,
    geometry: DiskGeometry,
    head: u32,
    direction: SweepDirection,
    requests: Vec<BlockRequest>,
    served: Vec<ServedRequest>,
    cumulative: u32,
    next_id: u32,
}

impl DiskState {
    fn new(policy: DiskPolicy, geometry: DiskGeometry, head: u32) -> Self {
        Self {
            clock: SimClock::new(),
            policy,
            geometry,
            head,
            direction: SweepDirection::Up,
            requests: Vec::new(),
            served: Vec::new(),
            cumulative: 0,
            next_id: 1,
        }
    }

    /// Re-check every invariant a loaded record must satisfy.
    fn validate(&self) -> Result<(), ValidationError> {
        validate_geometry(&self.geometry)?;
        if self.head >= self.geometry.block_count() {
            return Err(ValidationError::out_of_range(
                "head",
                self.head as u64,
                self.geometry.block_count() as u64 - 1,
            ));
        }
        for (n, r) in self.requests.iter().enumerate() {
            if r.block >= self.geometry.block_count() {
                return Err(ValidationError::out_of_range(
                    "block",
                    r.block as u64,
                    self.geometry.block_count() as u64 - 1,
                ));
            }
            if self.requests[..n].iter().any(|q| q.id == r.id) {
                return Err(ValidationError::inconsistent("duplicate request id"));
            }
            if r.id.0 >= self.next_id {
                return Err(ValidationError::inconsistent("id above allocator cursor"));
            }
            let listed = self.served.iter().filter(|s| s.id == r.id).count();
            let expected = match r.state {
                RequestState::Served => 1,
                RequestState::Pending => 0,
            };
            if listed != expected {
                return Err(ValidationError::inconsistent(
                    "request state disagrees with served list",
                ));
            }
        }
        let mut running = 0u32;
        for (n, s) in self.served.iter().enumerate() {
            if !self.requests.iter().any(|r| r.id == s.id) {
                return Err(ValidationError::inconsistent("served entry has no request"));
            }
            if s.order as usize != n + 1 {
                return Err(ValidationError::inconsistent("served order out of sequence"));
            }
            running += s.movement;
            if s.cumulative != running {
                return Err(ValidationError::inconsistent("cumulative movement mismatch"));
            }
        }
        if running != self.cumulative {
            return Err(ValidationError::inconsistent("cumulative movement mismatch"));
        }
        Ok(())
    }
}

fn validate_geometry(geometry: &DiskGeometry) -> Result<(), ValidationError> {
    if geometry.cylinders == 0 {
        return Err(ValidationError::zero_size("cylinders"));
    }
    if geometry.sectors == 0 {
        return Err(ValidationError::zero_size("sectors"));
    }
    Ok(())
}

/// The disk scheduling engine.
#[derive(Debug)]
pub struct DiskEngine {
    state: DiskState,
    started: bool,
    snapshot: Snapshot<DiskState>,
    log: EventLog<DiskEvent>,
}

impl DiskEngine {
    /// Create an engine for the given geometry with the head parked on
    /// `head_cylinder`.
    pub fn new(
        policy: DiskPolicy,
        geometry: DiskGeometry,
        head_cylinder: u32,
    ) -> Result<Self, DiskError> {
        validate_geometry(&geometry)?;
        if head_cylinder >= geometry.cylinders {
            return Err(ValidationError::out_of_range(
                "head cylinder",
                head_cylinder as u64,
                geometry.max_cylinder() as u64,
            )
            .into());
        }
        Ok(Self {
            state: DiskState::new(policy, geometry, geometry.block_of(head_cylinder, 0)),
            started: false,
            snapshot: Snapshot::new(),
            log: EventLog::new(),
        })
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Swap the active policy. Only before start.
    pub fn set_policy(&mut self, policy: DiskPolicy) -> Result<(), DiskError> {
        self.ensure_not_started()?;
        self.state.policy = policy;
        Ok(())
    }

    /// Set the initial sweep direction. Only before start.
    pub fn set_direction(&mut self, direction: SweepDirection) -> Result<(), DiskError> {
        self.ensure_not_started()?;
        self.state.direction = direction;
        Ok(())
    }

    /// Create a block request. Permitted at any time; requests added
    /// mid-run are discarded again by `rewind`.
    pub fn add_request(&mut self, spec: BlockRequestSpec) -> Result<RequestId, DiskError> {
        let block = self.checked_block(&spec)?;
        if self.state.requests.len() >= MAX_REQUESTS {
            return Err(DiskError::CapacityExceeded {
                limit: MAX_REQUESTS,
            });
        }
        let id = RequestId(self.state.next_id);
        self.state.next_id += 1;
        self.state.requests.push(BlockRequest {
            id,
            block,
            arrival: spec.arrival,
            color: spec
                .color
                .unwrap_or_else(|| Rgb::palette(id.0 as usize - 1)),
            state: RequestState::Pending,
        });
        Ok(id)
    }

    /// Replace a request's user-editable fields. Only before start.
    pub fn update_request(
        &mut self,
        id: RequestId,
        spec: BlockRequestSpec,
    ) -> Result<(), DiskError> {
        self.ensure_not_started()?;
        let block = self.checked_block(&spec)?;
        let r = self
            .state
            .requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(DiskError::UnknownRequest(id))?;
        r.block = block;
        r.arrival = spec.arrival;
        if let Some(color) = spec.color {
            r.color = color;
        }
        Ok(())
    }

    /// Destroy a request. Only before start.
    pub fn remove_request(&mut self, id: RequestId) -> Result<(), DiskError> {
        self.ensure_not_started()?;
        let i = self
            .state
            .requests
            .iter()
            .position(|r| r.id == id)
            .ok_or(DiskError::UnknownRequest(id))?;
        self.state.requests.remove(i);
        self.state.served.retain(|s| s.id != id);
        Ok(())
    }

    /// Advance the simulation by one tick, serving at most one arrived
    /// request. Returns true when no request is left pending.
    pub fn forward_time(&mut self) -> bool {
        if !self.started {
            self.snapshot.arm(&self.state);
            self.started = true;
        }
        let now = self.state.clock.now();

        let pending: Vec<Candidate> = self
            .state
            .requests
            .iter()
            .filter(|r| r.state == RequestState::Pending && r.arrival <= now)
            .map(|r| (r.id, self.state.geometry.cylinder_of(r.block), r.arrival))
            .collect();

        let outcome = self.state.policy.pick_next(
            &pending,
            self.state.geometry.cylinder_of(self.state.head),
            self.state.direction,
            self.state.geometry.max_cylinder(),
        );
        if let Some(outcome) = outcome {
            if outcome.direction != self.state.direction {
                self.state.direction = outcome.direction;
                self.log.push(
                    now,
                    DiskEvent::Reversed {
                        direction: outcome.direction,
                    },
                );
            }
            self.serve(outcome.id, outcome.movement, now);
        }

        self.state.clock.advance();
        self.ended()
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

    /// Destroy all requests and return the head to its parked position,
    /// keeping policy and geometry.
    pub fn reset(&mut self) {
        let policy = self.state.policy;
        let geometry = self.state.geometry;
        let head = self.state.head;
        self.state = DiskState::new(policy, geometry, head);
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
    pub fn policy(&self) -> DiskPolicy {
        self.state.policy
    }

    /// The disk geometry.
    pub fn geometry(&self) -> DiskGeometry {
        self.state.geometry
    }

    /// True when no request is pending.
    pub fn ended(&self) -> bool {
        self.state
            .requests
            .iter()
            .all(|r| r.state == RequestState::Served)
    }

    /// Current head position as a block index.
    pub fn head(&self) -> u32 {
        self.state.head
    }

    /// Current head cylinder.
    pub fn head_cylinder(&self) -> u32 {
        self.state.geometry.cylinder_of(self.state.head)
    }

    /// Current sweep direction.
    pub fn direction(&self) -> SweepDirection {
        self.state.direction
    }

    /// Pending requests in creation order.
    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.state
            .requests
            .iter()
            .filter(|r| r.state == RequestState::Pending)
            .map(|r| r.id)
            .collect()
    }

    /// Served requests in service order.
    pub fn served_ids(&self) -> Vec<RequestId> {
        self.state.served.iter().map(|s| s.id).collect()
    }

    /// Full request record for display.
    pub fn request(&self, id: RequestId) -> Option<&BlockRequest> {
        self.state.requests.iter().find(|r| r.id == id)
    }

    /// Service statistics for a served request.
    pub fn served_info(&self, id: RequestId) -> Option<&ServedRequest> {
        self.state.served.iter().find(|s| s.id == id)
    }

    /// Aggregate statistics for display.
    pub fn stats(&self) -> DiskStats {
        DiskStats {
            serves: self.state.served.len() as u32,
            total_movement: self.state.cumulative,
        }
    }

    /// The engine's event log.
    pub fn log(&self) -> &EventLog<DiskEvent> {
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
    /// constructed; any failure leaves nothing half-built.
    pub fn from_record(record: StateRecord) -> Result<Self, LoadError> {
        let state: DiskState = from_record(record)?;
        state.validate()?;
        Ok(Self {
            state,
            started: false,
            snapshot: Snapshot::new(),
            log: EventLog::new(),
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_not_started(&self) -> Result<(), DiskError> {
        if self.started {
            return Err(DiskError::SimulationStarted);
        }
        Ok(())
    }

    fn checked_block(&self, spec: &BlockRequestSpec) -> Result<u32, DiskError> {
        let geometry = &self.state.geometry;
        if spec.cylinder >= geometry.cylinders {
            return Err(ValidationError::out_of_range(
                "cylinder",
                spec.cylinder as u64,
                geometry.max_cylinder() as u64,
            )
            .into());
        }
        if spec.sector >= geometry.sectors {
            return Err(ValidationError::out_of_range(
                "sector",
                spec.sector as u64,
                geometry.sectors as u64 - 1,
            )
            .into());
        }
        Ok(geometry.block_of(spec.cylinder, spec.sector))
    }

    fn serve(&mut self, id: RequestId, movement: u32, now: Tick) {
        let Some(r) = self.state.requests.iter_mut().find(|r| r.id == id) else {
            return;
        };
        r.state = RequestState::Served;
        self.state.head = r.block;
        self.state.cumulative += movement;
        let order = self.state.served.len() as u32 + 1;
        self.state.served.push(ServedRequest {
            id,
            order,
            movement,
            cumulative: self.state.cumulative,
        });
        self.log.push(now, DiskEvent::Served { id, movement });
    }
}
