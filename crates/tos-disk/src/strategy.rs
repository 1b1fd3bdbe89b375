//! Disk scheduling policies.
//!
//! Pure decision logic over the arrived-pending set: given the head
//! cylinder and sweep direction, pick the next request and price the seek.
//! Ties resolve to the lowest request id.
//!
//! Movement is the straight sum of consecutive cylinder distances along the
//! head's path, so SCAN/C-SCAN boundary legs and the C-SCAN/C-LOOK wrap
//! jump are charged to the serve that follows them.

use core::cmp::Reverse;

use serde::{Deserialize, Serialize};

use tos_core::{RequestId, Tick};

/// Direction of the current sweep across the cylinders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepDirection {
    /// Towards higher cylinders
    Up,
    /// Towards cylinder 0
    Down,
}

impl SweepDirection {
    /// The opposite direction.
    pub fn flipped(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

/// One pending candidate: id, target cylinder, arrival tick.
pub type Candidate = (RequestId, u32, Tick);

/// A scheduling decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PickOutcome {
    /// The request to serve next
    pub id: RequestId,
    /// Cylinders traveled to reach it, boundary/wrap legs included
    pub movement: u32,
    /// Sweep direction after this serve
    pub direction: SweepDirection,
}

/// The closed set of disk scheduling policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskPolicy {
    /// Serve in arrival order
    Fifo,
    /// Serve the most recently arrived first
    Lifo,
    /// Shortest seek time first
    Sstf,
    /// Sweep to the track boundary, then reverse
    Scan,
    /// Sweep up only; wrap to cylinder 0 without serving
    CScan,
    /// Sweep to the last request in the direction, then reverse
    Look,
    /// Sweep up to the last request, then jump to the lowest
    CLook,
}

impl DiskPolicy {
    /// True for the sweep family, which carries a direction flag.
    pub fn uses_direction(&self) -> bool {
        matches!(self, Self::Scan | Self::CScan | Self::Look | Self::CLook)
    }

    /// Select the next request to serve.
    ///
    /// `head` is the current head cylinder and `max_cylinder` the track
    /// boundary. Returns `None` iff `pending` is empty.
    pub fn pick_next(
        &self,
        pending: &[Candidate],
        head: u32,
        direction: SweepDirection,
        max_cylinder: u32,
    ) -> Option<PickOutcome> {
        if pending.is_empty() {
            return None;
        }
        match self {
            Self::Fifo => pending
                .iter()
                .min_by_key(|(id, _, arrival)| (*arrival, *id))
                .map(|(id, cyl, _)| PickOutcome {
                    id: *id,
                    movement: head.abs_diff(*cyl),
                    direction,
                }),
            Self::Lifo => pending
                .iter()
                .max_by_key(|(id, _, arrival)| (*arrival, Reverse(*id)))
                .map(|(id, cyl, _)| PickOutcome {
                    id: *id,
                    movement: head.abs_diff(*cyl),
                    direction,
                }),
            Self::Sstf => pending
                .iter()
                .min_by_key(|(id, cyl, _)| (head.abs_diff(*cyl), *id))
                .map(|(id, cyl, _)| PickOutcome {
                    id: *id,
                    movement: head.abs_diff(*cyl),
                    direction,
                }),
            Self::Scan => Some(Self::pick_scan(pending, head, direction, max_cylinder)),
            Self::Look => Some(Self::pick_look(pending, head, direction)),
            Self::CScan => Some(Self::pick_cscan(pending, head, max_cylinder)),
            Self::CLook => Some(Self::pick_clook(pending, head)),
        }
    }

    /// Nearest candidate at or above `head`.
    fn nearest_above(pending: &[Candidate], head: u32) -> Option<(RequestId, u32)> {
        pending
            .iter()
            .filter(|(_, cyl, _)| *cyl >= head)
            .min_by_key(|(id, cyl, _)| (*cyl, *id))
            .map(|(id, cyl, _)| (*id, *cyl))
    }

    /// Nearest candidate at or below `head`.
    fn nearest_below(pending: &[Candidate], head: u32) -> Option<(RequestId, u32)> {
        pending
            .iter()
            .filter(|(_, cyl, _)| *cyl <= head)
            .max_by_key(|(id, cyl, _)| (*cyl, Reverse(*id)))
            .map(|(id, cyl, _)| (*id, *cyl))
    }

    fn pick_scan(
        pending: &[Candidate],
        head: u32,
        direction: SweepDirection,
        max_cylinder: u32,
    ) -> PickOutcome {
        match direction {
            SweepDirection::Up => match Self::nearest_above(pending, head) {
                Some((id, cyl)) => PickOutcome {
                    id,
                    movement: cyl - head,
                    direction,
                },
                None => {
                    // ride to the boundary, reverse, take the highest below
                    let (id, cyl) = Self::nearest_below(pending, head)
                        .unwrap_or((pending[0].0, pending[0].1));
                    PickOutcome {
                        id,
                        movement: (max_cylinder - head) + (max_cylinder - cyl),
                        direction: SweepDirection::Down,
                    }
                }
            },
            SweepDirection::Down => match Self::nearest_below(pending, head) {
                Some((id, cyl)) => PickOutcome {
                    id,
                    movement: head - cyl,
                    direction,
                },
                None => {
                    let (id, cyl) = Self::nearest_above(pending, head)
                        .unwrap_or((pending[0].0, pending[0].1));
                    PickOutcome {
                        id,
                        movement: head + cyl,
                        direction: SweepDirection::Up,
                    }
                }
            },
        }
    }

    fn pick_look(pending: &[Candidate], head: u32, direction: SweepDirection) -> PickOutcome {
        let ahead = match direction {
            SweepDirection::Up => Self::nearest_above(pending, head),
            SweepDirection::Down => Self::nearest_below(pending, head),
        };
        match ahead {
            Some((id, cyl)) => PickOutcome {
                id,
                movement: head.abs_diff(cyl),
                direction,
            },
            None => {
                // reverse at the last request: the nearest one behind us
                let flipped = direction.flipped();
                let (id, cyl) = match flipped {
                    SweepDirection::Up => Self::nearest_above(pending, head),
                    SweepDirection::Down => Self::nearest_below(pending, head),
                }
                .unwrap_or((pending[0].0, pending[0].1));
                PickOutcome {
                    id,
                    movement: head.abs_diff(cyl),
                    direction: flipped,
                }
            }
        }
    }

    fn pick_cscan(pending: &[Candidate], head: u32, max_cylinder: u32) -> PickOutcome {
        match Self::nearest_above(pending, head) {
            Some((id, cyl)) => PickOutcome {
                id,
                movement: cyl - head,
                direction: SweepDirection::Up,
            },
            None => {
                // ride to the boundary, wrap to 0, resume upwards
                let (id, cyl) = pending
                    .iter()
                    .min_by_key(|(id, cyl, _)| (*cyl, *id))
                    .map(|(id, cyl, _)| (*id, *cyl))
                    .unwrap_or((pending[0].0, pending[0].1));
                PickOutcome {
                    id,
                    movement: (max_cylinder - head) + max_cylinder + cyl,
                    direction: SweepDirection::Up,
                }
            }
        }
    }

    fn pick_clook(pending: &[Candidate], head: u32) -> PickOutcome {
        match Self::nearest_above(pending, head) {
            Some((id, cyl)) => PickOutcome {
                id,
                movement: cyl - head,
                direction: SweepDirection::Up,
            },
            None => {
                // jump straight to the lowest pending request
                let (id, cyl) = pending
                    .iter()
                    .min_by_key(|(id, cyl, _)| (*cyl, *id))
                    .map(|(id, cyl, _)| (*id, *cyl))
                    .unwrap_or((pending[0].0, pending[0].1));
                PickOutcome {
                    id,
                    movement: head.abs_diff(cyl),
                    direction: SweepDirection::Up,
                }
            }
        }
    }
}
