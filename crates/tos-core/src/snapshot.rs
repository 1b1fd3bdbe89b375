//! Deep-copy state snapshots.
//!
//! The engines support one rollback point: the state at simulation start.
//! Starting a run arms the snapshot with a deep copy of the engine state;
//! stopping the run takes the copy back and disarms, returning the engine to
//! "not started". There is no finer-grained undo.

use serde::{Deserialize, Serialize};

/// Holds at most one saved copy of an engine's state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot<T: Clone> {
    saved: Option<T>,
}

impl<T: Clone> Snapshot<T> {
    /// Create an empty (disarmed) snapshot.
    pub const fn new() -> Self {
        Self { saved: None }
    }

    /// Capture `state` if no snapshot is held yet.
    ///
    /// Arming twice without a restore in between is a no-op: the rollback
    /// point is always the state at the *first* start.
    pub fn arm(&mut self, state: &T) {
        if self.saved.is_none() {
            self.saved = Some(state.clone());
        }
    }

    /// True if a saved copy is held.
    pub fn is_armed(&self) -> bool {
        self.saved.is_some()
    }

    /// Take the saved copy, disarming the snapshot.
    pub fn restore(&mut self) -> Option<T> {
        self.saved.take()
    }

    /// Drop the saved copy without restoring it.
    pub fn clear(&mut self) {
        self.saved = None;
    }
}
