//! The session and its active module.

use alloc::string::String;

use serde_json::json;

use tos_core::{LoadError, SaveError, StateRecord, Tick};
use tos_disk::DiskEngine;
use tos_mem::MemEngine;
use tos_sched::SchedEngine;

/// Which teaching module a session is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModuleKind {
    /// CPU process scheduling
    Scheduling,
    /// Memory management
    Memory,
    /// Disk scheduling
    Disk,
}

impl ModuleKind {
    /// Tag used in saved records.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Scheduling => "scheduling",
            Self::Memory => "memory",
            Self::Disk => "disk",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "scheduling" => Some(Self::Scheduling),
            "memory" => Some(Self::Memory),
            "disk" => Some(Self::Disk),
            _ => None,
        }
    }
}

/// One engine, owned exclusively by the session.
#[derive(Debug)]
pub enum Module {
    /// CPU process scheduling
    Scheduling(SchedEngine),
    /// Memory management
    Memory(MemEngine),
    /// Disk scheduling
    Disk(DiskEngine),
}

impl Module {
    /// Which module this is.
    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::Scheduling(_) => ModuleKind::Scheduling,
            Self::Memory(_) => ModuleKind::Memory,
            Self::Disk(_) => ModuleKind::Disk,
        }
    }

    fn to_record(&self) -> Result<StateRecord, SaveError> {
        match self {
            Self::Scheduling(engine) => engine.to_record(),
            Self::Memory(engine) => engine.to_record(),
            Self::Disk(engine) => engine.to_record(),
        }
    }

    fn from_record(kind: ModuleKind, record: StateRecord) -> Result<Self, LoadError> {
        match kind {
            ModuleKind::Scheduling => SchedEngine::from_record(record).map(Self::Scheduling),
            ModuleKind::Memory => MemEngine::from_record(record).map(Self::Memory),
            ModuleKind::Disk => DiskEngine::from_record(record).map(Self::Disk),
        }
    }
}

/// A simulation session: one active module and its engine.
#[derive(Debug)]
pub struct Session {
    module: Module,
}

impl Session {
    /// Create a session around an engine.
    pub fn new(module: Module) -> Self {
        Self { module }
    }

    /// Which module is active.
    pub fn kind(&self) -> ModuleKind {
        self.module.kind()
    }

    /// The active module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// The active module, mutably.
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    /// Switch modules. The previous engine is dropped wholesale; there is
    /// no cross-module state to migrate.
    pub fn replace(&mut self, module: Module) -> Module {
        core::mem::replace(&mut self.module, module)
    }

    /// Advance the active engine by one tick.
    pub fn forward_time(&mut self) -> bool {
        match &mut self.module {
            Module::Scheduling(engine) => engine.forward_time(),
            Module::Memory(engine) => engine.forward_time(),
            Module::Disk(engine) => engine.forward_time(),
        }
    }

    /// Stop the run: rewind the active engine to its start snapshot.
    pub fn rewind(&mut self) -> bool {
        match &mut self.module {
            Module::Scheduling(engine) => engine.rewind(),
            Module::Memory(engine) => engine.rewind(),
            Module::Disk(engine) => engine.rewind(),
        }
    }

    /// Current tick of the active engine.
    pub fn now(&self) -> Tick {
        match &self.module {
            Module::Scheduling(engine) => engine.now(),
            Module::Memory(engine) => engine.now(),
            Module::Disk(engine) => engine.now(),
        }
    }

    /// True once the active engine's simulation has started.
    pub fn is_started(&self) -> bool {
        match &self.module {
            Module::Scheduling(engine) => engine.is_started(),
            Module::Memory(engine) => engine.is_started(),
            Module::Disk(engine) => engine.is_started(),
        }
    }

    /// The scheduling engine, if that module is active.
    pub fn scheduling(&self) -> Option<&SchedEngine> {
        match &self.module {
            Module::Scheduling(engine) => Some(engine),
            _ => None,
        }
    }

    /// The scheduling engine mutably, if that module is active.
    pub fn scheduling_mut(&mut self) -> Option<&mut SchedEngine> {
        match &mut self.module {
            Module::Scheduling(engine) => Some(engine),
            _ => None,
        }
    }

    /// The memory engine, if that module is active.
    pub fn memory(&self) -> Option<&MemEngine> {
        match &self.module {
            Module::Memory(engine) => Some(engine),
            _ => None,
        }
    }

    /// The memory engine mutably, if that module is active.
    pub fn memory_mut(&mut self) -> Option<&mut MemEngine> {
        match &mut self.module {
            Module::Memory(engine) => Some(engine),
            _ => None,
        }
    }

    /// The disk engine, if that module is active.
    pub fn disk(&self) -> Option<&DiskEngine> {
        match &self.module {
            Module::Disk(engine) => Some(engine),
            _ => None,
        }
    }

    /// The disk engine mutably, if that module is active.
    pub fn disk_mut(&mut self) -> Option<&mut DiskEngine> {
        match &mut self.module {
            Module::Disk(engine) => Some(engine),
            _ => None,
        }
    }

    /// Serialize the session into a tagged record.
    pub fn save(&self) -> Result<StateRecord, SaveError> {
        let state = self.module.to_record()?;
        Ok(json!({
            "module": self.module.kind().tag(),
            "state": state,
        }))
    }

    /// Rebuild a session from a tagged record.
    ///
    /// Builds into a fresh session and returns it only on full success;
    /// the caller's live session is untouched by a failed load.
    pub fn load(record: StateRecord) -> Result<Self, LoadError> {
        let tag = record
            .get("module")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoadError::malformed("record has no module tag"))?;
        let kind = ModuleKind::from_tag(tag).ok_or(LoadError::UnknownModule {
            found: String::from(tag),
        })?;
        let state = record
            .get("state")
            .cloned()
            .ok_or_else(|| LoadError::malformed("record has no state"))?;
        let module = Module::from_record(kind, state)?;
        Ok(Self::new(module))
    }
}
