//! Tick OS session layer
//!
//! A session drives exactly one teaching module at a time (scheduling,
//! memory or disk). Switching modules replaces the engine wholesale; two
//! call sites never share one. Saving wraps the engine state in a tagged
//! record; loading rebuilds a whole fresh session and only hands it over on
//! full success, so a bad record can never corrupt the live one.

#![no_std]
extern crate alloc;

mod session;

pub use session::{Module, ModuleKind, Session};
