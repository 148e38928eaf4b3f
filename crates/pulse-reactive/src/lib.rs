//! Fine-grained reactive primitives: signals, computed values and effects.
//!
//! This crate implements the reactive core that the rest of Pulse is built on. Three kinds of
//! node live in a single-threaded dependency graph:
//!
//! * [`Signal`] — a mutable reactive atom. Writing to one schedules its dependents for update.
//! * [`Computed`] — a value lazily derived from other signals/computeds. It is never run on
//!   write; only the next time it is read does it re-derive itself, and only if something it
//!   (transitively) depends on actually changed.
//! * An effect, created with [`create_effect`] — a side-effecting closure that re-runs eagerly,
//!   once per [`batch`], in the order it was registered in.
//!
//! [`batch`] coalesces writes so that dependents only see a value's final state in a given tick,
//! and [`create_root`]/[`create_child_scope`] group nodes into disposable, nested scopes with
//! LIFO cleanup callbacks via [`on_cleanup`].

#![warn(missing_docs)]

mod computed;
mod context;
mod effects;
mod node;
mod root;
mod signals;
mod utils;

pub use computed::*;
pub use context::*;
pub use effects::*;
pub use node::{NodeHandle, NodeId};
pub use root::*;
pub use signals::*;
pub use utils::*;

pub(crate) use node::{Mark, NodeKind, NodeState, ReactiveNode};
