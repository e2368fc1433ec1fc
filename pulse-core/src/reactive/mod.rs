//! Reactive Primitives
//!
//! This module implements the core reactive system: notifying value cells,
//! batched-mutation sessions, lifetime-safe references, and the
//! dependency-tracking observer scheduler.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] owns a mutable value and a list of change listeners. Writes
//! commit through a protocol that invokes every listener with the incoming
//! value before it becomes visible to readers, and that rejects writes
//! re-entering a cell from inside its own notification.
//!
//! ## Sessions and Refs
//!
//! A [`Session`] batches any number of edits into exactly one
//! notification. A [`CellRef`] is a durable non-owning reference that
//! survives its target's destruction and owns the listener registrations
//! made through it. Both are built on [`WeakHandle`], the race-free
//! liveness primitive.
//!
//! ## Signals and Observers
//!
//! A [`Signal`] adds a process-unique identity to a cell; reading one
//! inside a running [`Observer`] records the dependency implicitly. When a
//! dependency changes, the observer is queued; the host re-runs queued
//! observers by calling [`ObserverStack::update`] on its own cadence.
//! Re-evaluation never happens behind the caller's back.

mod cell;
mod cell_ref;
mod observer;
mod session;
mod signal;

pub use cell::{Cell, CellGuard, ListenerId, WeakHandle};
pub use cell_ref::CellRef;
pub use observer::{Observatory, Observer, ObserverStack};
pub use session::{Session, SessionError};
pub use signal::{ComputedSignal, Signal};
