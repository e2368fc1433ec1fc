//! Reactive Collections
//!
//! Convenience wrappers that give container-like ergonomics on top of the
//! core cell primitives. They add no lifetime or concurrency mechanism of
//! their own; every mutation goes through a batched session so each edit
//! produces exactly one notification.

mod vec;

pub use vec::VecCell;
