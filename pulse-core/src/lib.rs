//! Pulse Core
//!
//! This crate provides reactive state primitives for general application
//! state:
//!
//! - Notifying value cells with a batched-mutation session protocol
//! - Lifetime-safe weak handles and durable external references
//! - Implicit dependency tracking (signals, observers, computed signals)
//! - Reactive collection wrappers
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: cells, sessions, refs, signals, and the observer scheduler
//! - `collections`: container ergonomics composed from the core primitives
//!
//! Re-evaluation is always host-driven: writes queue dependent observers,
//! and nothing re-runs until the host calls
//! [`ObserverStack::update`](reactive::ObserverStack::update), typically
//! once per frame, tick, or event-loop turn.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pulse_core::reactive::{ComputedSignal, ObserverStack, Signal};
//!
//! let price = Arc::new(Signal::new(100));
//! let tax = Arc::new(Signal::new(20));
//!
//! let (p, t) = (Arc::clone(&price), Arc::clone(&tax));
//! let total = ComputedSignal::new(move || p.get() + t.get());
//! assert_eq!(total.get(), 120);
//!
//! price.set(110);
//! ObserverStack::update();
//! assert_eq!(total.get(), 130);
//! ```

pub mod collections;
pub mod reactive;
