//! Signal Implementation
//!
//! A Signal wraps a [`Cell`] with a process-unique identity, which is what
//! makes implicit dependency discovery work: a tracked read checks whether
//! an observer is executing on this thread and, if it has not yet recorded
//! this signal's identity, registers a cell listener that schedules that
//! observer and hands the observer the matching unsubscribe action.
//!
//! Each observer re-run first clears its previous subscriptions, so the
//! dependency set always matches the branches the effect actually took:
//! a signal the effect stopped reading no longer re-schedules it.
//!
//! # Example
//!
//! ```rust,ignore
//! let a = Arc::new(Signal::new(1));
//! let b = Arc::new(Signal::new(2));
//!
//! let (a2, b2) = (Arc::clone(&a), Arc::clone(&b));
//! let c = ComputedSignal::new(move || a2.get() + b2.get());
//! assert_eq!(c.get(), 3);
//!
//! a.set(10);
//! ObserverStack::update(); // explicit drain, host-driven
//! assert_eq!(c.get(), 12);
//! ```

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::cell::{Cell, ListenerId, WeakHandle};
use super::cell_ref::CellRef;
use super::observer::{Observatory, Observer, ObserverStack};
use super::session::{Session, SessionError};

/// Process-wide identity source. Initialized once, incremented per signal,
/// never reset; uniqueness for the process lifetime is all observers need
/// to deduplicate subscriptions.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// An identity-bearing reactive cell participating in dependency tracking.
pub struct Signal<T> {
    cell: Cell<T>,
    id: u64,
}

impl<T: Send + 'static> Signal<T> {
    /// Create a signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self { cell: Cell::new(value), id: next_signal_id() }
    }

    /// The signal's process-unique identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Subscribe the innermost observer running on this thread, once per
    /// observer per signal identity.
    fn track(&self) {
        let Some(observer) = ObserverStack::top() else {
            return;
        };
        if observer.has_dependency(self.id) {
            return;
        }

        let weak: std::sync::Weak<Observer> = Arc::downgrade(&observer);
        let listener = self.cell.react(move |_| {
            if let Some(observer) = weak.upgrade() {
                ObserverStack::schedule(&observer);
            }
        });

        let handle: WeakHandle<T> = self.cell.handle();
        observer.add_dependency(
            self.id,
            Box::new(move || {
                if let Some(guard) = handle.lock() {
                    guard.unreact(listener);
                }
            }),
        );
    }

    /// Tracked read: registers the current observer (if any) as a
    /// dependent, then returns the committed value.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.cell.get()
    }

    /// Tracked borrow without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        self.cell.with(f)
    }

    /// Read without establishing a dependency.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.cell.get()
    }

    /// Borrow without establishing a dependency.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.cell.with(f)
    }

    /// Commit a new value through the cell's notification protocol.
    pub fn set(&self, value: T) -> bool {
        self.cell.set(value)
    }

    /// Compute the next value from the current one, untracked, and commit.
    ///
    /// The current value is cloned out before `f` runs, so `f` may freely
    /// read this signal or others. The read-compute-commit sequence is not
    /// atomic with respect to writers on other threads.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool
    where
        T: Clone,
    {
        let current = self.cell.get();
        self.cell.set(f(&current))
    }

    /// Register a plain (non-tracking) change listener.
    pub fn react(&self, f: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        self.cell.react(f)
    }

    pub fn unreact(&self, id: ListenerId) {
        self.cell.unreact(id)
    }

    /// Open a batched-mutation session on the underlying cell.
    pub fn session(&self) -> Result<Session<T>, SessionError>
    where
        T: Clone,
    {
        self.cell.session()
    }

    /// A durable external reference to the underlying cell.
    pub fn cell_ref(&self) -> CellRef<T> {
        self.cell.cell_ref()
    }
}

impl<T: Default + Send + 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Debug + Clone + Send + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.get_untracked())
            .finish()
    }
}

/// A signal whose value is derived from other signals.
///
/// Owns a scoped observer whose effect recomputes the wrapped signal from
/// the supplied function; whatever signals that function reads become the
/// computed signal's (transitive) dependencies, refreshed on every
/// recompute. Reads of a `ComputedSignal` are tracked reads of the inner
/// signal, so observers depending on it chain naturally.
pub struct ComputedSignal<T> {
    signal: Signal<T>,
    observer: Arc<Observer>,
    _observatory: Observatory,
}

impl<T: Clone + Default + Send + 'static> ComputedSignal<T> {
    /// Wrap a recompute function. Runs it once immediately to seed the
    /// value and discover the initial dependency set.
    pub fn new(compute: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let signal = Signal::new(T::default());
        let target: CellRef<T> = signal.cell_ref();

        let observatory = Observatory::new();
        let observer = observatory.react_to_changes(move || {
            // Written through a ref, not a tracked read: recomputing must
            // not make the observer depend on its own output.
            target.set(compute());
        });

        Self { signal, observer, _observatory: observatory }
    }

    pub fn id(&self) -> u64 {
        self.signal.id()
    }

    /// Tracked read of the derived value.
    pub fn get(&self) -> T {
        self.signal.get()
    }

    /// Tracked borrow of the derived value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.with(f)
    }

    pub fn get_untracked(&self) -> T {
        self.signal.get_untracked()
    }

    /// Register a plain change listener on the derived value.
    pub fn react(&self, f: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        self.signal.react(f)
    }

    pub fn unreact(&self, id: ListenerId) {
        self.signal.unreact(id)
    }

    /// Number of signals the recompute function read on its last run.
    pub fn dependency_count(&self) -> usize {
        self.observer.dependency_count()
    }
}

impl<T: Debug + Clone + Default + Send + 'static> Debug for ComputedSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedSignal")
            .field("id", &self.signal.id)
            .field("value", &self.get_untracked())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn signal_ids_are_unique() {
        let a = Signal::new(0);
        let b = Signal::new(0);
        let c = Signal::new(0);

        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn untracked_read_subscribes_nothing() {
        let signal = Signal::new(5);
        assert_eq!(signal.get_untracked(), 5);
        assert_eq!(signal.cell_ref().get(), Some(5));
    }

    #[test]
    fn signal_update_uses_current_value() {
        let signal = Signal::new(10);
        assert!(signal.update(|v| v + 5));
        assert_eq!(signal.get_untracked(), 15);
    }

    #[test]
    fn update_closure_may_read_the_signal_it_writes() {
        let signal = Signal::new(10);

        // No lock is held while the closure runs, so reading back through
        // the same signal must not deadlock.
        assert!(signal.update(|v| v + signal.get_untracked()));
        assert_eq!(signal.get_untracked(), 20);

        assert!(signal.update(|v| signal.with_untracked(|cur| v + cur)));
        assert_eq!(signal.get_untracked(), 40);
    }

    #[test]
    fn tracked_read_registers_once_per_observer() {
        let signal = Arc::new(Signal::new(1));

        let observatory = Observatory::new();
        let signal_clone = Arc::clone(&signal);
        let observer = observatory.react_to_changes(move || {
            // Two reads of the same signal: one subscription.
            let _ = signal_clone.get();
            let _ = signal_clone.get();
        });

        assert_eq!(observer.dependency_count(), 1);
        let handle = signal.cell_ref().handle();
        assert_eq!(handle.lock().expect("signal alive").listener_count(), 1);
    }

    #[test]
    fn read_outside_observer_tracks_nothing() {
        let signal = Signal::new(1);
        let _ = signal.get();

        // No observer was running, so no listener was registered.
        let handle = signal.cell_ref().handle();
        let guard = handle.lock().expect("signal alive");
        assert_eq!(guard.listener_count(), 0);
    }

    #[test]
    fn computed_seeds_value_at_construction() {
        let base = Arc::new(Signal::new(21));

        let base_clone = Arc::clone(&base);
        let doubled = ComputedSignal::new(move || base_clone.get() * 2);

        assert_eq!(doubled.get_untracked(), 42);
        assert_eq!(doubled.dependency_count(), 1);
    }

    #[test]
    fn dropping_observer_removes_signal_listener() {
        let signal = Arc::new(Signal::new(0));

        let observatory = Observatory::new();
        let signal_clone = Arc::clone(&signal);
        let observer = observatory.react_to_changes(move || {
            let _ = signal_clone.get();
        });

        let handle = signal.cell_ref().handle();
        assert_eq!(handle.lock().expect("signal alive").listener_count(), 1);

        observatory.unreact(&observer);
        drop(observer);
        assert_eq!(handle.lock().expect("signal alive").listener_count(), 0);
    }

    #[test]
    fn write_during_recompute_notifies_plain_listeners() {
        let base = Arc::new(Signal::new(1));
        let notified = Arc::new(AtomicI32::new(0));

        let base_clone = Arc::clone(&base);
        let computed = ComputedSignal::new(move || base_clone.get() + 1);

        let notified_clone = notified.clone();
        computed.react(move |_| {
            notified_clone.fetch_add(1, Ordering::SeqCst);
        });

        // The initial recompute happened before the listener registered.
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(computed.get_untracked(), 2);
    }
}
