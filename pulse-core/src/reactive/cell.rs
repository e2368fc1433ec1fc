//! Reactive Cell Implementation
//!
//! A Cell is the fundamental notifying value holder. It owns a value and
//! a list of change listeners, and guarantees that listeners observe every
//! committed write.
//!
//! # Commit Protocol
//!
//! 1. The writing thread is marked "in context" on the cell. A thread that
//!    is already in context (i.e. a listener writing back into its own
//!    source cell) has its write rejected instead of recursing.
//!
//! 2. The listener list is snapshotted and the cell's lock is released, so
//!    listeners run without any lock held and may freely call back into
//!    the cell.
//!
//! 3. Listeners receive a borrow of the *incoming* value while the stored
//!    value is still the old one. A listener can compare its argument
//!    against `get()` to see what is about to change.
//!
//! 4. The value is committed and the thread is unmarked.
//!
//! # Lifetime Safety
//!
//! A cell's state lives behind a single strong `Arc` owned by the `Cell`
//! itself. Everything else references it through [`WeakHandle`]: a
//! `lock()` that wins the race against the cell being dropped yields a
//! [`CellGuard`] that keeps the state valid for the duration of one
//! operation; a `lock()` that loses observes "gone". Because the state
//! allocation never moves, a plain Rust move of the `Cell` leaves every
//! outstanding handle valid.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::warn;

use super::cell_ref::CellRef;
use super::session::{Session, SessionError};

/// Stable identity of a registered listener.
///
/// Identities are per-cell and monotonically increasing; they stay valid
/// for unregistration no matter how many other listeners are added or
/// removed in the meantime. A `ListenerId` is never reused by its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct CellInner<T> {
    /// The committed value.
    value: T,

    /// Change listeners in registration order. Most cells carry a handful
    /// at most, hence the inline storage.
    listeners: SmallVec<[(ListenerId, Listener<T>); 2]>,

    /// Threads currently inside this cell's notification or session scope.
    contexts: HashSet<ThreadId>,

    /// Next listener identity to hand out.
    next_listener: u64,
}

/// Shared state of a cell. `Cell` holds the only strong reference;
/// handles hold weak ones.
pub(crate) struct CellState<T> {
    inner: Mutex<CellInner<T>>,
}

impl<T: Send + 'static> CellState<T> {
    fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(CellInner {
                value,
                listeners: SmallVec::new(),
                contexts: HashSet::new(),
                next_listener: 0,
            }),
        }
    }

    pub(crate) fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.lock().value.clone()
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let inner = self.inner.lock();
        f(&inner.value)
    }

    /// The commit protocol described in the module docs. Returns false when
    /// the calling thread is already in context for this cell.
    pub(crate) fn set(&self, value: T) -> bool {
        let tid = thread::current().id();

        let snapshot: Vec<Listener<T>> = {
            let mut inner = self.inner.lock();
            if inner.contexts.contains(&tid) {
                warn!("rejected write: cell is already notifying on this thread");
                return false;
            }
            inner.contexts.insert(tid);
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        // Commits and unmarks on scope exit, including a listener unwind.
        // A panic must not leave this thread permanently in context, or
        // every later write from it would be rejected.
        let commit = CommitGuard { inner: &self.inner, tid, value: Some(value) };

        // No lock held: listeners may read the cell (seeing the old value)
        // or register/unregister other listeners.
        {
            let value = commit.value.as_ref().expect("value held until commit");
            for listener in &snapshot {
                listener(value);
            }
        }

        drop(commit);
        true
    }

    pub(crate) fn react(&self, f: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let mut inner = self.inner.lock();
        let id = ListenerId(inner.next_listener);
        inner.next_listener += 1;
        inner.listeners.push((id, Arc::new(f)));
        id
    }

    pub(crate) fn unreact(&self, id: ListenerId) {
        self.inner.lock().listeners.retain(|(lid, _)| *lid != id);
    }

    pub(crate) fn in_context(&self) -> bool {
        self.inner
            .lock()
            .contexts
            .contains(&thread::current().id())
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Marks the calling thread in context and snapshots the value, as one
    /// atomic step. Errors if this thread already has a session (or a
    /// notification) open on this cell.
    pub(crate) fn begin_session(&self) -> Result<T, SessionError>
    where
        T: Clone,
    {
        let tid = thread::current().id();
        let mut inner = self.inner.lock();
        if inner.contexts.contains(&tid) {
            return Err(SessionError::AlreadyOpen);
        }
        inner.contexts.insert(tid);
        Ok(inner.value.clone())
    }

    pub(crate) fn end_session(&self, owner: ThreadId) {
        self.inner.lock().contexts.remove(&owner);
    }
}

/// Stores the incoming value and clears the writer's in-context mark when
/// dropped, whether the notification loop finished or unwound.
struct CommitGuard<'a, T> {
    inner: &'a Mutex<CellInner<T>>,
    tid: ThreadId,
    value: Option<T>,
}

impl<T> Drop for CommitGuard<'_, T> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        inner.contexts.remove(&self.tid);
        if let Some(value) = self.value.take() {
            inner.value = value;
        }
    }
}

/// A mutable value cell that notifies registered listeners on change.
///
/// # Example
///
/// ```rust,ignore
/// let cell = Cell::new(0);
///
/// let listener = cell.react(|new| println!("changed to {new}"));
///
/// cell.set(5); // prints "changed to 5"
/// cell.unreact(listener);
/// ```
///
/// `Cell` is the sole owner of its state. Dropping it invalidates every
/// outstanding [`WeakHandle`], [`CellRef`] and [`Session`]; their next
/// operation observes "gone" rather than dangling.
pub struct Cell<T> {
    state: Arc<CellState<T>>,
}

impl<T: Send + 'static> Cell<T> {
    /// Create a new cell with the given initial value.
    pub fn new(value: T) -> Self {
        Self { state: Arc::new(CellState::new(value)) }
    }

    /// Get a clone of the current committed value.
    ///
    /// Never observes a mid-commit value: during a `set`, readers see the
    /// old value until the writer finishes.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.state.get()
    }

    /// Borrow the current committed value without cloning.
    ///
    /// The cell's lock is held for the duration of `f`; do not call back
    /// into this cell from inside it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.state.with(f)
    }

    /// Commit a new value, invoking every listener with a borrow of it
    /// before the store becomes visible to readers.
    ///
    /// Returns `false` (and logs a warning) if the calling thread is
    /// already inside this cell's own notification (the reentrancy guard).
    /// Writes from other threads serialize and are never rejected.
    pub fn set(&self, value: T) -> bool {
        self.state.set(value)
    }

    /// Register a change listener. The returned identity stays valid for
    /// [`Cell::unreact`] regardless of other registrations.
    pub fn react(&self, f: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        self.state.react(f)
    }

    /// Remove a listener. No-op if it was already removed.
    pub fn unreact(&self, id: ListenerId) {
        self.state.unreact(id)
    }

    /// Open a batched-mutation session: any number of edits to the working
    /// copy commit as exactly one notification when the session drops.
    ///
    /// Errors with [`SessionError::AlreadyOpen`] if this thread already has
    /// a session open on this cell.
    pub fn session(&self) -> Result<Session<T>, SessionError>
    where
        T: Clone,
    {
        Session::open(self.handle())
    }

    /// A non-owning handle to this cell.
    pub fn handle(&self) -> WeakHandle<T> {
        WeakHandle { state: Arc::downgrade(&self.state) }
    }

    /// A durable external reference that also owns any listener
    /// registrations made through it.
    pub fn cell_ref(&self) -> CellRef<T> {
        CellRef::new(self.handle())
    }

    /// Whether the calling thread is currently inside this cell's
    /// notification or an open session.
    pub fn in_context(&self) -> bool {
        self.state.in_context()
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.state.listener_count()
    }
}

impl<T: Default + Send + 'static> Default for Cell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Cloning a cell clones the *value* into an independent cell. Listeners
/// and handles are not carried over.
impl<T: Clone + Send + 'static> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl<T: Debug + Clone + Send + 'static> Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("value", &self.get())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

/// A nullable, non-owning reference to a cell.
///
/// `lock()` either yields a [`CellGuard`] holding the target alive for one
/// operation, or `None` once the owning [`Cell`] has been dropped. The
/// liveness check is race-free against concurrent destruction: exactly one
/// of "guard obtained" and "cell freed" wins.
pub struct WeakHandle<T> {
    state: Weak<CellState<T>>,
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone() }
    }
}

impl<T: Send + 'static> WeakHandle<T> {
    /// Acquire the target, keeping it valid until the guard is released.
    pub fn lock(&self) -> Option<CellGuard<T>> {
        self.state.upgrade().map(|state| CellGuard { state })
    }

    /// Whether the target still exists right now. Prefer [`WeakHandle::lock`]
    /// for anything beyond diagnostics; the answer can be stale by the time
    /// it is observed.
    pub fn is_live(&self) -> bool {
        self.state.strong_count() > 0
    }
}

/// Exclusive-use accessor produced by a successful [`WeakHandle::lock`].
///
/// Holds the cell state alive for the duration of one operation, matching
/// the contract that a cell's teardown serializes against in-flight handle
/// accesses.
pub struct CellGuard<T> {
    pub(crate) state: Arc<CellState<T>>,
}

impl<T: Send + 'static> CellGuard<T> {
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.state.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.state.with(f)
    }

    pub fn set(&self, value: T) -> bool {
        self.state.set(value)
    }

    pub fn react(&self, f: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        self.state.react(f)
    }

    pub fn unreact(&self, id: ListenerId) {
        self.state.unreact(id)
    }

    pub fn session(&self) -> Result<Session<T>, SessionError>
    where
        T: Clone,
    {
        Session::open(self.handle())
    }

    pub fn in_context(&self) -> bool {
        self.state.in_context()
    }

    pub fn listener_count(&self) -> usize {
        self.state.listener_count()
    }

    pub fn handle(&self) -> WeakHandle<T> {
        WeakHandle { state: Arc::downgrade(&self.state) }
    }
}
