//! Durable external references.
//!
//! A [`CellRef`] lets code outside a cell's owner hold onto it across
//! time: every operation locks the underlying [`WeakHandle`] first, so a
//! reference safely outlives the cell it points at. Listeners registered
//! through a `CellRef` are owned by it and torn down when it drops,
//! preventing leaked registrations when the referencing side disappears
//! first.

use parking_lot::Mutex;

use super::cell::{ListenerId, WeakHandle};
use super::session::{Session, SessionError};

/// A scoped, non-owning reference to a cell plus the listener
/// registrations made through it.
pub struct CellRef<T: Send + 'static> {
    handle: WeakHandle<T>,
    owned: Mutex<Vec<ListenerId>>,
}

impl<T: Send + 'static> CellRef<T> {
    pub(crate) fn new(handle: WeakHandle<T>) -> Self {
        Self { handle, owned: Mutex::new(Vec::new()) }
    }

    /// Current value, or `None` if the cell is gone.
    pub fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.handle.lock().map(|guard| guard.get())
    }

    /// Borrow the current value, or `None` if the cell is gone.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.handle.lock().map(|guard| guard.with(f))
    }

    /// Commit a new value. Returns `false` if the cell is gone or the
    /// write was rejected by the reentrancy guard.
    pub fn set(&self, value: T) -> bool {
        match self.handle.lock() {
            Some(guard) => guard.set(value),
            None => false,
        }
    }

    /// Register a listener owned by this reference; it is unregistered
    /// when this reference drops. Returns `None` if the cell is gone.
    pub fn react(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Option<ListenerId> {
        let guard = self.handle.lock()?;
        let id = guard.react(f);
        self.owned.lock().push(id);
        Some(id)
    }

    /// Remove a listener registered through this reference. No-op if the
    /// cell is gone or the listener was already removed.
    pub fn unreact(&self, id: ListenerId) {
        if let Some(guard) = self.handle.lock() {
            guard.unreact(id);
        }
        self.owned.lock().retain(|owned| *owned != id);
    }

    /// Open a batched-mutation session on the target.
    pub fn session(&self) -> Result<Session<T>, SessionError>
    where
        T: Clone,
    {
        Session::open(self.handle.clone())
    }

    /// The underlying handle, for callers that need raw lock access.
    pub fn handle(&self) -> WeakHandle<T> {
        self.handle.clone()
    }

    /// Whether the target still exists right now.
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }
}

/// Cloning exists so a reference can be captured by a closure: the clone
/// points at the same live target (if any) but starts with zero owned
/// listeners. Listener ownership is never copied.
impl<T: Send + 'static> Clone for CellRef<T> {
    fn clone(&self) -> Self {
        Self::new(self.handle.clone())
    }
}

impl<T: Send + 'static> Drop for CellRef<T> {
    fn drop(&mut self) {
        if let Some(guard) = self.handle.lock() {
            for id in self.owned.lock().drain(..) {
                guard.unreact(id);
            }
        }
    }
}
