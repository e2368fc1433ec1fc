//! A reactive vector.
//!
//! [`VecCell`] wraps `Cell<Vec<T>>` and routes every edit through a
//! [`Session`](crate::reactive::Session), so pushes, removals, and index
//! assignments each commit as a single notification carrying the whole
//! updated vector.

use std::fmt::Debug;

use crate::reactive::{Cell, CellRef, ListenerId, Session, SessionError};

/// A mutable vector that notifies listeners on every edit.
///
/// Index-based operations follow `Vec` semantics (out-of-range panics for
/// `insert`/`remove`/`set_at`, `None` for `get`). Mutations error with
/// [`SessionError`] when called re-entrantly from the cell's own listener
/// on the same thread.
pub struct VecCell<T> {
    cell: Cell<Vec<T>>,
}

impl<T: Clone + Send + 'static> VecCell<T> {
    pub fn new() -> Self {
        Self { cell: Cell::new(Vec::new()) }
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        Self { cell: Cell::new(items) }
    }

    /// Append an element. One notification.
    pub fn push(&self, value: T) -> Result<(), SessionError> {
        let mut session = self.cell.session()?;
        session.push(value);
        Ok(())
    }

    /// Remove and return the last element. One notification even when the
    /// vector was already empty.
    pub fn pop(&self) -> Result<Option<T>, SessionError> {
        let mut session = self.cell.session()?;
        Ok(session.pop())
    }

    /// Insert at `index`, shifting later elements. Panics if `index > len`.
    pub fn insert(&self, index: usize, value: T) -> Result<(), SessionError> {
        let mut session = self.cell.session()?;
        session.insert(index, value);
        Ok(())
    }

    /// Remove and return the element at `index`. Panics if out of range.
    pub fn remove(&self, index: usize) -> Result<T, SessionError> {
        let mut session = self.cell.session()?;
        Ok(session.remove(index))
    }

    /// Overwrite the element at `index`. Panics if out of range.
    pub fn set_at(&self, index: usize, value: T) -> Result<(), SessionError> {
        let mut session = self.cell.session()?;
        session[index] = value;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        let mut session = self.cell.session()?;
        session.clear();
        Ok(())
    }

    pub fn resize(&self, new_len: usize) -> Result<(), SessionError>
    where
        T: Default,
    {
        let mut session = self.cell.session()?;
        session.resize_with(new_len, T::default);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cell.with(|v| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.cell.with(|v| v.is_empty())
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.cell.with(|v| v.get(index).cloned())
    }

    pub fn first(&self) -> Option<T> {
        self.cell.with(|v| v.first().cloned())
    }

    pub fn last(&self) -> Option<T> {
        self.cell.with(|v| v.last().cloned())
    }

    /// Borrow the whole vector for reading.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        self.cell.with(|v| f(v))
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.cell.get()
    }

    /// Register a listener invoked with the full updated vector.
    pub fn react(&self, f: impl Fn(&Vec<T>) + Send + Sync + 'static) -> ListenerId {
        self.cell.react(f)
    }

    pub fn unreact(&self, id: ListenerId) {
        self.cell.unreact(id)
    }

    /// Open a session for a multi-edit batch over the vector itself.
    pub fn session(&self) -> Result<Session<Vec<T>>, SessionError> {
        self.cell.session()
    }

    pub fn cell_ref(&self) -> CellRef<Vec<T>> {
        self.cell.cell_ref()
    }
}

impl<T: Clone + Send + 'static> Default for VecCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> From<Vec<T>> for VecCell<T> {
    fn from(items: Vec<T>) -> Self {
        Self::from_vec(items)
    }
}

impl<T: Debug + Clone + Send + 'static> Debug for VecCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.cell.with(|v| f.debug_list().entries(v.iter()).finish())
    }
}
