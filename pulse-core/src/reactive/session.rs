//! Batched mutation sessions.
//!
//! A [`Session`] gives scoped mutable access to a working copy of a cell's
//! value and commits it through the normal `set` path exactly once, when
//! the session drops. Any number of logical edits inside the scope produce
//! a single notification carrying the final value.
//!
//! While a session is open, its owning thread is marked in context on the
//! target cell, so nested `set` calls against the same cell from the same
//! thread (including from library code the caller happens to use) are
//! rejected instead of producing partial, interleaved notifications.

use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};

use thiserror::Error;
use tracing::warn;

use super::cell::WeakHandle;

/// Why a session could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    /// This thread already has a session (or is inside a notification) on
    /// the target cell. Overlapping same-thread sessions would silently
    /// lose one commit, so opening reports instead.
    #[error("a session is already open for this cell on this thread")]
    AlreadyOpen,

    /// The cell behind the handle no longer exists.
    #[error("the cell backing this handle has been dropped")]
    Gone,
}

/// A scoped, single-writer working copy of a cell's value.
///
/// Derefs to the working copy. A session should stay on the thread that
/// opened it; the in-context mark it holds belongs to that thread.
///
/// # Example
///
/// ```rust,ignore
/// let mut session = cell.session()?;
/// session.name = "new name".into();
/// session.count += 1;
/// drop(session); // one notification with both edits applied
/// ```
pub struct Session<T: Send + 'static> {
    handle: WeakHandle<T>,
    /// `None` only after the commit in `drop`.
    working: Option<T>,
    owner: ThreadId,
}

impl<T: Send + 'static> Session<T> {
    /// Snapshot the value and mark the owning thread in context, as one
    /// atomic step against the cell's lock.
    pub(crate) fn open(handle: WeakHandle<T>) -> Result<Self, SessionError>
    where
        T: Clone,
    {
        let guard = handle.lock().ok_or(SessionError::Gone)?;
        let working = guard.state.begin_session()?;
        drop(guard);

        Ok(Self { handle, working: Some(working), owner: thread::current().id() })
    }

    /// Replace the working copy wholesale, returning the previous one.
    pub fn replace(&mut self, value: T) -> T {
        self.working
            .replace(value)
            .expect("session value present until drop")
    }
}

impl<T: Send + 'static> Deref for Session<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.working.as_ref().expect("session value present until drop")
    }
}

impl<T: Send + 'static> DerefMut for Session<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.working.as_mut().expect("session value present until drop")
    }
}

impl<T: std::fmt::Debug + Send + 'static> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("working", &self.working).finish()
    }
}

impl<T: Send + 'static> Drop for Session<T> {
    fn drop(&mut self) {
        let Some(working) = self.working.take() else {
            return;
        };
        // If the cell died mid-scope there is nothing to commit to.
        if let Some(guard) = self.handle.lock() {
            // Unmark before committing: the commit itself must pass the
            // reentrancy guard.
            guard.state.end_session(self.owner);
            if !guard.set(working) {
                // Reached when the session was dropped on a thread that is
                // itself in context for the cell, i.e. not its opening
                // thread. The batched edits are lost.
                warn!("session commit dropped: the closing thread is in context for the cell");
            }
        }
    }
}
