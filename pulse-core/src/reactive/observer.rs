//! Observer Scheduling
//!
//! An [`Observer`] is an opaque unit of reactive computation: an effect
//! closure plus the set of signal identities it read on its last run, each
//! paired with an unsubscribe action. The dependency set is rebuilt from
//! scratch on every run, so it always reflects the code paths actually
//! executed.
//!
//! [`ObserverStack`] is the scheduler. The stack of currently executing
//! observers is thread-local: a signal read is always attributed to the
//! innermost observer running on the *calling* thread, never to one running
//! elsewhere. The queue of observers pending re-run is process-wide and is
//! drained only by an explicit [`ObserverStack::update`] call from the host
//! with no background thread or timer. Hosts typically call it once
//! per frame, tick, or event-loop turn.
//!
//! [`Observatory`] ties a group of observers' lifetimes to a scope:
//! dropping it (or calling `unreact`) releases the observers, whose own
//! teardown unsubscribes every remaining dependency.

use std::cell::RefCell;
use std::fmt::Debug;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::warn;

/// A callable that undoes exactly one subscription. Stored type-erased so
/// a single observer can depend on signals of many value types.
type Unsubscribe = Box<dyn Fn() + Send + Sync>;

thread_local! {
    /// Observers currently executing on this thread, innermost last.
    static ACTIVE: RefCell<Vec<Weak<Observer>>> = const { RefCell::new(Vec::new()) };
}

/// Observers pending re-run, appended by signal listeners from any thread.
static SCHEDULED: Mutex<Vec<Weak<Observer>>> = Mutex::new(Vec::new());

/// An effect closure plus its last-run dependency set.
///
/// Reference-counted; dropping the last strong reference unsubscribes from
/// every remaining dependency.
pub struct Observer {
    effect: Box<dyn Fn() + Send + Sync>,
    /// Signal id → unsubscribe action. Insertion-ordered so teardown
    /// mirrors discovery order.
    deps: Mutex<IndexMap<u64, Unsubscribe>>,
}

impl Observer {
    fn new(effect: impl Fn() + Send + Sync + 'static) -> Self {
        Self { effect: Box::new(effect), deps: Mutex::new(IndexMap::new()) }
    }

    /// Whether this observer already subscribed to the given signal
    /// identity during its current run.
    pub(crate) fn has_dependency(&self, signal_id: u64) -> bool {
        self.deps.lock().contains_key(&signal_id)
    }

    /// Record a subscription and the action that undoes it.
    pub(crate) fn add_dependency(&self, signal_id: u64, unsubscribe: Unsubscribe) {
        self.deps.lock().insert(signal_id, unsubscribe);
    }

    /// Undo every subscription. Called before each re-run (the effect
    /// re-discovers a fresh set) and on drop.
    fn clear_dependencies(&self) {
        let drained: Vec<Unsubscribe> = {
            let mut deps = self.deps.lock();
            deps.drain(..).map(|(_, unsubscribe)| unsubscribe).collect()
        };
        // Unsubscribe actions lock cells; never call them under our lock.
        for unsubscribe in drained {
            unsubscribe();
        }
    }

    /// Number of signals this observer currently depends on.
    pub fn dependency_count(&self) -> usize {
        self.deps.lock().len()
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.clear_dependencies();
    }
}

impl Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

/// The process-wide scheduler state: per-thread active stacks plus one
/// shared queue of pending re-runs.
pub struct ObserverStack;

impl ObserverStack {
    /// Allocate an observer. Does not run it.
    pub fn create(effect: impl Fn() + Send + Sync + 'static) -> Arc<Observer> {
        Arc::new(Observer::new(effect))
    }

    /// Execute an observer: clear its previous subscriptions, run its
    /// effect with this observer on top of the active stack (so signal
    /// reads re-populate the dependency set), pop it off.
    ///
    /// Returns `false` without running if the observer is already on this
    /// thread's active stack; this is the guard against circular execution
    /// through shared dependencies.
    pub fn run(observer: &Arc<Observer>) -> bool {
        let needle = Arc::downgrade(observer);
        let circular = ACTIVE.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.retain(|entry| entry.strong_count() > 0);
            stack.iter().any(|entry| entry.ptr_eq(&needle))
        });
        if circular {
            warn!("skipped observer run: circular execution on this thread");
            return false;
        }

        ACTIVE.with(|stack| stack.borrow_mut().push(needle));
        observer.clear_dependencies();

        // Pop on unwind too, or the stack would misattribute reads after
        // a panicking effect.
        struct PopGuard;
        impl Drop for PopGuard {
            fn drop(&mut self) {
                ACTIVE.with(|stack| {
                    stack.borrow_mut().pop();
                });
            }
        }
        let _guard = PopGuard;

        (observer.effect)();
        true
    }

    /// The innermost live observer executing on this thread, if any. Dead
    /// entries encountered on the way are pruned.
    pub fn top() -> Option<Arc<Observer>> {
        ACTIVE.with(|stack| {
            let mut stack = stack.borrow_mut();
            while let Some(entry) = stack.last() {
                if let Some(observer) = entry.upgrade() {
                    return Some(observer);
                }
                stack.pop();
            }
            None
        })
    }

    /// Queue an observer for the next drain. Duplicates are allowed;
    /// re-runs are at-least-once.
    pub fn schedule(observer: &Arc<Observer>) {
        SCHEDULED.lock().push(Arc::downgrade(observer));
    }

    /// Drain the queue, re-running every still-live observer in it.
    ///
    /// Must be called by the host on its own cadence; nothing in the
    /// library calls it. Observers scheduled while the drain is running
    /// wait for the next drain.
    pub fn update() {
        let drained: Vec<Weak<Observer>> = std::mem::take(&mut *SCHEDULED.lock());
        for entry in drained {
            if let Some(observer) = entry.upgrade() {
                Self::run(&observer);
            }
        }
    }
}

/// An owning collection tying a group of observers' lifetimes to a scope.
#[derive(Default)]
pub struct Observatory {
    observers: Mutex<Vec<Arc<Observer>>>,
}

impl Observatory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an observer for the effect, retain it, and run it once to
    /// discover its initial dependency set.
    pub fn react_to_changes(&self, effect: impl Fn() + Send + Sync + 'static) -> Arc<Observer> {
        let observer = ObserverStack::create(effect);
        self.observers.lock().push(Arc::clone(&observer));
        ObserverStack::run(&observer);
        observer
    }

    /// Release a retained observer. Once the last reference drops, its
    /// subscriptions are torn down.
    pub fn unreact(&self, observer: &Arc<Observer>) {
        self.observers
            .lock()
            .retain(|retained| !Arc::ptr_eq(retained, observer));
    }

    /// Number of observers currently retained.
    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }
}

impl Debug for Observatory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observatory").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn run_executes_effect_and_clears_stack() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let observer = ObserverStack::create(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(ObserverStack::run(&observer));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(ObserverStack::top().is_none());
    }

    #[test]
    fn top_sees_running_observer() {
        let observed_top = Arc::new(Mutex::new(false));

        let observer = ObserverStack::create({
            let observed_top = observed_top.clone();
            move || {
                *observed_top.lock() = ObserverStack::top().is_some();
            }
        });

        ObserverStack::run(&observer);
        assert!(*observed_top.lock());
        assert!(ObserverStack::top().is_none());
    }

    #[test]
    fn nested_runs_attribute_to_innermost() {
        let inner_was_top = Arc::new(Mutex::new(false));
        let outer_top_restored = Arc::new(Mutex::new(false));

        let flag = inner_was_top.clone();
        let restored = outer_top_restored.clone();
        let outer = ObserverStack::create(move || {
            let holder: Arc<Mutex<Option<Arc<Observer>>>> = Arc::new(Mutex::new(None));
            let holder_clone = holder.clone();
            let flag = flag.clone();
            let inner = ObserverStack::create(move || {
                if let (Some(top), Some(me)) =
                    (ObserverStack::top(), holder_clone.lock().as_ref())
                {
                    *flag.lock() = Arc::ptr_eq(&top, me);
                }
            });
            *holder.lock() = Some(Arc::clone(&inner));
            ObserverStack::run(&inner);
            holder.lock().take();

            // Once the inner run pops, this observer is top again.
            *restored.lock() = ObserverStack::top().is_some();
        });

        ObserverStack::run(&outer);
        assert!(*inner_was_top.lock());
        assert!(*outer_top_restored.lock());
    }

    #[test]
    fn circular_run_is_skipped() {
        let runs = Arc::new(AtomicI32::new(0));
        let holder: Arc<Mutex<Option<Arc<Observer>>>> = Arc::new(Mutex::new(None));

        let observer = ObserverStack::create({
            let runs = runs.clone();
            let holder = holder.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                // Attempt to re-enter ourselves synchronously.
                if let Some(me) = holder.lock().as_ref() {
                    assert!(!ObserverStack::run(me));
                }
            }
        });
        *holder.lock() = Some(Arc::clone(&observer));

        assert!(ObserverStack::run(&observer));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Drop the self-reference so the observer can be freed.
        holder.lock().take();
    }

    #[test]
    fn run_clears_previous_dependencies() {
        let torn_down = Arc::new(AtomicI32::new(0));

        let observer = ObserverStack::create(|| {});
        let torn_down_clone = torn_down.clone();
        observer.add_dependency(
            7,
            Box::new(move || {
                torn_down_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(observer.dependency_count(), 1);

        ObserverStack::run(&observer);
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
        assert_eq!(observer.dependency_count(), 0);
    }

    #[test]
    fn drop_unsubscribes_remaining_dependencies() {
        let torn_down = Arc::new(AtomicI32::new(0));

        let observer = ObserverStack::create(|| {});
        let torn_down_clone = torn_down.clone();
        observer.add_dependency(
            1,
            Box::new(move || {
                torn_down_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        drop(observer);
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observatory_scopes_observer_lifetimes() {
        let observatory = Observatory::new();
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let observer = observatory.react_to_changes(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Ran once at registration.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(observatory.len(), 1);

        observatory.unreact(&observer);
        assert!(observatory.is_empty());
    }
}
