//! Cancellation scopes and abort signals.
//!
//! A [`LifetimeOwner`] is a node in a tree of cancellation scopes:
//! aborting a parent aborts its children. Workers attach to an owner;
//! the owner completes when every worker has finished. Long-running
//! primitives (subscriptions, BDX transfers, queue waits) take an
//! [`AbortSignal`] and close cleanly when it fires; timeouts are
//! scheduled aborts driven by the caller's clock.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use trellis_types::{EventBus, EventHandle};

/// A cancellation token.
///
/// Cloning shares the underlying state; any clone observing the abort
/// sees every clone aborted.
#[derive(Clone, Default)]
pub struct AbortSignal {
    aborted: Rc<Cell<bool>>,
    observers: Rc<EventBus<()>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.get()
    }

    /// Fires the signal. Idempotent; observers run once, and a
    /// reentrant abort from an observer is a no-op.
    pub fn abort(&self) {
        if self.aborted.replace(true) {
            return;
        }
        self.observers.emit(&());
    }

    /// Registers an observer; fires immediately if already aborted.
    pub fn on_abort(&self, handler: impl Fn() + 'static) -> EventHandle {
        if self.is_aborted() {
            handler();
        }
        self.observers.register(move |()| handler())
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

struct OwnerState {
    signal: AbortSignal,
    workers: RefCell<usize>,
}

/// A tree of cancellation scopes with worker tracking.
pub struct LifetimeOwner {
    state: Rc<OwnerState>,
}

impl LifetimeOwner {
    /// The root scope of a process or node.
    pub fn root() -> Self {
        Self {
            state: Rc::new(OwnerState {
                signal: AbortSignal::new(),
                workers: RefCell::new(0),
            }),
        }
    }

    /// Spawns a child scope; it dies with this owner.
    ///
    /// The link is the abort chain alone: parents hold no owning
    /// references to children, so dropping a child costs nothing.
    pub fn child(&mut self) -> LifetimeOwner {
        let child = LifetimeOwner::root();
        let child_signal = child.state.signal.clone();
        self.state.signal.on_abort(move || child_signal.abort());
        child
    }

    /// The owner's abort signal, for threading through primitives.
    pub fn signal(&self) -> AbortSignal {
        self.state.signal.clone()
    }

    /// Aborts this scope and, transitively, its children.
    pub fn abort(&self) {
        self.state.signal.abort();
    }

    /// Attaches a worker; the owner completes when all guards dropped.
    pub fn attach_worker(&self) -> WorkerGuard {
        *self.state.workers.borrow_mut() += 1;
        WorkerGuard {
            state: Rc::clone(&self.state),
        }
    }

    /// True when no worker is still attached.
    pub fn is_complete(&self) -> bool {
        *self.state.workers.borrow() == 0
    }
}

impl std::fmt::Debug for LifetimeOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifetimeOwner")
            .field("aborted", &self.state.signal.is_aborted())
            .field("workers", &*self.state.workers.borrow())
            .finish()
    }
}

/// Keeps an owner incomplete while its work runs.
pub struct WorkerGuard {
    state: Rc<OwnerState>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        *self.state.workers.borrow_mut() -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_idempotent_and_observable() {
        let signal = AbortSignal::new();
        let count = Rc::new(RefCell::new(0));
        let c = Rc::clone(&count);
        signal.on_abort(move || *c.borrow_mut() += 1);

        assert!(!signal.is_aborted());
        signal.abort();
        signal.abort();
        assert!(signal.is_aborted());
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn late_observer_fires_immediately() {
        let signal = AbortSignal::new();
        signal.abort();
        let fired = Rc::new(RefCell::new(false));
        let f = Rc::clone(&fired);
        signal.on_abort(move || *f.borrow_mut() = true);
        assert!(*fired.borrow());
    }

    #[test]
    fn children_die_with_their_parent() {
        let mut root = LifetimeOwner::root();
        let child = root.child();
        let grandchild_signal = {
            let mut c = root.child();
            c.child().signal()
        };

        root.abort();
        assert!(child.signal().is_aborted());
        assert!(grandchild_signal.is_aborted());
    }

    #[test]
    fn owner_completes_when_workers_finish() {
        let owner = LifetimeOwner::root();
        assert!(owner.is_complete());
        let a = owner.attach_worker();
        let b = owner.attach_worker();
        assert!(!owner.is_complete());
        drop(a);
        assert!(!owner.is_complete());
        drop(b);
        assert!(owner.is_complete());
    }
}
