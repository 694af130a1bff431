//! Typed event bus.
//!
//! Observables across the engine (attribute change streams, manager
//! lifecycle events) are typed buses: registration returns a detach
//! handle and handlers fire in registration order within one emit. The
//! engine is single-threaded cooperative, so handlers are plain `Fn`
//! closures behind `Rc`.

use std::cell::RefCell;
use std::rc::Rc;

/// Handle returned by [`EventBus::register`]; detaches the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandle(u64);

/// A single-threaded multi-consumer event bus.
pub struct EventBus<T> {
    inner: RefCell<BusInner<T>>,
}

struct BusInner<T> {
    next_id: u64,
    handlers: Vec<(u64, Rc<dyn Fn(&T)>)>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(BusInner {
                next_id: 0,
                handlers: Vec::new(),
            }),
        }
    }

    /// Registers a handler; it fires on every emit until detached.
    pub fn register(&self, handler: impl Fn(&T) + 'static) -> EventHandle {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.push((id, Rc::new(handler)));
        EventHandle(id)
    }

    /// Removes a handler; safe to call with a stale handle.
    pub fn detach(&self, handle: EventHandle) {
        self.inner
            .borrow_mut()
            .handlers
            .retain(|(id, _)| *id != handle.0);
    }

    /// Emits to every handler, in registration order.
    ///
    /// The handler list is snapshotted first, so a handler may register
    /// or detach without poisoning the iteration; late registrations see
    /// only subsequent emits.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Rc<dyn Fn(&T)>> = self
            .inner
            .borrow()
            .handlers
            .iter()
            .map(|(_, h)| Rc::clone(h))
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }

    /// Number of live handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.borrow().handlers.len()
    }
}

impl<T> std::fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_fire_in_registration_order() {
        let bus: EventBus<u32> = EventBus::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o1 = Rc::clone(&order);
        bus.register(move |v| o1.borrow_mut().push(("first", *v)));
        let o2 = Rc::clone(&order);
        bus.register(move |v| o2.borrow_mut().push(("second", *v)));

        bus.emit(&7);
        assert_eq!(*order.borrow(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn detach_stops_delivery() {
        let bus: EventBus<u32> = EventBus::new();
        let count = Rc::new(RefCell::new(0));

        let c = Rc::clone(&count);
        let handle = bus.register(move |_| *c.borrow_mut() += 1);
        bus.emit(&1);
        bus.detach(handle);
        bus.emit(&2);
        assert_eq!(*count.borrow(), 1);

        // Stale detach is a no-op.
        bus.detach(handle);
    }

    #[test]
    fn handler_may_detach_during_emit() {
        let bus: Rc<EventBus<u32>> = Rc::new(EventBus::new());
        let handle = Rc::new(RefCell::new(None));

        let bus2 = Rc::clone(&bus);
        let handle2 = Rc::clone(&handle);
        let h = bus.register(move |_| {
            if let Some(h) = handle2.borrow_mut().take() {
                bus2.detach(h);
            }
        });
        *handle.borrow_mut() = Some(h);

        bus.emit(&1);
        assert_eq!(bus.handler_count(), 0);
    }
}
