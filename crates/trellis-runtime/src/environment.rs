//! Typed service locator.
//!
//! The environment owns the node's service singletons. Keys are types,
//! known at build time; there is no stringly-typed registry. Shared
//! services are additionally ref-counted through [`SharedServices`]: the
//! last lease dropping triggers the service's teardown.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Service registry keyed by type.
#[derive(Default)]
pub struct Environment {
    services: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the service of type `T`.
    pub fn set<T: 'static>(&self, service: Rc<T>) {
        self.services
            .borrow_mut()
            .insert(TypeId::of::<T>(), service);
    }

    /// Looks the service of type `T` up.
    pub fn get<T: 'static>(&self) -> Option<Rc<T>> {
        self.services
            .borrow()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }

    /// Removes the service of type `T`.
    pub fn remove<T: 'static>(&self) -> Option<Rc<T>> {
        self.services
            .borrow_mut()
            .remove(&TypeId::of::<T>())
            .and_then(|any| any.downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.services.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.borrow().is_empty()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("services", &self.len())
            .finish()
    }
}

struct SharedEntry {
    service: Rc<dyn Any>,
    leases: usize,
    teardown: Box<dyn FnOnce(Rc<dyn Any>)>,
}

/// Ref-counted shared services with last-drop teardown.
#[derive(Default, Clone)]
pub struct SharedServices {
    inner: Rc<RefCell<HashMap<TypeId, SharedEntry>>>,
}

impl SharedServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the shared service of type `T`, constructing it on first
    /// use. Every acquisition returns a lease; the service tears down
    /// when the last lease drops.
    pub fn acquire<T: 'static>(
        &self,
        factory: impl FnOnce() -> T,
        teardown: impl FnOnce(Rc<T>) + 'static,
    ) -> ServiceLease<T> {
        let mut inner = self.inner.borrow_mut();
        let entry = inner.entry(TypeId::of::<T>()).or_insert_with(|| SharedEntry {
            service: Rc::new(factory()),
            leases: 0,
            teardown: Box::new(move |any| {
                if let Ok(service) = any.downcast::<T>() {
                    teardown(service);
                }
            }),
        });
        entry.leases += 1;
        let service = Rc::clone(&entry.service)
            .downcast::<T>()
            .expect("entry keyed by TypeId");
        ServiceLease {
            service,
            registry: Rc::clone(&self.inner),
        }
    }

    /// Live lease count for a service type.
    pub fn lease_count<T: 'static>(&self) -> usize {
        self.inner
            .borrow()
            .get(&TypeId::of::<T>())
            .map_or(0, |e| e.leases)
    }
}

/// A counted handle to a shared service.
pub struct ServiceLease<T: 'static> {
    service: Rc<T>,
    registry: Rc<RefCell<HashMap<TypeId, SharedEntry>>>,
}

impl<T> std::ops::Deref for ServiceLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.service
    }
}

impl<T> Drop for ServiceLease<T> {
    fn drop(&mut self) {
        let mut registry = self.registry.borrow_mut();
        let Some(entry) = registry.get_mut(&TypeId::of::<T>()) else {
            return;
        };
        entry.leases -= 1;
        if entry.leases == 0 {
            let entry = registry.remove(&TypeId::of::<T>()).expect("present above");
            drop(registry);
            (entry.teardown)(entry.service);
        }
    }
}
