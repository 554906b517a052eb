//! Single-threaded listener lists.
//!
//! Every collaborator in this crate notifies through an [`Emitter`].
//! Registering returns a [`Subscription`] that unregisters the listener
//! when dropped, so owners release listeners simply by dropping them.
//!
//! Listeners may register, unregister or emit re-entrantly: `emit`
//! iterates over a snapshot of the listener list and never holds a
//! borrow while calling out.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type Callback<E, R> = Rc<dyn Fn(&E) -> R>;

struct Listeners<E, R> {
    next_id: Cell<u64>,
    entries: RefCell<Vec<(u64, Callback<E, R>)>>,
}

/// A list of listeners for events of type `E` that return `R`.
pub struct Emitter<E: 'static, R: 'static = ()> {
    listeners: Rc<Listeners<E, R>>,
}

impl<E: 'static, R: 'static> Emitter<E, R> {
    pub fn new() -> Self {
        Self {
            listeners: Rc::new(Listeners {
                next_id: Cell::new(0),
                entries: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&E) -> R + 'static) -> Subscription {
        let id = self.listeners.next_id.get();
        self.listeners.next_id.set(id + 1);
        self.listeners
            .entries
            .borrow_mut()
            .push((id, Rc::new(listener)));

        let weak: Weak<Listeners<E, R>> = Rc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.entries.borrow_mut().retain(|(i, _)| *i != id);
            }
        })
    }

    /// Call every listener registered at the time of the call, in
    /// registration order, collecting their results.
    pub fn emit(&self, event: &E) -> Vec<R> {
        let snapshot: Vec<Callback<E, R>> = self
            .listeners
            .entries
            .borrow()
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        snapshot.into_iter().map(|f| f(event)).collect()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.entries.borrow().len()
    }
}

impl<E: 'static, R: 'static> Default for Emitter<E, R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered listener. Dropping it unregisters the listener.
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(dispose: impl FnOnce() + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    pub fn dispose(mut self) {
        if let Some(f) = self.dispose.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.dispose.take() {
            f();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}
