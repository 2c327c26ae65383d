use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub trait EventHandler<E>: Send + Sync {
    fn handle_event(&self, event: &E);
}

impl<E, F> EventHandler<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn handle_event(&self, event: &E) {
        self(event)
    }
}

/// Identifies a registration so it can later be removed with [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration<E> {
    id: HandlerId,
    handler: Arc<dyn EventHandler<E>>,
    once: bool,
}

impl<E> Clone for Registration<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
            once: self.once,
        }
    }
}

/// Per-instance publish/subscribe bus.
///
/// Every component owns one of these (usually behind an `Arc` so the UI can
/// subscribe before handing it over). Handlers run synchronously on the
/// emitting task, in registration order.
pub struct EventBus<E> {
    handlers: RwLock<Vec<Registration<E>>>,
    next_id: AtomicU64,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.len())
            .finish()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for every subsequent event.
    pub fn on<H>(&self, handler: H) -> HandlerId
    where
        H: EventHandler<E> + 'static,
    {
        self.register(Arc::new(handler), false)
    }

    /// Registers a handler that is dropped right before its first invocation.
    pub fn once<H>(&self, handler: H) -> HandlerId
    where
        H: EventHandler<E> + 'static,
    {
        self.register(Arc::new(handler), true)
    }

    /// Removes a registration. Returns false if it was already gone.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .expect("RwLock should not be poisoned");
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    /// Returns true if there are any event handlers registered.
    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .expect("RwLock should not be poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_handlers()
    }

    pub fn emit(&self, event: &E) {
        // Snapshot under the lock, invoke without it: handlers are allowed to
        // call back into the bus.
        let snapshot: Vec<Registration<E>> = {
            let mut handlers = self
                .handlers
                .write()
                .expect("RwLock should not be poisoned");
            let snapshot = handlers.clone();
            handlers.retain(|r| !r.once);
            snapshot
        };

        for registration in &snapshot {
            registration.handler.handle_event(event);
        }
    }

    fn register(&self, handler: Arc<dyn EventHandler<E>>, once: bool) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(Registration { id, handler, once });
        id
    }
}
