// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event bus for broadcasting named producer events to registered handlers.
//!
//! Producers (connection tracker, plugin registry, log book) call [`EventBus::emit`];
//! consumers register one handler per event name with [`EventBus::on`] and receive
//! synchronous callbacks until they call [`EventBus::off`].
//!
//! The bus is an ordinary value: share it with `Arc` and hand it to every
//! producer and subscriber that needs it. Tests create a fresh bus per case.
//!
//! # Thread Safety
//!
//! The registration table is sharded, so registrations for unrelated event
//! names do not contend. Dispatch copies the handler list for one name and
//! releases the table before calling anything, which makes it safe for a
//! handler to register or deregister handlers itself.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event carried on the bus. The name selects the handlers that receive it.
pub trait BusEvent: Send + Sync {
    /// Event name handlers are registered under.
    fn name(&self) -> &str;
}

/// Synchronous event handler.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Identifier returned by [`EventBus::on`], unique per bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Named-event publish/subscribe service.
pub struct EventBus<E> {
    /// event name -> handlers in registration order
    handlers: DashMap<String, Vec<(HandlerId, Handler<E>)>>,
    next_id: AtomicU64,
}

impl<E: BusEvent> EventBus<E> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for events named `name`.
    pub fn on(&self, name: impl Into<String>, handler: Handler<E>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        tracing::trace!("[bus] on '{}' -> {:?}", name, id);
        self.handlers.entry(name).or_default().push((id, handler));
        id
    }

    /// Deregister a handler. Returns `false` if it was not registered.
    pub fn off(&self, name: &str, id: HandlerId) -> bool {
        let removed = match self.handlers.get_mut(name) {
            Some(mut slot) => {
                let before = slot.len();
                slot.retain(|(hid, _)| *hid != id);
                before != slot.len()
            }
            None => false,
        };
        // Prune empty slots so short-lived subscriptions don't grow the table.
        self.handlers.remove_if(name, |_, slot| slot.is_empty());
        tracing::trace!("[bus] off '{}' {:?} (removed={})", name, id, removed);
        removed
    }

    /// Deliver `event` to every handler registered under its name, in
    /// registration order. Returns the number of handlers invoked.
    pub fn emit(&self, event: &E) -> usize {
        let handlers: Vec<Handler<E>> = match self.handlers.get(event.name()) {
            Some(slot) => slot.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Number of handlers currently registered under `name`.
    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers.get(name).map_or(0, |slot| slot.len())
    }

    /// True if no handler is registered under any name.
    pub fn is_empty(&self) -> bool {
        self.handlers.iter().all(|slot| slot.is_empty())
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("names", &self.handlers.len())
            .finish()
    }
}
