// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriptions: a set of bus registrations owned by one request.
//!
//! [`Subscription::bind`] registers every handler of an [`EventMap`];
//! [`Subscription::unsubscribe`] removes them all exactly once, no matter how
//! many times (or from how many threads) it is called. Dropping the
//! subscription unsubscribes too.

use crate::bus::{BusEvent, EventBus, Handler, HandlerId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Anything that must be torn down when a live stream goes away.
pub trait Teardown: Send + Sync {
    fn teardown(&self);
}

/// Mapping from event name to handler, consumed by [`Subscription::bind`].
pub struct EventMap<E> {
    entries: Vec<(String, Handler<E>)>,
}

impl<E> EventMap<E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a handler for `name`.
    #[must_use]
    pub fn on(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&E) + Send + Sync + 'static,
    ) -> Self {
        self.entries.push((name.into(), Arc::new(handler)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E> Default for EventMap<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventMap<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

/// Bus registrations torn down exactly once.
pub struct Subscription<E: BusEvent> {
    bus: Arc<EventBus<E>>,
    /// `None` once unsubscribed.
    registrations: Mutex<Option<Vec<(String, HandlerId)>>>,
}

impl<E: BusEvent> Subscription<E> {
    /// Register every handler of `map` with `bus`.
    pub fn bind(bus: &Arc<EventBus<E>>, map: EventMap<E>) -> Self {
        let registrations = map
            .entries
            .into_iter()
            .map(|(name, handler)| {
                let id = bus.on(name.clone(), handler);
                (name, id)
            })
            .collect::<Vec<_>>();
        tracing::debug!("[sub] bound {} handler(s)", registrations.len());

        Self {
            bus: Arc::clone(bus),
            registrations: Mutex::new(Some(registrations)),
        }
    }

    /// Deregister every handler. Returns how many were removed by this call;
    /// only the first call removes anything.
    pub fn unsubscribe(&self) -> usize {
        let Some(registrations) = self.registrations.lock().take() else {
            return 0;
        };
        let removed = registrations
            .iter()
            .filter(|(name, id)| self.bus.off(name, *id))
            .count();
        tracing::debug!("[sub] unsubscribed {} handler(s)", removed);
        removed
    }

    /// True until [`unsubscribe`](Self::unsubscribe) has run.
    pub fn is_active(&self) -> bool {
        self.registrations.lock().is_some()
    }
}

impl<E: BusEvent + 'static> Teardown for Subscription<E> {
    fn teardown(&self) {
        self.unsubscribe();
    }
}

impl<E: BusEvent> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<E: BusEvent> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
