// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Producers and the atomic snapshot-and-subscribe contract.
//!
//! A producer owns a collection and announces its mutations on an
//! [`EventBus`]. Opening a live list must not lose or duplicate a mutation
//! that happens while the list is being opened, so the producer captures the
//! snapshot and registers the handlers as one step: every mutation applied
//! after that step reaches the handlers, and none applied before it does.
//!
//! [`Store`] provides this for in-memory state. [`Store::mutate`] applies a
//! change and emits its events while holding the state lock, and
//! [`Store::snapshot_and_subscribe`] takes the same lock, so a mutation is
//! either in the snapshot or delivered as a diff, never both.
//!
//! Handlers run under the store lock. They must not call back into the
//! store; appending to a [`LiveList`] is always safe.

use crate::bus::{BusEvent, EventBus};
use crate::channel::{LiveList, LiveStream};
use crate::error::Result;
use crate::subscription::{EventMap, Subscription};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Snapshot captured by a producer.
pub enum Snapshot<T> {
    /// Items already in memory.
    Items(Vec<T>),
    /// Items produced asynchronously (e.g. read from disk).
    Stream(BoxStream<'static, Result<T>>),
}

impl<T: Send + 'static> Snapshot<T> {
    pub fn from_stream(items: impl Stream<Item = Result<T>> + Send + 'static) -> Self {
        Snapshot::Stream(items.boxed())
    }

    pub(crate) fn into_stream(self) -> BoxStream<'static, Result<T>> {
        match self {
            Snapshot::Items(items) => stream::iter(items.into_iter().map(Ok)).boxed(),
            Snapshot::Stream(items) => items,
        }
    }
}

impl<T> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Snapshot::Items(items) => write!(f, "Snapshot::Items({})", items.len()),
            Snapshot::Stream(_) => f.write_str("Snapshot::Stream"),
        }
    }
}

/// A collection that can be opened as a live list.
pub trait Producer<E: BusEvent> {
    type Item;

    /// Capture the current items and register `map` in one atomic step.
    fn snapshot_and_subscribe(
        &self,
        map: EventMap<E>,
    ) -> Result<(Snapshot<Self::Item>, Subscription<E>)>;
}

/// Producer state guarded by one lock shared by mutations and subscriptions.
pub struct Store<S, E: BusEvent> {
    bus: Arc<EventBus<E>>,
    state: Mutex<S>,
}

impl<S, E: BusEvent> Store<S, E> {
    pub fn new(bus: Arc<EventBus<E>>, state: S) -> Self {
        Self {
            bus,
            state: Mutex::new(state),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus<E>> {
        &self.bus
    }

    /// Read the state without emitting anything.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.state.lock())
    }

    /// Apply a mutation and emit the events it returns, in order, before the
    /// lock is released.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut S) -> (R, Vec<E>)) -> R {
        let mut state = self.state.lock();
        let (result, events) = f(&mut state);
        for event in &events {
            self.bus.emit(event);
        }
        drop(state);
        result
    }

    /// Capture `view(state)` and bind `map` under the state lock.
    pub fn snapshot_and_subscribe<T>(
        &self,
        view: impl FnOnce(&S) -> T,
        map: EventMap<E>,
    ) -> (T, Subscription<E>) {
        let state = self.state.lock();
        let snapshot = view(&state);
        let subscription = Subscription::bind(&self.bus, map);
        drop(state);
        (snapshot, subscription)
    }

    /// Borrow the store as a [`Producer`] whose snapshot is `view(state)`.
    pub fn view<T, F>(&self, view: F) -> StoreView<'_, S, E, T, F>
    where
        F: Fn(&S) -> Vec<T>,
    {
        StoreView {
            store: self,
            view,
            _item: PhantomData,
        }
    }
}

impl<S, E: BusEvent> fmt::Debug for Store<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("bus", &self.bus).finish()
    }
}

/// [`Producer`] over a [`Store`] with a fixed snapshot view.
pub struct StoreView<'a, S, E: BusEvent, T, F> {
    store: &'a Store<S, E>,
    view: F,
    _item: PhantomData<fn() -> T>,
}

impl<S, E, T, F> Producer<E> for StoreView<'_, S, E, T, F>
where
    E: BusEvent,
    F: Fn(&S) -> Vec<T>,
{
    type Item = T;

    fn snapshot_and_subscribe(&self, map: EventMap<E>) -> Result<(Snapshot<T>, Subscription<E>)> {
        let (items, subscription) = self.store.snapshot_and_subscribe(&self.view, map);
        Ok((Snapshot::Items(items), subscription))
    }
}

/// Open a live list over `producer`.
///
/// `bind` receives the sender side and returns the handlers that translate
/// producer events into diffs. The returned stream yields the snapshot, the
/// ready marker, then every diff appended by those handlers, and unsubscribes
/// them when it is dropped.
pub fn open<P, E, B>(producer: &P, capacity: usize, bind: B) -> Result<LiveStream<P::Item>>
where
    P: Producer<E> + ?Sized,
    P::Item: Send + 'static,
    E: BusEvent + 'static,
    B: FnOnce(&LiveList<P::Item>) -> EventMap<E>,
{
    let (list, mut stream) = LiveList::pending(capacity);
    let map = bind(&list);
    let (snapshot, subscription) = producer.snapshot_and_subscribe(map)?;
    stream.seed(snapshot);
    stream.hold(subscription);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Frame;
    use crate::error::LiveError;
    use futures::FutureExt;

    #[derive(Debug, Clone)]
    enum Ev {
        Pushed(u32),
        Cleared,
    }

    impl BusEvent for Ev {
        fn name(&self) -> &str {
            match self {
                Ev::Pushed(_) => "pushed",
                Ev::Cleared => "cleared",
            }
        }
    }

    struct Failing;

    impl Producer<Ev> for Failing {
        type Item = u32;

        fn snapshot_and_subscribe(
            &self,
            _map: EventMap<Ev>,
        ) -> Result<(Snapshot<u32>, Subscription<Ev>)> {
            Err(LiveError::Producer("offline".into()))
        }
    }

    fn bind_pushes(list: &LiveList<u32>) -> EventMap<Ev> {
        let list = list.clone();
        EventMap::new().on("pushed", move |ev: &Ev| {
            if let Ev::Pushed(n) = ev {
                list.add(*n);
            }
        })
    }

    fn drain(stream: &mut LiveStream<u32>) -> Vec<Frame<u32>> {
        let mut out = Vec::new();
        while let Some(Some(frame)) = stream.next().now_or_never() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn test_mutate_emits_in_order() {
        let bus = Arc::new(EventBus::new());
        let store = Store::new(Arc::clone(&bus), Vec::<u32>::new());
        let view = store.view(|items: &Vec<u32>| items.clone());
        let mut stream = open(&view, 8, bind_pushes).unwrap();

        let len = store.mutate(|items| {
            items.extend([1, 2]);
            (items.len(), vec![Ev::Pushed(1), Ev::Pushed(2)])
        });
        assert_eq!(len, 2);
        assert_eq!(
            drain(&mut stream),
            vec![Frame::Ready, Frame::Add(1), Frame::Add(2)]
        );
    }

    #[test]
    fn test_snapshot_excludes_later_mutations() {
        let bus = Arc::new(EventBus::new());
        let store = Store::new(bus, vec![5u32]);
        let view = store.view(|items: &Vec<u32>| items.clone());
        let mut stream = open(&view, 8, bind_pushes).unwrap();
        store.mutate(|items| {
            items.push(6);
            ((), vec![Ev::Pushed(6)])
        });
        store.mutate(|items| {
            items.clear();
            ((), vec![Ev::Cleared])
        });

        assert_eq!(
            drain(&mut stream),
            vec![Frame::Add(5), Frame::Ready, Frame::Add(6)]
        );
        assert!(store.read(|items| items.is_empty()));
    }

    #[test]
    fn test_dropping_stream_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        let store = Store::new(Arc::clone(&bus), Vec::<u32>::new());
        let stream = open(&store.view(|items: &Vec<u32>| items.clone()), 8, bind_pushes).unwrap();
        assert_eq!(bus.handler_count("pushed"), 1);

        drop(stream);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_producer_failure_propagates() {
        let err = open(&Failing, 8, bind_pushes).unwrap_err();
        assert!(matches!(err, LiveError::Producer(_)));
    }
}
