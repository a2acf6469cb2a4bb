// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # livelist - live collection views over an event bus
//!
//! Turns a mutable in-process collection plus the events describing its
//! mutations into one ordered outbound sequence per subscriber:
//!
//! ```text
//! {"add": item} ... {"add": item}  "ready"  {"add"|"remove"|"update": ...} ...
//! '------------ snapshot ---------'        '---------- live diffs ---------'
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------+   mutate + emit (one lock)   +-----------+
//! |  Producer   | ---------------------------> | EventBus  |
//! |  (Store)    |                              +-----------+
//! +-------------+                                    | handler (sync)
//!       | snapshot_and_subscribe                     v
//!       |                                      +-----------+    Frame<T>    +-----------+
//!       '------------------------------------> | LiveList  | =============> | LiveStream| -> transport
//!                                              +-----------+  bounded queue +-----------+
//!                                                                          holds Subscription
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EventBus`] | Named-event publish/subscribe with synchronous dispatch |
//! | [`LiveList`] | Sender side: `add` / `remove` / `update` |
//! | [`LiveStream`] | Receiver side: snapshot, `ready` marker, live frames |
//! | [`Subscription`] | Bus registrations torn down exactly once |
//! | [`Store`] | Producer state with atomic snapshot-and-subscribe |
//! | [`Partial`] | Partial-match key used by `remove` / `update` |
//!
//! ## Example
//!
//! ```rust
//! use futures::StreamExt;
//! use livelist::{BusEvent, EventBus, EventMap, Frame, Store};
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! enum Ev { Added(u32) }
//!
//! impl BusEvent for Ev {
//!     fn name(&self) -> &str { "added" }
//! }
//!
//! # futures::executor::block_on(async {
//! let bus = Arc::new(EventBus::new());
//! let store = Store::new(bus, vec![1u32, 2]);
//!
//! let mut stream = livelist::open(&store.view(|items: &Vec<u32>| items.clone()), 16, |list| {
//!     let list = list.clone();
//!     EventMap::new().on("added", move |ev: &Ev| match ev {
//!         Ev::Added(n) => list.add(*n),
//!     })
//! })
//! .unwrap();
//!
//! store.mutate(|items| {
//!     items.push(3);
//!     ((), vec![Ev::Added(3)])
//! });
//!
//! assert_eq!(stream.next().await, Some(Frame::Add(1)));
//! assert_eq!(stream.next().await, Some(Frame::Add(2)));
//! assert_eq!(stream.next().await, Some(Frame::Ready));
//! assert_eq!(stream.next().await, Some(Frame::Add(3)));
//! # });
//! ```

/// Named-event publish/subscribe.
pub mod bus;
/// Outbound snapshot-then-diff channel.
pub mod channel;
/// Diff operations and their wire frames.
pub mod diff;
/// Core error type.
pub mod error;
/// Partial-match keys and per-type key schemas.
pub mod key;
/// Consumer-side list reconstruction.
pub mod mirror;
/// Producer contract and the guarded producer store.
pub mod producer;
/// Bus registrations tied to one request.
pub mod subscription;

pub use bus::{BusEvent, EventBus, Handler, HandlerId};
pub use channel::{live_list, LiveList, LiveStream, LAGGED};
pub use diff::{DiffOp, Frame, UpdateSpec};
pub use error::{LiveError, Result};
pub use key::{KeySchema, Keyed, Partial};
pub use mirror::ListMirror;
pub use producer::{open, Producer, Snapshot, Store, StoreView};
pub use subscription::{EventMap, Subscription, Teardown};
