// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Live list channel.
//!
//! [`LiveList`] is the imperative side: `add` / `remove` / `update` append a diff
//! and return immediately. [`LiveStream`] is the outbound side handed to the
//! transport: it yields the snapshot as `Add` frames, then [`Frame::Ready`],
//! then every appended diff in order.
//!
//! Live diffs travel through a bounded queue with a single logical writer per
//! stream. When the consumer is gone, appends are discarded. When the consumer
//! is too slow and the queue fills up, the channel stops accepting diffs and the
//! stream ends with `{"error": "lagged"}` once the queued frames are drained, so
//! a stream that keeps going never has a hole in it.

use crate::diff::{DiffOp, Frame};
use crate::error::LiveError;
use crate::key::Partial;
use crate::producer::Snapshot;
use crate::subscription::Teardown;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Error message of the terminal frame sent after a queue overflow.
pub const LAGGED: &str = "lagged";

enum Op<T> {
    Diff(DiffOp<T>),
    End(String),
}

struct Shared {
    /// No further appends are accepted.
    closed: AtomicBool,
    /// Closed because the queue overflowed.
    lagged: AtomicBool,
    capacity: usize,
}

/// Sender side of a live list. Cheap to clone; every clone feeds the same stream.
pub struct LiveList<T> {
    tx: mpsc::Sender<Op<T>>,
    shared: Arc<Shared>,
}

impl<T> Clone for LiveList<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for LiveList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveList")
            .field("detached", &self.tx.is_closed())
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Create a channel whose stream starts with `initial` as the snapshot.
pub fn live_list<T: Send + 'static>(
    initial: impl IntoIterator<Item = T>,
    capacity: usize,
) -> (LiveList<T>, LiveStream<T>) {
    let (list, mut stream) = LiveList::pending(capacity);
    stream.seed(Snapshot::Items(initial.into_iter().collect()));
    (list, stream)
}

impl<T: Send + 'static> LiveList<T> {
    /// Create a channel whose snapshot is supplied later with [`LiveStream::seed`].
    ///
    /// Diffs appended before seeding are queued behind the snapshot.
    pub fn pending(capacity: usize) -> (Self, LiveStream<T>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            lagged: AtomicBool::new(false),
            capacity,
        });
        let list = Self {
            tx,
            shared: Arc::clone(&shared),
        };
        let stream = LiveStream {
            snapshot: Some(stream::empty().boxed()),
            rx,
            shared,
            guards: Vec::new(),
            done: false,
        };
        (list, stream)
    }

    /// Append `{"add": item}`.
    pub fn add(&self, item: T) {
        self.push(Op::Diff(DiffOp::Add(item)));
    }

    /// Append `{"remove": [key]}`. Matching is left to the consumer.
    pub fn remove(&self, key: Partial) {
        self.push(Op::Diff(DiffOp::Remove(key)));
    }

    /// Append `{"update": [{search, change}]}`.
    pub fn update(&self, search: Partial, change: Partial) {
        self.push(Op::Diff(DiffOp::Update { search, change }));
    }

    /// Append a terminal `{"error": message}` frame. Later appends are no-ops.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("[live] failing stream: {}", message);
        self.push(Op::End(message));
        self.shared.closed.store(true, Ordering::Release);
    }

    /// True once the consuming stream has been dropped.
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, op: Op<T>) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        match self.tx.try_send(op) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.overflow(),
            Err(TrySendError::Closed(_)) => {
                tracing::trace!("[live] consumer detached, diff discarded");
            }
        }
    }

    fn overflow(&self) {
        self.shared.closed.store(true, Ordering::Release);
        if self.shared.lagged.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(
            "[live] consumer lagging (queue of {} full), closing stream",
            self.shared.capacity
        );
        // Wakes a receiver that already drained the queue; if the queue is still
        // full the receiver sees the lagged flag once it empties it.
        let _ = self.tx.try_send(Op::End(LAGGED.to_string()));
    }
}

/// Outbound side of a live list: snapshot, marker, then live frames.
///
/// Dropping the stream detaches the channel and runs every held [`Teardown`]
/// guard, which is how a closed connection unsubscribes its handlers.
pub struct LiveStream<T> {
    snapshot: Option<BoxStream<'static, Result<T, LiveError>>>,
    rx: mpsc::Receiver<Op<T>>,
    shared: Arc<Shared>,
    guards: Vec<Box<dyn Teardown>>,
    done: bool,
}

impl<T: Send + 'static> LiveStream<T> {
    /// Replace the snapshot. Has no effect once the marker has been yielded.
    pub fn seed(&mut self, snapshot: Snapshot<T>) {
        if self.snapshot.is_none() {
            tracing::warn!("[live] snapshot seeded after ready marker, ignored");
            return;
        }
        self.snapshot = Some(snapshot.into_stream());
    }

    /// Tie a teardown guard to the lifetime of this stream.
    pub fn hold(&mut self, guard: impl Teardown + 'static) {
        if self.done {
            guard.teardown();
            return;
        }
        self.guards.push(Box::new(guard));
    }
}

impl<T> LiveStream<T> {
    /// True once the stream yielded its last frame.
    pub fn is_finished(&self) -> bool {
        self.done
    }

    fn finish(&mut self) {
        self.done = true;
        self.shared.closed.store(true, Ordering::Release);
        self.rx.close();
        for guard in self.guards.drain(..) {
            guard.teardown();
        }
    }
}

impl<T> Stream for LiveStream<T> {
    type Item = Frame<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if let Some(snapshot) = this.snapshot.as_mut() {
            return match snapshot.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(Frame::Add(item))),
                Poll::Ready(Some(Err(e))) => {
                    tracing::debug!("[live] snapshot failed: {}", e);
                    this.snapshot = None;
                    this.finish();
                    Poll::Ready(Some(Frame::Error(e.to_string())))
                }
                Poll::Ready(None) => {
                    this.snapshot = None;
                    Poll::Ready(Some(Frame::Ready))
                }
                Poll::Pending => Poll::Pending,
            };
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Op::Diff(op))) => Poll::Ready(Some(op.into())),
            Poll::Ready(Some(Op::End(message))) => {
                this.finish();
                Poll::Ready(Some(Frame::Error(message)))
            }
            Poll::Ready(None) => {
                this.finish();
                if this.shared.lagged.load(Ordering::Acquire) {
                    return Poll::Ready(Some(Frame::Error(LAGGED.to_string())));
                }
                Poll::Ready(None)
            }
            Poll::Pending => {
                if this.shared.lagged.load(Ordering::Acquire) {
                    this.finish();
                    return Poll::Ready(Some(Frame::Error(LAGGED.to_string())));
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for LiveStream<T> {
    fn drop(&mut self) {
        if !self.done {
            tracing::trace!("[live] stream dropped by consumer");
            self.finish();
        }
    }
}

impl<T> fmt::Debug for LiveStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveStream")
            .field("in_snapshot", &self.snapshot.is_some())
            .field("guards", &self.guards.len())
            .field("done", &self.done)
            .finish()
    }
}
