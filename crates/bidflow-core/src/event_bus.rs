// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! In-process publish/subscribe over per-session queues.
//!
//! Grounded on the teacher's `DashMap<String, Arc<dyn _>>` concurrent
//! registries in `executor.rs`, adapted from "one entry per provider name"
//! to "one entry per session, holding a list of live subscriber channels."
//!
//! Delivery is a small bounded ring per subscriber rather than a raw
//! `tokio::sync::mpsc` channel: `mpsc` has no way to pop an item already
//! sitting in its buffer, so genuine drop-oldest (spec.md §4.3, §9) needs
//! the ring to be the actual backing store, woken via `tokio::sync::Notify`.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::Result;
use crate::events;
use crate::state_store::{EventRecord, NewEvent, StateStore};

/// Bounded per-subscriber queue capacity. Configurable via
/// [`crate::config::Config::event_queue_capacity`]; this is only the
/// fallback default.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct Ring {
    buffer: Mutex<VecDeque<EventRecord>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self { buffer: Mutex::new(VecDeque::with_capacity(capacity)), capacity, notify: Notify::new(), closed: AtomicBool::new(false) }
    }

    /// Pushes `record`, dropping the oldest buffered item first if full.
    /// Returns whether a drop occurred.
    fn push_dropping_oldest(&self, record: EventRecord) -> bool {
        let mut buf = self.buffer.lock();
        let dropped = if buf.len() >= self.capacity { buf.pop_front().is_some() } else { false };
        buf.push_back(record);
        dropped
    }
}

struct Subscriber {
    ring: Arc<Ring>,
}

/// Per-session publish/subscribe fan-out, backed by durable persistence.
pub struct EventBus {
    state_store: Arc<dyn StateStore>,
    subscribers: DashMap<String, Vec<Subscriber>>,
    queue_capacity: usize,
}

impl EventBus {
    pub fn new(state_store: Arc<dyn StateStore>, queue_capacity: usize) -> Self {
        Self { state_store, subscribers: DashMap::new(), queue_capacity }
    }

    /// Durably appends `event`, then fans it out to every live subscriber
    /// for its session. Durability precedes fan-out: a crash after append
    /// but before delivery is recovered by replay on reconnect.
    pub async fn publish(&self, event: NewEvent) -> Result<EventRecord> {
        let session_id = event.session_id.clone();
        let workflow_id = event.workflow_id;
        let record = self.state_store.append_event(event).await?;

        if let Some(mut entry) = self.subscribers.get_mut(&session_id) {
            let mut dead = Vec::new();
            for (i, sub) in entry.iter().enumerate() {
                if sub.ring.closed.load(Ordering::Acquire) {
                    dead.push(i);
                    continue;
                }

                // Full: the oldest buffered item is popped to free a slot,
                // and a `queue_overflow` marker is enqueued in its place
                // instead of the event that triggered the overflow.
                if sub.ring.push_dropping_oldest(record.clone()) {
                    let overflow = self.state_store.append_event(events::queue_overflow(&session_id, workflow_id)).await?;
                    let mut buf = sub.ring.buffer.lock();
                    buf.pop_back();
                    buf.push_back(overflow);
                }
                sub.ring.notify.notify_waiters();
            }
            for i in dead.into_iter().rev() {
                entry.remove(i);
            }
        }

        Ok(record)
    }

    /// Returns a stream that first replays persisted events for `session_id`
    /// with `id > since_event_id`, then delivers live events as they are
    /// published. Closes when the caller drops the stream.
    pub async fn subscribe(&self, session_id: &str, since_event_id: i64) -> Result<EventStream> {
        let ring = Arc::new(Ring::new(self.queue_capacity));

        let backlog = self.state_store.fetch_events_since(session_id, since_event_id).await?;
        for record in backlog {
            ring.push_dropping_oldest(record);
        }

        self.subscribers.entry(session_id.to_string()).or_default().push(Subscriber { ring: ring.clone() });

        Ok(EventStream { ring, waiting: None })
    }

    /// Emits `server_shutdown` to every live subscriber, then closes every
    /// ring so their streams terminate once drained.
    pub async fn close_all(&self) -> Result<()> {
        let sessions: Vec<String> = self.subscribers.iter().map(|e| e.key().clone()).collect();
        for session_id in sessions {
            if let Some((_, subs)) = self.subscribers.remove(&session_id) {
                let workflow_id = uuid::Uuid::nil();
                if let Ok(record) = self.state_store.append_event(events::server_shutdown(&session_id, workflow_id)).await {
                    for sub in &subs {
                        sub.ring.buffer.lock().push_back(record.clone());
                        sub.ring.closed.store(true, Ordering::Release);
                        sub.ring.notify.notify_waiters();
                    }
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers.get(session_id).map(|e| e.len()).unwrap_or(0)
    }
}

/// A single subscriber's live event stream, backed by the per-subscriber
/// ring rather than a raw channel.
pub struct EventStream {
    ring: Arc<Ring>,
    waiting: Option<BoxFuture<'static, ()>>,
}

impl Stream for EventStream {
    type Item = EventRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<EventRecord>> {
        loop {
            if let Some(item) = self.ring.buffer.lock().pop_front() {
                self.waiting = None;
                return Poll::Ready(Some(item));
            }
            if self.ring.closed.load(Ordering::Acquire) {
                return Poll::Ready(None);
            }
            if self.waiting.is_none() {
                let ring = self.ring.clone();
                self.waiting = Some(Box::pin(async move { ring.notify.notified().await }));
            }
            match self.waiting.as_mut().expect("set above").as_mut().poll(cx) {
                Poll::Ready(()) => {
                    self.waiting = None;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.ring.closed.store(true, Ordering::Release);
    }
}

/// Drains a subscriber stream into a `Vec`, for tests.
#[cfg(test)]
pub async fn collect(mut stream: EventStream, n: usize) -> Vec<EventRecord> {
    use tokio_stream::StreamExt;
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        match stream.next().await {
            Some(record) => out.push(record),
            None => break,
        }
    }
    out
}
