// Bounded delivery queues
//
// Both the central dispatch queue and every per-connection queue are
// capacity-bounded FIFO queues with a single consumer. Producers never
// block: per-connection pushes evict the oldest entry when full
// (push_evict), the central dispatch push rejects the new entry instead
// (try_push). The consumer blocks with a timeout so stream handlers can
// emit heartbeats and the distributor stays responsive to shutdown.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::event::Event;

/// Outcome of a timed receive
#[derive(Debug)]
pub enum Recv {
    /// Next event in FIFO order
    Event(Event),
    /// No event arrived within the timeout
    Timeout,
    /// Queue was closed; no more events will arrive
    Closed,
}

/// Push rejected by a full (or closed) queue; carries the event back
#[derive(Debug)]
pub struct QueueFull(pub Event);

struct Inner {
    items: VecDeque<Event>,
    closed: bool,
}

/// Capacity-bounded FIFO event queue, safe to share between one consumer
/// and any number of producers without an external lock
pub struct DeliveryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Push, evicting the oldest entry when full. Returns the evicted event
    /// so the caller can log it. Pushes onto a closed queue are dropped.
    pub fn push_evict(&self, event: Event) -> Option<Event> {
        let evicted = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return None;
            }
            let evicted = if inner.items.len() >= self.capacity {
                inner.items.pop_front()
            } else {
                None
            };
            inner.items.push_back(event);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Push, rejecting the new entry when the queue is full or closed
    pub fn try_push(&self, event: Event) -> std::result::Result<(), QueueFull> {
        {
            let mut inner = self.inner.lock();
            if inner.closed || inner.items.len() >= self.capacity {
                return Err(QueueFull(event));
            }
            inner.items.push_back(event);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next event, a timeout, or close
    pub async fn recv_timeout(&self, timeout: Duration) -> Recv {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(event) = inner.items.pop_front() {
                    return Recv::Event(event);
                }
                if inner.closed {
                    return Recv::Closed;
                }
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                // Final check: a push may have raced the timeout
                let mut inner = self.inner.lock();
                return match inner.items.pop_front() {
                    Some(event) => Recv::Event(event),
                    None if inner.closed => Recv::Closed,
                    None => Recv::Timeout,
                };
            }
        }
    }

    /// Close the queue and wake the consumer. Anything still queued is
    /// dropped; a stored event stays recoverable while unread and unexpired.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Remove and return everything queued, in FIFO order
    pub fn drain(&self) -> Vec<Event> {
        self.inner.lock().items.drain(..).collect()
    }
}
