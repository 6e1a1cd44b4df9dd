//! Single-consumer, multi-producer priority event queue.
//!
//! Payload ownership transfers on enqueue: a successful `push` moves the
//! [`Event`] into the queue: there is no shared ownership and nothing to
//! free explicitly once Rust drops it. Overflow drops the event (logged)
//! rather than applying backpressure to transports.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::warn;

use crate::event::Event;

struct Inner {
    deque: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
}

/// Producer handle: cheap to clone, used by the Signal transport, the Peer
/// controllers, and the engine's own command surface.
#[derive(Clone)]
pub struct EventSender {
    inner: std::sync::Arc<Inner>,
}

/// Consumer handle: owned exclusively by the engine task.
pub struct EventReceiver {
    inner: std::sync::Arc<Inner>,
}

/// Create a bounded priority queue with the given capacity.
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let inner = std::sync::Arc::new(Inner {
        deque: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
        notify: Notify::new(),
        capacity,
    });
    (
        EventSender {
            inner: inner.clone(),
        },
        EventReceiver { inner },
    )
}

impl EventSender {
    /// Enqueue an event, prioritising it to the front of the queue when
    /// [`Event::is_priority`] says so. Drops the event and logs a warning
    /// if the queue is at capacity.
    pub fn push(&self, event: Event) {
        let mut deque = self.inner.deque.lock().unwrap_or_else(|e| e.into_inner());
        if deque.len() >= self.inner.capacity {
            warn!(?event, "engine event queue full, dropping event");
            return;
        }
        if event.is_priority() {
            deque.push_front(event);
        } else {
            deque.push_back(event);
        }
        drop(deque);
        self.inner.notify.notify_one();
    }
}

impl EventReceiver {
    /// Block until an event is available or `is_running` is cleared.
    /// Returns `None` only when told to stop with an empty queue.
    pub async fn recv(&self, is_running: &std::sync::atomic::AtomicBool) -> Option<Event> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if !is_running.load(std::sync::atomic::Ordering::Acquire) {
                return self.try_recv();
            }
            self.inner.notify.notified().await;
        }
    }

    fn try_recv(&self) -> Option<Event> {
        self.inner
            .deque
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Drain and drop every remaining event. Called once on engine shutdown
    /// so every dequeued event is freed exactly once even if the task exits
    /// mid-backlog.
    pub fn drain(&self) -> usize {
        let mut deque = self.inner.deque.lock().unwrap_or_else(|e| e.into_inner());
        let n = deque.len();
        deque.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn priority_events_jump_the_queue() {
        let (tx, rx) = channel(16);
        tx.push(Event::CmdClose); // back (priority, but pushed first so still front)
        tx.push(Event::TimerExpired); // priority -> front
        let running = std::sync::atomic::AtomicBool::new(true);
        let first = rx.recv(&running).await.unwrap();
        assert!(matches!(first, Event::TimerExpired));
    }

    #[tokio::test]
    async fn fifo_among_equal_priority() {
        let (tx, rx) = channel(16);
        tx.push(Event::TimerExpired);
        tx.push(Event::MaxRetriesReached);
        let running = std::sync::atomic::AtomicBool::new(true);
        // MaxRetriesReached pushed after TimerExpired, both priority -> each
        // push_front, so MaxRetriesReached ends up in front.
        assert!(matches!(
            rx.recv(&running).await.unwrap(),
            Event::MaxRetriesReached
        ));
        assert!(matches!(
            rx.recv(&running).await.unwrap(),
            Event::TimerExpired
        ));
    }

    #[tokio::test]
    async fn overflow_drops_event() {
        let (tx, rx) = channel(1);
        tx.push(Event::CmdClose);
        tx.push(Event::CmdClose); // dropped, queue full
        assert_eq!(rx.drain(), 1);
    }

    #[tokio::test]
    async fn recv_returns_none_when_stopped_and_empty() {
        let (_tx, rx) = channel(4);
        let running = std::sync::atomic::AtomicBool::new(false);
        assert!(rx.recv(&running).await.is_none());
    }
}
