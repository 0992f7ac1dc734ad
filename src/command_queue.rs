//! Command queue between client sessions and the main loop
//!
//! Session threads push parsed requests; the coordinator's main loop pops
//! them one at a time in arrival order. When a connection closes its
//! still-queued requests are removed so no work is done for a client that
//! cannot receive the answer.

use crate::client::request::{ConnectionId, Request};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Queue counters
#[derive(Debug, Default)]
pub struct QueueStats {
    pub pushed: AtomicU64,
    pub popped: AtomicU64,
    pub discarded: AtomicU64,
}

#[derive(Debug, Default)]
struct QueueState {
    requests: VecDeque<Request>,
    closed: bool,
}

/// FIFO of pending requests
#[derive(Debug, Default)]
pub struct CommandQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    stats: QueueStats,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request and wake the main loop
    pub fn push(&self, request: Request) {
        let mut state = self.state.lock();
        state.requests.push_back(request);
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
    }

    /// Oldest request, blocking while the queue is empty
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<Request> {
        let mut state = self.state.lock();
        loop {
            if let Some(request) = state.requests.pop_front() {
                self.stats.popped.fetch_add(1, Ordering::Relaxed);
                return Some(request);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Remove every queued request from connection `id`
    pub fn discard_connection(&self, id: ConnectionId) -> usize {
        let mut state = self.state.lock();
        let before = state.requests.len();
        state
            .requests
            .retain(|r| r.connection_id() != Some(id));
        let removed = before - state.requests.len();

        if removed > 0 {
            self.stats
                .discarded
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(connection = id, removed, "Discarded queued requests");
        }
        removed
    }

    /// Stop blocking in `pop` once the queue drains
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::request::{ClientHandle, Command, CommandKind};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn from_connection(id: ConnectionId) -> Request {
        Request::new(
            Command::Shutdown,
            Some(ClientHandle::new(id, format!("peer-{}", id), std::io::sink())),
        )
    }

    #[test]
    fn test_fifo_order() {
        let queue = CommandQueue::new();
        for id in 1..=3 {
            queue.push(from_connection(id));
        }

        let ids: Vec<_> = (0..3)
            .map(|_| queue.pop().unwrap().connection_id().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_discard_connection() {
        let queue = CommandQueue::new();
        queue.push(from_connection(1));
        queue.push(from_connection(2));
        queue.push(from_connection(1));

        assert_eq!(queue.discard_connection(1), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().connection_id(), Some(2));
        assert_eq!(queue.stats().discarded.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(CommandQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop().map(|r| r.kind()))
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(Request::shutdown());
        assert_eq!(consumer.join().unwrap(), Some(CommandKind::Shutdown));
    }

    #[test]
    fn test_close_wakes_waiter() {
        let queue = Arc::new(CommandQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop().is_none())
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(consumer.join().unwrap());
    }
}
