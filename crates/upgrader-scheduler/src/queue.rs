//! Bounded FIFO between a strategy and its executor workers.
//!
//! Single producer, many consumers. `add` blocks while the queue is full,
//! `get` blocks while it is empty, and `close` lets consumers drain what is
//! left before `get` starts returning `None`.

use std::collections::VecDeque;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct OperationQueue<T> {
    state: Mutex<State<T>>,
    cap: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> OperationQueue<T> {
    /// A queue holding at most `cap` items (at least one).
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(cap),
                closed: false,
            }),
            cap,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Append `item`, waiting for space. Fails once the queue is closed,
    /// including while waiting.
    pub async fn add(&self, item: T) -> Result<(), QueueError> {
        loop {
            // Register interest before checking so a concurrent `get` or
            // `close` cannot slip between the check and the wait.
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(QueueError::Closed);
                }
                if state.items.len() < self.cap {
                    state.items.push_back(item);
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Take the oldest item, waiting for one. `None` once the queue is
    /// closed and drained.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    let more = !state.items.is_empty();
                    drop(state);
                    self.not_full.notify_one();
                    if more {
                        // Pass the baton in case several items arrived under
                        // a single stored permit.
                        self.not_empty.notify_one();
                    }
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting items. Idempotent.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_order() {
        let queue = OperationQueue::new(4);
        for i in 0..4 {
            queue.add(i).await.unwrap();
        }
        assert_eq!(queue.len(), 4);
        for i in 0..4 {
            assert_eq!(queue.get().await, Some(i));
        }
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = OperationQueue::new(2);
        queue.add("a").await.unwrap();
        queue.close();
        queue.close();
        assert_eq!(queue.add("b").await, Err(QueueError::Closed));
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_blocks_add() {
        let queue = Arc::new(OperationQueue::new(1));
        queue.add(1).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.add(2).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.get().await, Some(1));
        producer.await.unwrap().unwrap();
        assert_eq!(queue.get().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn close_unblocks_pending_add() {
        let queue = Arc::new(OperationQueue::new(1));
        queue.add(1).await.unwrap();
        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.add(2).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        let result = tokio::time::timeout(Duration::from_millis(10), producer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(QueueError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn close_unblocks_idle_consumers() {
        let queue: Arc<OperationQueue<u32>> = Arc::new(OperationQueue::new(2));
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.get().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        for consumer in consumers {
            assert_eq!(consumer.await.unwrap(), None);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn each_item_delivered_once() {
        let queue = Arc::new(OperationQueue::new(3));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(item) = queue.get().await {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();
        for i in 0..200u32 {
            queue.add(i).await.unwrap();
        }
        queue.close();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        assert_eq!(all.len(), 200);
        assert_eq!(all.iter().copied().collect::<HashSet<_>>().len(), 200);
        assert_eq!(queue.cap(), 3);
        assert!(queue.is_empty());
    }
}
