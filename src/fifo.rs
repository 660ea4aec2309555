//! An unbounded FIFO with an awaitable non-empty edge.
//!
//! This is the queue primitive used by channel implementations and test
//! doubles that need to hand items from a producer to asynchronous
//! consumers without pulling in a full channel pair.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tokio::sync::oneshot;

struct Inner<T> {
    items: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Unbounded first-in first-out queue.
///
/// [`push`](Fifo::push) never blocks. Consumers either poll with
/// [`try_pop`](Fifo::try_pop) or await an item with [`pop`](Fifo::pop).
/// Every waiter pending at the moment of a push is woken by that push, in
/// registration order; waiters that arrive later wait for the next push.
pub struct Fifo<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Fifo<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Fifo<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Inner { items: VecDeque::new(), waiters: VecDeque::new() })) }
    }

    /// Appends an item and wakes all pending waiters.
    pub fn push(&self, item: T) {
        let waiters = {
            let mut inner = self.inner.lock().unwrap();
            inner.items.push_back(item);
            std::mem::take(&mut inner.waiters)
        };
        for waiter in waiters {
            // a waiter that gave up is fine to skip
            let _ = waiter.send(());
        }
    }

    /// Current number of queued items.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns the front item if one exists.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().unwrap().items.pop_front()
    }

    /// Removes and returns the front item, waiting until one exists.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.non_empty().await;
        }
    }

    /// Resolves once the queue is non-empty, without removing anything.
    ///
    /// The wait is edge-triggered: a waiter registered while the queue is
    /// empty resolves on the next push even if another consumer drains the
    /// item first.
    pub async fn non_empty(&self) {
        let rx = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.items.is_empty() {
                return;
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            rx
        };
        let _ = rx.await;
    }
}
