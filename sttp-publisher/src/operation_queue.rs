//! Multi-producer/single-consumer FIFO with release/reset semantics, ported
//! from the blocking condvar-queue the routing operation thread drains.
//! Using more than one consumer is unsupported: `dequeue` assumes it is the
//! only waiter and does not guard against a second consumer stealing an
//! item between wake and pop.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct Inner<T> {
    queue: VecDeque<T>,
    released: bool,
}

/// Blocking FIFO queue used to serialize mutations onto a single background
/// thread (see `routing_tables`). `release()` wakes every blocked consumer
/// permanently; `reset()` re-arms blocking.
pub struct OperationQueue<T> {
    state: Mutex<Inner<T>>,
    condvar: Condvar,
}

impl<T> Default for OperationQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OperationQueue<T> {
    pub fn new() -> Self {
        OperationQueue {
            state: Mutex::new(Inner {
                queue: VecDeque::new(),
                released: false,
            }),
            condvar: Condvar::new(),
        }
    }

    pub fn enqueue(&self, item: T) {
        let mut state = self.state.lock().expect("operation queue mutex poisoned");
        state.queue.push_back(item);
        self.condvar.notify_all();
    }

    /// Pops the front item if present, without blocking.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut state = self.state.lock().expect("operation queue mutex poisoned");
        state.queue.pop_front()
    }

    pub fn size(&self) -> usize {
        self.state.lock().expect("operation queue mutex poisoned").queue.len()
    }

    pub fn clear(&self) {
        self.state.lock().expect("operation queue mutex poisoned").queue.clear();
    }

    /// Blocks until an item is present or `release()` has been called. Once
    /// released, returns immediately regardless of queue contents.
    pub fn wait_for_data(&self) {
        let mut state = self.state.lock().expect("operation queue mutex poisoned");
        while state.queue.is_empty() && !state.released {
            state = self.condvar.wait(state).expect("operation queue mutex poisoned");
        }
    }

    /// Wakes every blocked (or future) waiter permanently, until `reset()`.
    pub fn release(&self) {
        let mut state = self.state.lock().expect("operation queue mutex poisoned");
        state.released = true;
        self.condvar.notify_all();
    }

    /// Clears the release flag, re-enabling blocking in `wait_for_data`.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("operation queue mutex poisoned");
        state.released = false;
    }
}

impl<T> Drop for OperationQueue<T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn enqueue_then_dequeue_preserves_fifo_order() {
        let q: OperationQueue<i32> = OperationQueue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(q.size(), 3);
        assert_eq!(q.try_dequeue(), Some(1));
        assert_eq!(q.try_dequeue(), Some(2));
        assert_eq!(q.try_dequeue(), Some(3));
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn clear_empties_the_queue() {
        let q: OperationQueue<i32> = OperationQueue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.clear();
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn release_wakes_a_blocked_waiter_with_no_data() {
        let q = Arc::new(OperationQueue::<i32>::new());
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                q.wait_for_data();
            })
        };
        thread::sleep(Duration::from_millis(20));
        q.release();
        waiter.join().expect("waiter thread panicked");
    }

    #[test]
    fn reset_reenables_blocking() {
        let q: OperationQueue<i32> = OperationQueue::new();
        q.release();
        q.wait_for_data(); // returns immediately, released
        q.reset();
        q.enqueue(1);
        q.wait_for_data(); // data present, returns immediately
        assert_eq!(q.try_dequeue(), Some(1));
    }
}
