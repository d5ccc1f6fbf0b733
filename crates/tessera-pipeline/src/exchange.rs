//! Bounded blocking exchange queue
//!
//! The only structure of the batch pipeline that several threads mutate at
//! once. Producers `put`, the single consumer `take`s; both block on a
//! `parking_lot` condition variable.
//!
//! The queue also keeps the count of *pending* items: room reserved for a
//! production request whose items have not arrived yet. A reservation is
//! released under the same lock that enqueues the item, so a consumer never
//! observes an item whose reservation is still counted.

use crate::error::{ExchangeError, PipelineError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// One entry of the exchange queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<T> {
    Item(T),
    /// Terminal marker; carries the error that ended the pipeline, if any
    Completion(Option<PipelineError>),
}

impl<T> Slot<T> {
    pub fn is_completion(&self) -> bool {
        matches!(self, Slot::Completion(_))
    }
}

struct State<T> {
    slots: VecDeque<Slot<T>>,
    completed: bool,
    interrupted: bool,
    pending: usize,
}

/// Thread-safe FIFO with a fixed capacity
pub struct ExchangeQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> ExchangeQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                slots: VecDeque::with_capacity(capacity),
                completed: false,
                interrupted: false,
                pending: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue a slot, blocking while the queue is full.
    ///
    /// Once a completion has been enqueued every later slot is rejected with
    /// [`ExchangeError::Closed`], so a consumer sees exactly one completion.
    pub fn put(&self, slot: Slot<T>) -> Result<(), ExchangeError> {
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                return Err(ExchangeError::Interrupted);
            }
            if state.completed {
                return Err(ExchangeError::Closed);
            }
            if state.slots.len() < self.capacity {
                break;
            }
            self.not_full.wait(&mut state);
        }
        if slot.is_completion() {
            state.completed = true;
            // producers still waiting for space can only be rejected now
            self.not_full.notify_all();
        } else {
            state.pending = state.pending.saturating_sub(1);
        }
        state.slots.push_back(slot);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the oldest slot, blocking while the queue is empty.
    pub fn take(&self) -> Result<Slot<T>, ExchangeError> {
        let mut state = self.state.lock();
        loop {
            if let Some(slot) = state.slots.pop_front() {
                self.not_full.notify_one();
                return Ok(slot);
            }
            if state.interrupted {
                return Err(ExchangeError::Interrupted);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Wake every blocked caller; blocked and future calls fail with
    /// [`ExchangeError::Interrupted`] (a `take` still drains queued slots first).
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserve room for a production request.
    ///
    /// The request covers every slot below `high` not taken by queued or
    /// pending items. It is only granted (and counted as pending) when it
    /// exceeds `threshold`.
    pub fn reserve(&self, high: usize, threshold: usize) -> Option<usize> {
        let mut state = self.state.lock();
        if state.completed || state.interrupted {
            return None;
        }
        let available = high
            .saturating_sub(state.slots.len())
            .saturating_sub(state.pending);
        if available <= threshold {
            return None;
        }
        state.pending += available;
        Some(available)
    }

    /// Drop every outstanding reservation.
    pub fn clear_pending(&self) {
        self.state.lock().pending = 0;
    }

    /// Items reserved but not yet enqueued.
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    /// Whether the completion marker has been enqueued.
    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn takes_in_put_order() {
        let queue = ExchangeQueue::new(8);
        for i in 0..5 {
            queue.put(Slot::Item(i)).unwrap();
        }
        let taken: Vec<_> = (0..5).map(|_| queue.take().unwrap()).collect();
        assert_eq!(taken, (0..5).map(Slot::Item).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn put_blocks_until_take_frees_space() {
        let queue = Arc::new(ExchangeQueue::new(1));
        queue.put(Slot::Item(1)).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.put(Slot::Item(2)))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished(), "put should block at capacity");
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.take().unwrap(), Slot::Item(1));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.take().unwrap(), Slot::Item(2));
    }

    #[test]
    fn rejects_items_after_completion() {
        let queue = ExchangeQueue::new(4);
        queue.put(Slot::Item("a")).unwrap();
        queue.put(Slot::Completion(None)).unwrap();
        assert_eq!(queue.put(Slot::Item("b")), Err(ExchangeError::Closed));
        assert_eq!(queue.put(Slot::Completion(None)), Err(ExchangeError::Closed));
        assert!(queue.is_completed());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn interrupt_releases_blocked_taker() {
        let queue: Arc<ExchangeQueue<u8>> = Arc::new(ExchangeQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.take())
        };
        thread::sleep(Duration::from_millis(20));
        queue.interrupt();
        assert_eq!(consumer.join().unwrap(), Err(ExchangeError::Interrupted));
    }

    #[test]
    fn interrupt_releases_blocked_producer() {
        let queue = Arc::new(ExchangeQueue::new(1));
        queue.put(Slot::Item(0)).unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.put(Slot::Item(1)))
        };
        thread::sleep(Duration::from_millis(20));
        queue.interrupt();
        assert_eq!(producer.join().unwrap(), Err(ExchangeError::Interrupted));
        // already queued slots remain readable
        assert_eq!(queue.take().unwrap(), Slot::Item(0));
    }

    #[test]
    fn reservation_covers_free_slots_above_threshold() {
        let queue = ExchangeQueue::new(4);
        assert_eq!(queue.reserve(4, 2), Some(4));
        assert_eq!(queue.reserve(4, 2), None, "everything is already reserved");

        queue.put(Slot::Item(1)).unwrap();
        assert_eq!(queue.pending(), 3);
        assert_eq!(queue.take().unwrap(), Slot::Item(1));
        assert_eq!(queue.reserve(4, 2), None, "only one slot is free");

        queue.clear_pending();
        assert_eq!(queue.reserve(4, 2), Some(4));
        queue.put(Slot::Completion(None)).unwrap();
        queue.clear_pending();
        assert_eq!(queue.reserve(4, 2), None, "a completed queue takes no requests");
    }

    #[test]
    fn taken_items_never_leave_a_stale_reservation() {
        const ITEMS: usize = 2_000;
        let queue = Arc::new(ExchangeQueue::new(ITEMS));
        assert_eq!(queue.reserve(ITEMS, 0), Some(ITEMS));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..ITEMS {
                    queue.put(Slot::Item(i)).unwrap();
                }
            })
        };
        for taken in 1..=ITEMS {
            assert_eq!(queue.take().unwrap(), Slot::Item(taken - 1));
            let pending = queue.pending();
            assert!(
                pending <= ITEMS - taken,
                "item {taken} was visible while still counted as pending ({pending})"
            );
        }
        producer.join().unwrap();
        assert_eq!(queue.pending(), 0);
    }
}
