//! Unbounded FIFO used for both the input and the output queue.
//!
//! Each queue has one producing and one consuming thread. Elements are fully
//! built before `push`, so a consumer never observes a half-written task.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct TaskQueue<T> {
    queue: Mutex<VecDeque<T>>,
    len: AtomicUsize,
}

impl<T> TaskQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Append to the tail.
    pub(crate) fn push(&self, item: T) {
        self.queue.lock().push_back(item);
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Take the head.
    pub(crate) fn pop(&self) -> Option<T> {
        self.pop_inspect(|_| {})
    }

    /// Take the head, running `inspect` on it before the queue lock is
    /// released. Observers that check this queue and then whatever `inspect`
    /// publishes cannot miss the element in between.
    pub(crate) fn pop_inspect(&self, inspect: impl FnOnce(&T)) -> Option<T> {
        let mut queue = self.queue.lock();
        let item = queue.pop_front()?;
        inspect(&item);
        drop(queue);
        self.len.fetch_sub(1, Ordering::Relaxed);
        Some(item)
    }

    /// Remove every element in FIFO order.
    pub(crate) fn take_all(&self) -> Vec<T> {
        let mut queue = self.queue.lock();
        let drained: Vec<T> = queue.drain(..).collect();
        if !drained.is_empty() {
            self.len.fetch_sub(drained.len(), Ordering::Relaxed);
        }
        drained
    }

    /// Whether any queued element satisfies `pred`.
    pub(crate) fn any(&self, pred: impl FnMut(&T) -> bool) -> bool {
        self.queue.lock().iter().any(pred)
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn preserves_submission_order() {
        let queue = TaskQueue::new();
        for i in 0..4 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.take_all(), vec![1, 2, 3]);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn take_all_on_empty_queue_is_a_no_op() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        assert!(queue.take_all().is_empty());
        assert!(queue.take_all().is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn pop_inspect_sees_the_popped_element() {
        let queue = TaskQueue::new();
        queue.push("a");
        queue.push("b");

        let mut seen = None;
        assert_eq!(queue.pop_inspect(|item| seen = Some(*item)), Some("a"));
        assert_eq!(seen, Some("a"));
        assert!(queue.any(|item| *item == "b"));
        assert!(!queue.any(|item| *item == "a"));
    }

    #[test]
    fn single_producer_single_consumer_keeps_fifo() {
        let queue = Arc::new(TaskQueue::new());
        let n = 10_000u32;

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..n {
                    queue.push(i);
                }
            })
        };

        let mut next = 0;
        while next < n {
            if let Some(item) = queue.pop() {
                assert_eq!(item, next);
                next += 1;
            } else {
                thread::yield_now();
            }
        }

        producer.join().expect("producer thread failed");
        assert_eq!(queue.len(), 0);
    }
}
