//! Fixed-capacity cyclic cache of finished OSR tasks.
//!
//! The worker inserts at the cursor and advances it; whatever occupied that
//! slot is handed back to the caller to be destroyed, whether or not anyone
//! ever looked it up. The owning thread claims entries with `take_match`.
//! Eviction, claiming and draining all happen under the same lock, so a task
//! can never be claimed and evicted at once.

use parking_lot::Mutex;

use crate::error::TierUpError;

struct OsrSlots<T> {
    entries: Vec<Option<T>>,
    cursor: usize,
    live: usize,
}

pub(crate) struct OsrBuffer<T> {
    slots: Mutex<OsrSlots<T>>,
    capacity: usize,
}

impl<T> OsrBuffer<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Result<Self, TierUpError> {
        debug_assert!(capacity > 0, "OSR buffer needs at least one slot");

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|source| TierUpError::OsrBufferAllocation { capacity, source })?;
        entries.resize_with(capacity, || None);

        Ok(Self {
            slots: Mutex::new(OsrSlots {
                entries,
                cursor: 0,
                live: 0,
            }),
            capacity,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store `task` at the cursor and advance it. Returns the previous
    /// occupant of the slot, if any.
    pub(crate) fn insert(&self, task: T) -> Option<T> {
        let mut slots = self.slots.lock();
        let cursor = slots.cursor;
        let stale = slots.entries[cursor].replace(task);
        slots.cursor = (cursor + 1) % self.capacity;
        if stale.is_none() {
            slots.live += 1;
        }
        stale
    }

    /// Remove and return the first entry satisfying `pred`.
    pub(crate) fn take_match(&self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        let mut slots = self.slots.lock();
        let index = slots
            .entries
            .iter()
            .position(|slot| slot.as_ref().is_some_and(&mut pred))?;
        let task = slots.entries[index].take();
        slots.live -= 1;
        task
    }

    pub(crate) fn contains(&self, mut pred: impl FnMut(&T) -> bool) -> bool {
        self.slots
            .lock()
            .entries
            .iter()
            .flatten()
            .any(|task| pred(task))
    }

    /// Empty every slot. The cursor is left where it is.
    pub(crate) fn drain(&self) -> Vec<T> {
        let mut slots = self.slots.lock();
        slots.live = 0;
        slots.entries.iter_mut().filter_map(Option::take).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_past_capacity_evicts_oldest() {
        let buffer = OsrBuffer::with_capacity(3).unwrap();
        assert_eq!(buffer.insert(0), None);
        assert_eq!(buffer.insert(1), None);
        assert_eq!(buffer.insert(2), None);
        assert_eq!(buffer.len(), 3);

        assert_eq!(buffer.insert(3), Some(0));
        assert_eq!(buffer.insert(4), Some(1));
        assert_eq!(buffer.len(), 3);

        let mut left = buffer.drain();
        left.sort();
        assert_eq!(left, vec![2, 3, 4]);
    }

    #[test]
    fn eviction_ignores_whether_the_slot_was_claimed() {
        let buffer = OsrBuffer::with_capacity(2).unwrap();
        buffer.insert(10);
        buffer.insert(11);
        assert_eq!(buffer.take_match(|v| *v == 10), Some(10));

        // Cursor is back at slot 0, which is now empty.
        assert_eq!(buffer.insert(12), None);
        // Slot 1 still holds 11, which is discarded although nobody asked.
        assert_eq!(buffer.insert(13), Some(11));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn take_match_removes_at_most_one() {
        let buffer = OsrBuffer::with_capacity(4).unwrap();
        buffer.insert(7);
        buffer.insert(7);

        assert_eq!(buffer.take_match(|v| *v == 7), Some(7));
        assert!(buffer.contains(|v| *v == 7));
        assert_eq!(buffer.take_match(|v| *v == 7), Some(7));
        assert_eq!(buffer.take_match(|v| *v == 7), None);
        assert!(!buffer.contains(|v| *v == 7));
    }

    #[test]
    fn drain_is_idempotent() {
        let buffer = OsrBuffer::with_capacity(2).unwrap();
        buffer.insert(1);
        assert_eq!(buffer.drain(), vec![1]);
        assert!(buffer.drain().is_empty());
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn impossible_capacity_is_reported() {
        let err = OsrBuffer::<u64>::with_capacity(usize::MAX)
            .err()
            .expect("allocation should fail");
        assert!(matches!(
            err,
            TierUpError::OsrBufferAllocation {
                capacity: usize::MAX,
                ..
            }
        ));
    }
}
