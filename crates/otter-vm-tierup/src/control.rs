//! Lock-free coordination state shared by the owning thread and the worker.
//!
//! ## Ownership of each field
//!
//! - `flag`: the owning thread stores `Stop` or `Flush`; the worker only ever
//!   moves `Flush` back to `Continue` once it has drained the input queue.
//!   `Stop` is terminal for the lifetime of the optimizer.
//! - `outstanding`: the owning thread is the only incrementer (one per task
//!   entering the input queue) and the worker is the only decrementer (one
//!   per task leaving it). A load on the owning thread can therefore observe
//!   the exact backlog or an overstatement of it, never an understatement,
//!   because nobody but the reader can make the number grow.
//!
//! Once the worker has terminated, whether it acknowledged `Stop` or unwound
//! out of a panicking compile, it never touches either field again and the
//! owning thread takes over both. `flush` and `stop` then drain the input
//! queue themselves and settle `outstanding` through `note_drained`.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Worker run state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopFlag {
    /// Keep consuming the input queue.
    Continue = 0,
    /// Terminate after the current compile.
    Stop = 1,
    /// Drain the input queue after the current compile, then continue.
    Flush = 2,
}

impl From<u8> for StopFlag {
    fn from(v: u8) -> Self {
        match v {
            1 => StopFlag::Stop,
            2 => StopFlag::Flush,
            _ => StopFlag::Continue,
        }
    }
}

pub(crate) struct ControlState {
    flag: AtomicU8,
    outstanding: CachePadded<AtomicUsize>,
}

impl ControlState {
    pub(crate) fn new() -> Self {
        Self {
            flag: AtomicU8::new(StopFlag::Continue as u8),
            outstanding: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn flag(&self) -> StopFlag {
        StopFlag::from(self.flag.load(Ordering::Acquire))
    }

    /// Owning thread: request `Stop` or `Flush`.
    pub(crate) fn request(&self, flag: StopFlag) {
        debug_assert_ne!(flag, StopFlag::Continue, "only the worker resumes");
        self.flag.store(flag as u8, Ordering::Release);
    }

    /// Worker: leave `Flush` once the input queue has been drained.
    pub(crate) fn resume(&self) -> bool {
        self.flag
            .compare_exchange(
                StopFlag::Flush as u8,
                StopFlag::Continue as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Owning thread: a task is about to enter the input queue.
    pub(crate) fn note_enqueued(&self) -> usize {
        self.outstanding.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Worker: a task has left the input queue.
    pub(crate) fn note_dequeued(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "outstanding underflow");
    }

    /// Owning thread, worker terminated: account for a locally drained backlog.
    ///
    /// The only owning-thread decrement. Callers must have observed the
    /// worker as no longer alive, either after `Stop` or after it died
    /// mid-compile, so there is no concurrent decrementer left.
    pub(crate) fn note_drained(&self, count: usize) {
        if count != 0 {
            self.outstanding.fetch_sub(count, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_flag_from_u8() {
        assert_eq!(StopFlag::from(0), StopFlag::Continue);
        assert_eq!(StopFlag::from(1), StopFlag::Stop);
        assert_eq!(StopFlag::from(2), StopFlag::Flush);
        assert_eq!(StopFlag::from(255), StopFlag::Continue); // Unknown
    }

    #[test]
    fn flush_resumes_but_stop_is_terminal() {
        let control = ControlState::new();
        assert_eq!(control.flag(), StopFlag::Continue);

        control.request(StopFlag::Flush);
        assert_eq!(control.flag(), StopFlag::Flush);
        assert!(control.resume());
        assert_eq!(control.flag(), StopFlag::Continue);

        control.request(StopFlag::Stop);
        assert!(!control.resume());
        assert_eq!(control.flag(), StopFlag::Stop);
    }

    #[test]
    fn outstanding_counts() {
        let control = ControlState::new();
        for expected in 1..=5 {
            assert_eq!(control.note_enqueued(), expected);
        }
        control.note_dequeued();
        assert_eq!(control.outstanding(), 4);

        control.note_drained(4);
        assert_eq!(control.outstanding(), 0);
    }
}
