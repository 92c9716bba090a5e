//! Counting semaphore used for the worker's wake-up and stop acknowledgement.

use parking_lot::{Condvar, Mutex};

pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    pub(crate) fn new(initial: usize) -> Self {
        Self {
            permits: Mutex::new(initial),
            condvar: Condvar::new(),
        }
    }

    /// Release one permit and wake one waiter.
    pub(crate) fn signal(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.condvar.notify_one();
    }

    /// Block until a permit is available, then take it.
    pub(crate) fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.condvar.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Take a permit if one is available without blocking.
    pub(crate) fn try_wait(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    #[cfg(test)]
    pub(crate) fn permits(&self) -> usize {
        *self.permits.lock()
    }
}
