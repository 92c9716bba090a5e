use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of optimizer counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierUpStats {
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Tasks whose compile succeeded on the worker.
    pub compiled: u64,
    /// Tasks whose compile failed (dropped on the worker).
    pub compile_failures: u64,
    /// Tasks installed from the output queue.
    pub installed: u64,
    /// Tasks dropped on the owning thread without installation.
    pub discarded: u64,
    /// Discarded tasks whose target was restored to unoptimized code.
    pub restored: u64,
    /// Compiled OSR tasks stored in the OSR buffer.
    pub osr_inserted: u64,
    /// OSR tasks overwritten before anyone claimed them.
    pub osr_evicted: u64,
    /// OSR lookups that found a ready task.
    pub osr_hits: u64,
    /// OSR lookups performed.
    pub osr_attempts: u64,
    /// Wall time the worker spent inside `compile`.
    pub time_spent_compiling: Duration,
    /// Worker lifetime, known once it has stopped.
    pub time_spent_total: Duration,
}

impl TierUpStats {
    /// Fraction of OSR lookups that hit, in `[0, 1]`.
    pub fn osr_hit_rate(&self) -> f64 {
        if self.osr_attempts == 0 {
            0.0
        } else {
            self.osr_hits as f64 / self.osr_attempts as f64
        }
    }
}

/// Counters written by the worker only.
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    pub(crate) compiled: AtomicU64,
    pub(crate) compile_failures: AtomicU64,
    pub(crate) osr_inserted: AtomicU64,
    pub(crate) osr_evicted: AtomicU64,
    compile_nanos: AtomicU64,
    total_nanos: AtomicU64,
}

impl WorkerCounters {
    /// Release pairs with the acquire loads in `snapshot`: a caller that sees
    /// the new count also sees the queue and slot writes made before it.
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn add_compile_time(&self, elapsed: Duration) {
        self.compile_nanos
            .fetch_add(saturating_nanos(elapsed), Ordering::Relaxed);
    }

    pub(crate) fn set_lifetime(&self, elapsed: Duration) {
        self.total_nanos
            .store(saturating_nanos(elapsed), Ordering::Release);
    }
}

/// Counters written by the owning thread only.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MainCounters {
    pub(crate) submitted: u64,
    pub(crate) installed: u64,
    pub(crate) discarded: u64,
    pub(crate) restored: u64,
    pub(crate) osr_hits: u64,
    pub(crate) osr_attempts: u64,
}

pub(crate) fn snapshot(main: &MainCounters, worker: &WorkerCounters) -> TierUpStats {
    TierUpStats {
        submitted: main.submitted,
        compiled: worker.compiled.load(Ordering::Acquire),
        compile_failures: worker.compile_failures.load(Ordering::Acquire),
        installed: main.installed,
        discarded: main.discarded,
        restored: main.restored,
        osr_inserted: worker.osr_inserted.load(Ordering::Acquire),
        osr_evicted: worker.osr_evicted.load(Ordering::Acquire),
        osr_hits: main.osr_hits,
        osr_attempts: main.osr_attempts,
        time_spent_compiling: Duration::from_nanos(worker.compile_nanos.load(Ordering::Relaxed)),
        time_spent_total: Duration::from_nanos(worker.total_nanos.load(Ordering::Acquire)),
    }
}

fn saturating_nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_handles_zero_attempts() {
        let stats = TierUpStats::default();
        assert_eq!(stats.osr_hit_rate(), 0.0);

        let stats = TierUpStats {
            osr_hits: 1,
            osr_attempts: 4,
            ..TierUpStats::default()
        };
        assert_eq!(stats.osr_hit_rate(), 0.25);
    }

    #[test]
    fn snapshot_merges_both_sides() {
        let worker = WorkerCounters::default();
        WorkerCounters::bump(&worker.compiled);
        WorkerCounters::bump(&worker.compiled);
        WorkerCounters::bump(&worker.osr_evicted);
        worker.add_compile_time(Duration::from_millis(2));
        worker.add_compile_time(Duration::from_millis(3));

        let main = MainCounters {
            submitted: 3,
            installed: 1,
            ..MainCounters::default()
        };

        let stats = snapshot(&main, &worker);
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.compiled, 2);
        assert_eq!(stats.installed, 1);
        assert_eq!(stats.osr_evicted, 1);
        assert_eq!(stats.time_spent_compiling, Duration::from_millis(5));
        assert_eq!(stats.time_spent_total, Duration::ZERO);
    }
}
