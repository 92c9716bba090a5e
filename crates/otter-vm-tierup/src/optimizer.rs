//! The owning-thread side of the optimizer.

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::TierUpConfig;
use crate::control::StopFlag;
use crate::error::TierUpError;
use crate::osr_buffer::OsrBuffer;
use crate::stats::{self, MainCounters, TierUpStats};
use crate::task::{FunctionKey, RecompileTask, TaskSite};
use crate::worker::{self, Shared};

/// Offloads optimizing compiles to one dedicated background thread.
///
/// Tasks go through the input queue to the worker, which compiles them one at
/// a time. Regular results land in the output queue until
/// [`install_optimized_functions`](Self::install_optimized_functions) applies
/// them. OSR results land in a fixed-size ring buffer until
/// [`find_ready_osr_candidate`](Self::find_ready_osr_candidate) claims them or
/// a newer result overwrites them.
///
/// Every method here belongs to the thread that created the optimizer. The
/// type is neither `Send` nor `Sync`, so it cannot be handed to, or shared
/// with, another thread:
///
/// ```compile_fail
/// use otter_vm_tierup::{BackgroundOptimizer, FunctionKey, RecompileTask};
///
/// struct Noop;
///
/// impl RecompileTask for Noop {
///     type Error = String;
///     fn function(&self) -> FunctionKey { FunctionKey::new(0, 0) }
///     fn compile(&mut self) -> Result<(), String> { Ok(()) }
///     fn install(self) {}
///     fn restore_original_code(self) {}
/// }
///
/// fn assert_send<S: Send>() {}
/// assert_send::<BackgroundOptimizer<Noop>>();
/// ```
pub struct BackgroundOptimizer<T: RecompileTask> {
    shared: Arc<Shared<T>>,
    worker: Option<JoinHandle<()>>,
    max_queue_length: usize,
    trace: bool,
    counters: MainCounters,
    _owner_thread: PhantomData<*const ()>,
}

impl<T: RecompileTask> BackgroundOptimizer<T> {
    /// Validate `config`, allocate the OSR buffer and spawn the worker.
    pub fn start(config: TierUpConfig) -> Result<Self, TierUpError> {
        config.validate()?;

        let osr = if config.osr_enabled {
            Some(OsrBuffer::with_capacity(config.osr_buffer_capacity())?)
        } else {
            None
        };

        let shared = Arc::new(Shared::new(osr, config.compile_delay));
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker::run(worker_shared))?;

        tracing::debug!(
            thread = %config.thread_name,
            max_queue_length = config.max_queue_length,
            osr_slots = config.osr_buffer_capacity(),
            "optimizer thread started"
        );

        Ok(Self {
            shared,
            worker: Some(worker),
            max_queue_length: config.max_queue_length,
            trace: config.trace,
            counters: MainCounters::default(),
            _owner_thread: PhantomData,
        })
    }

    /// Queue `task` for the worker. Never blocks.
    ///
    /// The queue is unbounded; callers are expected to consult
    /// [`is_queue_available`](Self::is_queue_available) first. An OSR task
    /// submitted while OSR is disabled is dropped immediately. After
    /// [`stop`](Self::stop) tasks are still accepted but never compiled.
    pub fn submit(&mut self, task: T) {
        let site = TaskSite::of(&task);
        if site.osr_pc_offset.is_some() && self.shared.osr.is_none() {
            self.counters.discarded += 1;
            tracing::debug!(function = %site.function, "OSR disabled, dropping OSR task");
            return;
        }

        self.counters.submitted += 1;
        // Counted before the push so the worker's decrement can never run
        // ahead of it.
        let outstanding = self.shared.control.note_enqueued();
        self.shared.input.push(task);
        self.shared.input_signal.signal();

        if self.trace {
            tracing::info!(function = %site.function, osr_pc_offset = ?site.osr_pc_offset, outstanding, "queued for concurrent optimization");
        } else {
            tracing::trace!(function = %site.function, osr_pc_offset = ?site.osr_pc_offset, outstanding, "queued for concurrent optimization");
        }
    }

    /// Backpressure gate: `outstanding < max_queue_length`.
    ///
    /// Only this thread raises `outstanding`, so a `true` answer cannot be
    /// invalidated behind the caller's back. A `false` answer may be briefly
    /// pessimistic while the worker catches up.
    pub fn is_queue_available(&self) -> bool {
        self.shared.control.outstanding() < self.max_queue_length
    }

    /// Claim the finished OSR task for `function` at `pc_offset`, if the
    /// worker has produced one. At most one task is removed per call.
    pub fn find_ready_osr_candidate(&mut self, function: FunctionKey, pc_offset: u32) -> Option<T> {
        let buffer = self.shared.osr.as_ref()?;
        self.counters.osr_attempts += 1;

        let found = buffer.take_match(|task| {
            task.function() == function && task.osr_pc_offset() == Some(pc_offset)
        });
        if found.is_some() {
            self.counters.osr_hits += 1;
        }

        let (hits, attempts) = (self.counters.osr_hits, self.counters.osr_attempts);
        if self.trace {
            tracing::info!(%function, pc_offset, hits, attempts, "OSR lookup");
        } else {
            tracing::trace!(%function, pc_offset, hits, attempts, "OSR lookup");
        }
        found
    }

    /// Whether an OSR task for `function` at `pc_offset` is queued, being
    /// compiled, or waiting in the OSR buffer.
    pub fn is_queued_for_osr(&self, function: FunctionKey, pc_offset: u32) -> bool {
        self.osr_membership(function, Some(pc_offset))
    }

    /// Whether any OSR task for `function` is queued, being compiled, or
    /// waiting in the OSR buffer.
    pub fn is_function_queued_for_osr(&self, function: FunctionKey) -> bool {
        self.osr_membership(function, None)
    }

    fn osr_membership(&self, function: FunctionKey, pc_offset: Option<u32>) -> bool {
        let Some(buffer) = &self.shared.osr else {
            return false;
        };
        let matches = |task: &T| TaskSite::of(task).is_osr_for(function, pc_offset);

        // Same order a task travels in: input, in flight, buffer.
        self.shared.input.any(matches)
            || self.shared.is_compiling_osr(function, pc_offset)
            || buffer.contains(matches)
    }

    /// Drain the output queue, installing every task whose target is still
    /// valid and dropping the rest. Returns the number installed.
    pub fn install_optimized_functions(&mut self) -> usize {
        let mut installed = 0;
        while let Some(task) = self.shared.output.pop() {
            if task.is_target_valid() {
                task.install();
                installed += 1;
            } else {
                self.counters.discarded += 1;
                tracing::debug!(function = %task.function(), "target invalidated, discarding compiled task");
            }
        }
        self.counters.installed += installed as u64;
        installed
    }

    /// Shut the worker down for good and discard every task it left behind,
    /// without restoring any code.
    ///
    /// Blocks until the compile in progress, if any, has finished. Calling it
    /// again is a no-op.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };

        self.shared.control.request(StopFlag::Stop);
        if self.shared.is_worker_alive() {
            self.shared.input_signal.signal();
            self.shared.stop_ack.wait();
        }
        if handle.join().is_err() {
            tracing::warn!("optimizer thread panicked");
        }

        let discarded =
            self.flush_input_queue(false) + self.flush_output_queue(false) + self.flush_osr_buffer(false);

        let stats = self.stats();
        let compiling = stats.time_spent_compiling.as_secs_f64() * 1e3;
        let total = stats.time_spent_total.as_secs_f64() * 1e3;
        let busy_percent = if total > 0.0 { compiling / total * 100.0 } else { 0.0 };
        if self.trace {
            tracing::info!(discarded, compiling_ms = compiling, total_ms = total, busy_percent, "optimizer thread stopped");
        } else {
            tracing::debug!(discarded, compiling_ms = compiling, total_ms = total, busy_percent, "optimizer thread stopped");
        }
        if self.shared.osr.is_some() {
            tracing::debug!(
                hits = stats.osr_hits,
                attempts = stats.osr_attempts,
                evicted = stats.osr_evicted,
                "OSR buffer hit rate"
            );
        }
    }

    /// Discard all pending and finished tasks, then keep running.
    ///
    /// The compile in progress finishes first. With `restore_original_code`
    /// every discarded task puts its target back on unoptimized code. Meant
    /// for short pauses such as a GC cycle or a debugger attaching.
    pub fn flush(&mut self, restore_original_code: bool) {
        if self.worker.is_some() && self.shared.is_worker_alive() {
            self.shared.control.request(StopFlag::Flush);
            self.shared.input_signal.signal();
            self.shared.stop_ack.wait();
        }

        let discarded = self.flush_input_queue(restore_original_code)
            + self.flush_output_queue(restore_original_code)
            + self.flush_osr_buffer(restore_original_code);

        tracing::debug!(discarded, restore_original_code, "optimizer flushed");
    }

    fn flush_input_queue(&mut self, restore: bool) -> usize {
        let mut tasks = self.shared.take_flushed();
        if !self.shared.is_worker_alive() {
            // Nobody else will ever dequeue these, so the count is ours now.
            let leftover = self.shared.input.take_all();
            self.shared.control.note_drained(leftover.len());
            tasks.extend(leftover);
        }
        self.dispose(tasks, restore)
    }

    fn flush_output_queue(&mut self, restore: bool) -> usize {
        let tasks = self.shared.output.take_all();
        self.dispose(tasks, restore)
    }

    fn flush_osr_buffer(&mut self, restore: bool) -> usize {
        let tasks = match &self.shared.osr {
            Some(buffer) => buffer.drain(),
            None => Vec::new(),
        };
        self.dispose(tasks, restore)
    }

    fn dispose(&mut self, tasks: Vec<T>, restore: bool) -> usize {
        let count = tasks.len();
        for task in tasks {
            if restore {
                task.restore_original_code();
                self.counters.restored += 1;
            }
        }
        self.counters.discarded += count as u64;
        count
    }

    /// Current backlog as seen from this thread.
    pub fn outstanding(&self) -> usize {
        self.shared.control.outstanding()
    }

    /// Current worker run state.
    pub fn flag(&self) -> StopFlag {
        self.shared.control.flag()
    }

    /// Whether [`stop`](Self::stop) has run.
    pub fn is_stopped(&self) -> bool {
        self.worker.is_none()
    }

    /// Configured backpressure bound.
    pub fn max_queue_length(&self) -> usize {
        self.max_queue_length
    }

    /// Number of OSR slots, or 0 when OSR is disabled.
    pub fn osr_buffer_capacity(&self) -> usize {
        self.shared.osr.as_ref().map_or(0, OsrBuffer::capacity)
    }

    /// Finished OSR tasks currently held by the buffer.
    pub fn osr_buffer_len(&self) -> usize {
        self.shared.osr.as_ref().map_or(0, OsrBuffer::len)
    }

    /// Finished regular tasks waiting for installation.
    pub fn output_queue_len(&self) -> usize {
        self.shared.output.len()
    }

    /// Tasks still waiting in the input queue.
    pub fn input_queue_len(&self) -> usize {
        self.shared.input.len()
    }

    /// Snapshot counters.
    pub fn stats(&self) -> TierUpStats {
        stats::snapshot(&self.counters, &self.shared.counters)
    }
}

impl<T: RecompileTask> Drop for BackgroundOptimizer<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
