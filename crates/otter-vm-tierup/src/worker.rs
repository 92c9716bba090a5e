//! Optimizer thread body and the state it shares with the owning thread.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::control::{ControlState, StopFlag};
use crate::osr_buffer::OsrBuffer;
use crate::queue::TaskQueue;
use crate::signal::Semaphore;
use crate::stats::WorkerCounters;
use crate::task::{FunctionKey, RecompileTask, TaskSite};

pub(crate) struct Shared<T> {
    pub(crate) control: ControlState,
    /// One permit per submitted task plus one per stop/flush request.
    pub(crate) input_signal: Semaphore,
    /// Released by the worker once a stop or flush request has been handled.
    pub(crate) stop_ack: Semaphore,
    pub(crate) input: TaskQueue<T>,
    pub(crate) output: TaskQueue<T>,
    pub(crate) osr: Option<OsrBuffer<T>>,
    /// Site of the task currently inside `compile`.
    in_flight: Mutex<Option<TaskSite>>,
    /// Input-queue tasks drained by the worker during a flush, waiting for
    /// the owning thread to dispose of them.
    flushed: Mutex<Vec<T>>,
    pub(crate) counters: WorkerCounters,
    alive: AtomicBool,
    worker_thread: OnceLock<ThreadId>,
    compile_delay: Duration,
}

impl<T: RecompileTask> Shared<T> {
    pub(crate) fn new(osr: Option<OsrBuffer<T>>, compile_delay: Duration) -> Self {
        Self {
            control: ControlState::new(),
            input_signal: Semaphore::new(0),
            stop_ack: Semaphore::new(0),
            input: TaskQueue::new(),
            output: TaskQueue::new(),
            osr,
            in_flight: Mutex::new(None),
            flushed: Mutex::new(Vec::new()),
            counters: WorkerCounters::default(),
            alive: AtomicBool::new(true),
            worker_thread: OnceLock::new(),
            compile_delay,
        }
    }

    pub(crate) fn is_worker_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn is_worker_thread(&self) -> bool {
        self.worker_thread.get() == Some(&thread::current().id())
    }

    pub(crate) fn is_compiling_osr(&self, function: FunctionKey, pc_offset: Option<u32>) -> bool {
        self.in_flight
            .lock()
            .is_some_and(|site| site.is_osr_for(function, pc_offset))
    }

    pub(crate) fn take_flushed(&self) -> Vec<T> {
        std::mem::take(&mut *self.flushed.lock())
    }

    fn compile_next(&self) {
        debug_assert!(self.is_worker_thread(), "compile_next off the optimizer thread");

        // The site is published before the input lock is released so that
        // OSR membership checks never lose sight of the task.
        let Some(mut task) = self
            .input
            .pop_inspect(|task| *self.in_flight.lock() = Some(TaskSite::of(task)))
        else {
            // Permits can outnumber tasks after a flush.
            tracing::trace!("optimizer woke with an empty input queue");
            return;
        };
        self.control.note_dequeued();
        // Declared after `task` so the slot is cleared before a task that
        // unwinds out of `compile` is dropped.
        let in_flight = InFlightSlot(&self.in_flight);

        let site = TaskSite::of(&task);
        let started = Instant::now();
        let result = task.compile();
        self.counters.add_compile_time(started.elapsed());

        let outcome = match result {
            Ok(()) => {
                self.route(task, site);
                &self.counters.compiled
            }
            Err(err) => {
                tracing::debug!(
                    function = %site.function,
                    osr_pc_offset = ?site.osr_pc_offset,
                    error = %err,
                    "optimization failed, discarding task"
                );
                drop(task);
                &self.counters.compile_failures
            }
        };

        // Counters are bumped last so a caller waiting on them sees the task
        // settled in its final container.
        drop(in_flight);
        WorkerCounters::bump(outcome);
    }

    fn route(&self, task: T, site: TaskSite) {
        match (site.osr_pc_offset, &self.osr) {
            (None, _) => self.output.push(task),
            (Some(pc_offset), Some(buffer)) => {
                WorkerCounters::bump(&self.counters.osr_inserted);
                if let Some(stale) = buffer.insert(task) {
                    WorkerCounters::bump(&self.counters.osr_evicted);
                    tracing::debug!(
                        function = %stale.function(),
                        osr_pc_offset = ?stale.osr_pc_offset(),
                        "discarding unclaimed OSR task"
                    );
                    drop(stale);
                }
                tracing::trace!(function = %site.function, pc_offset, "OSR task ready");
            }
            (Some(pc_offset), None) => {
                tracing::debug!(
                    function = %site.function,
                    pc_offset,
                    "OSR disabled, discarding compiled OSR task"
                );
                drop(task);
            }
        }
    }

    /// Move the whole input queue to the hand-off list, consuming the wake
    /// permit each drained task was submitted with.
    fn flush_input_on_worker(&self) {
        let drained = self.input.take_all();
        for _ in &drained {
            self.control.note_dequeued();
            self.input_signal.try_wait();
        }
        tracing::debug!(count = drained.len(), "flushed input queue");
        self.flushed.lock().extend(drained);
    }
}

/// Clears the in-flight site when a compile ends, normally or by panic.
struct InFlightSlot<'a>(&'a Mutex<Option<TaskSite>>);

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

/// Records the worker lifetime and acknowledges termination, including when
/// a compile panics and unwinds the thread.
struct ExitGuard<'a, T> {
    shared: &'a Shared<T>,
    started: Instant,
}

impl<T> Drop for ExitGuard<'_, T> {
    fn drop(&mut self) {
        self.shared.counters.set_lifetime(self.started.elapsed());
        self.shared.alive.store(false, Ordering::Release);
        self.shared.stop_ack.signal();
    }
}

pub(crate) fn run<T: RecompileTask>(shared: Arc<Shared<T>>) {
    let _ = shared.worker_thread.set(thread::current().id());
    let _exit = ExitGuard {
        shared: &shared,
        started: Instant::now(),
    };

    loop {
        shared.input_signal.wait();

        if !shared.compile_delay.is_zero() {
            thread::sleep(shared.compile_delay);
        }

        // Stop and flush are only observed here, between two compiles.
        match shared.control.flag() {
            StopFlag::Continue => shared.compile_next(),
            StopFlag::Stop => {
                tracing::trace!("optimizer thread stopping");
                return;
            }
            StopFlag::Flush => {
                shared.flush_input_on_worker();
                shared.control.resume();
                shared.stop_ack.signal();
            }
        }
    }
}
