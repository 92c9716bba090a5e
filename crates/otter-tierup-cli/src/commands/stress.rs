//! Stress command - drive the optimizer with synthetic tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Args;
use otter_vm_tierup::{BackgroundOptimizer, FunctionKey, RecompileTask, TierUpConfig, TierUpStats};
use parking_lot::Mutex;

const MODULE_ID: u64 = 1;

#[derive(Args)]
pub struct StressCommand {
    /// Number of tasks to submit
    #[arg(long, default_value_t = 1000)]
    pub tasks: u32,

    /// Number of distinct functions the tasks target
    #[arg(long, default_value_t = 64)]
    pub functions: u32,

    /// Make every K-th task an OSR task (0 disables)
    #[arg(long, default_value_t = 4)]
    pub osr_every: u32,

    /// Make every F-th compile fail (0 disables)
    #[arg(long, default_value_t = 10)]
    pub fail_every: u32,

    /// Backpressure bound (defaults to OTTER_TIERUP_QUEUE_LENGTH or 8)
    #[arg(long)]
    pub queue_length: Option<usize>,

    /// Busy work per compile, in microseconds
    #[arg(long, default_value_t = 50)]
    pub work_us: u64,

    /// Worker pause after every wake-up, in milliseconds
    /// (defaults to OTTER_TIERUP_DELAY_MS)
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Disable the OSR buffer
    #[arg(long)]
    pub no_osr: bool,

    /// Flush the optimizer after this many submissions
    #[arg(long)]
    pub flush_after: Option<u32>,

    /// Restore original code for tasks discarded by --flush-after
    #[arg(long)]
    pub flush_restore: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Which code each function currently runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Baseline,
    Optimized,
    OsrEntered,
}

/// Stand-in for the VM's function table.
#[derive(Clone, Default)]
struct CodeTable(Arc<Mutex<HashMap<FunctionKey, Tier>>>);

impl CodeTable {
    fn set(&self, function: FunctionKey, tier: Tier) {
        self.0.lock().insert(function, tier);
    }

    fn count(&self, tier: Tier) -> usize {
        self.0.lock().values().filter(|t| **t == tier).count()
    }
}

struct SyntheticTask {
    function: FunctionKey,
    osr_pc_offset: Option<u32>,
    fail: bool,
    work: Duration,
    table: CodeTable,
}

impl RecompileTask for SyntheticTask {
    type Error = String;

    fn function(&self) -> FunctionKey {
        self.function
    }

    fn osr_pc_offset(&self) -> Option<u32> {
        self.osr_pc_offset
    }

    fn compile(&mut self) -> Result<(), String> {
        let started = Instant::now();
        while started.elapsed() < self.work {
            std::hint::spin_loop();
        }
        if self.fail {
            return Err(format!("type feedback for {} went megamorphic", self.function));
        }
        Ok(())
    }

    fn install(self) {
        let tier = if self.osr_pc_offset.is_some() {
            Tier::OsrEntered
        } else {
            Tier::Optimized
        };
        self.table.set(self.function, tier);
    }

    fn restore_original_code(self) {
        self.table.set(self.function, Tier::Baseline);
    }
}

#[derive(Default)]
struct DriverCounters {
    osr_entered: usize,
    backpressure_waits: u64,
    duplicate_osr_suppressed: u64,
}

impl StressCommand {
    pub fn run(&self) -> Result<()> {
        if self.functions == 0 {
            bail!("--functions must be at least 1");
        }

        let mut config = TierUpConfig::from_env();
        if self.no_osr {
            config = config.with_osr(false);
        }
        if let Some(length) = self.queue_length {
            config = config.with_max_queue_length(length);
        }
        if let Some(delay_ms) = self.delay_ms {
            config = config.with_compile_delay(Duration::from_millis(delay_ms));
        }

        let table = CodeTable::default();
        let mut optimizer = BackgroundOptimizer::start(config)?;
        let mut counters = DriverCounters::default();
        let mut pending_osr: Vec<(FunctionKey, u32)> = Vec::new();
        let started = Instant::now();

        let mut next = 0u32;
        while next < self.tasks {
            if !optimizer.is_queue_available() {
                counters.backpressure_waits += 1;
                self.service(&mut optimizer, &mut pending_osr, &mut counters);
                thread::yield_now();
                continue;
            }

            let task = self.make_task(next, &table);
            next += 1;

            if let Some(pc_offset) = task.osr_pc_offset {
                if optimizer.is_queued_for_osr(task.function, pc_offset) {
                    counters.duplicate_osr_suppressed += 1;
                    continue;
                }
                pending_osr.push((task.function, pc_offset));
            }
            optimizer.submit(task);

            if self.flush_after == Some(next) {
                tracing::info!(submitted = next, restore = self.flush_restore, "flushing optimizer");
                optimizer.flush(self.flush_restore);
                pending_osr.clear();
            }
        }

        self.drain(&mut optimizer, &mut pending_osr, &mut counters);
        optimizer.stop();

        let elapsed = started.elapsed();
        let stats = optimizer.stats();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report_json(&stats, &counters, &table, elapsed))?);
        } else {
            print_report(&stats, &counters, &table, elapsed);
        }

        Ok(())
    }

    fn make_task(&self, index: u32, table: &CodeTable) -> SyntheticTask {
        let function = FunctionKey::new(MODULE_ID, index % self.functions);
        let osr_pc_offset = (self.osr_every != 0 && index % self.osr_every == 0)
            .then(|| (index / self.functions % 4) * 16);
        SyntheticTask {
            function,
            osr_pc_offset,
            fail: self.fail_every != 0 && index % self.fail_every == self.fail_every - 1,
            work: Duration::from_micros(self.work_us),
            table: table.clone(),
        }
    }

    /// Install finished work and try to enter waiting OSR sites.
    fn service(
        &self,
        optimizer: &mut BackgroundOptimizer<SyntheticTask>,
        pending_osr: &mut Vec<(FunctionKey, u32)>,
        counters: &mut DriverCounters,
    ) {
        optimizer.install_optimized_functions();

        pending_osr.retain(|&(function, pc_offset)| {
            if let Some(task) = optimizer.find_ready_osr_candidate(function, pc_offset) {
                task.install();
                counters.osr_entered += 1;
                return false;
            }
            // Evicted or failed: nothing will ever show up for this site.
            optimizer.is_queued_for_osr(function, pc_offset)
        });
    }

    fn drain(
        &self,
        optimizer: &mut BackgroundOptimizer<SyntheticTask>,
        pending_osr: &mut Vec<(FunctionKey, u32)>,
        counters: &mut DriverCounters,
    ) {
        let settled = |stats: &TierUpStats| stats.compiled + stats.compile_failures;
        let mut last = settled(&optimizer.stats());
        loop {
            self.service(optimizer, pending_osr, counters);
            thread::sleep(Duration::from_millis(5));
            let now = settled(&optimizer.stats());
            if optimizer.outstanding() == 0 && now == last {
                break;
            }
            last = now;
        }
        self.service(optimizer, pending_osr, counters);
    }
}

fn report_json(
    stats: &TierUpStats,
    counters: &DriverCounters,
    table: &CodeTable,
    elapsed: Duration,
) -> serde_json::Value {
    serde_json::json!({
        "elapsed_ms": elapsed.as_secs_f64() * 1e3,
        "submitted": stats.submitted,
        "compiled": stats.compiled,
        "compile_failures": stats.compile_failures,
        "installed": stats.installed,
        "discarded": stats.discarded,
        "restored": stats.restored,
        "osr": {
            "inserted": stats.osr_inserted,
            "evicted": stats.osr_evicted,
            "hits": stats.osr_hits,
            "attempts": stats.osr_attempts,
            "entered": counters.osr_entered,
            "duplicates_suppressed": counters.duplicate_osr_suppressed,
        },
        "backpressure_waits": counters.backpressure_waits,
        "worker": {
            "compiling_ms": stats.time_spent_compiling.as_secs_f64() * 1e3,
            "total_ms": stats.time_spent_total.as_secs_f64() * 1e3,
        },
        "functions": {
            "optimized": table.count(Tier::Optimized),
            "osr_entered": table.count(Tier::OsrEntered),
            "baseline": table.count(Tier::Baseline),
        },
    })
}

fn print_report(stats: &TierUpStats, counters: &DriverCounters, table: &CodeTable, elapsed: Duration) {
    println!("elapsed             {:>10.2} ms", elapsed.as_secs_f64() * 1e3);
    println!("submitted           {:>10}", stats.submitted);
    println!("compiled            {:>10}", stats.compiled);
    println!("compile failures    {:>10}", stats.compile_failures);
    println!("installed           {:>10}", stats.installed);
    println!("discarded           {:>10}", stats.discarded);
    println!("restored            {:>10}", stats.restored);
    println!("backpressure waits  {:>10}", counters.backpressure_waits);
    println!(
        "osr                 {:>10} inserted, {} evicted, {}/{} hits ({:.1}%), {} duplicates suppressed",
        stats.osr_inserted,
        stats.osr_evicted,
        stats.osr_hits,
        stats.osr_attempts,
        stats.osr_hit_rate() * 100.0,
        counters.duplicate_osr_suppressed,
    );
    println!(
        "worker              {:>10.2} ms compiling of {:.2} ms",
        stats.time_spent_compiling.as_secs_f64() * 1e3,
        stats.time_spent_total.as_secs_f64() * 1e3,
    );
    println!(
        "functions           {:>10} optimized, {} via OSR, {} baseline",
        table.count(Tier::Optimized),
        table.count(Tier::OsrEntered),
        table.count(Tier::Baseline),
    );
}
