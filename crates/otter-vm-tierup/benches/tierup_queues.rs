use std::hint::black_box;
use std::thread;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use otter_vm_tierup::{BackgroundOptimizer, FunctionKey, RecompileTask, TierUpConfig};

struct SyntheticTask {
    function: FunctionKey,
    osr_pc_offset: Option<u32>,
    work: u32,
}

impl RecompileTask for SyntheticTask {
    type Error = &'static str;

    fn function(&self) -> FunctionKey {
        self.function
    }

    fn osr_pc_offset(&self) -> Option<u32> {
        self.osr_pc_offset
    }

    fn compile(&mut self) -> Result<(), &'static str> {
        let mut acc = 0u64;
        for i in 0..self.work {
            acc = acc.wrapping_mul(31).wrapping_add(u64::from(i));
        }
        black_box(acc);
        Ok(())
    }

    fn install(self) {
        black_box(self.function);
    }

    fn restore_original_code(self) {}
}

fn regular(index: u32) -> SyntheticTask {
    SyntheticTask {
        function: FunctionKey::new(1, index),
        osr_pc_offset: None,
        work: 64,
    }
}

fn bench_submit_install(c: &mut Criterion) {
    let mut group = c.benchmark_group("tierup_submit_install");
    let n = 2_000u32;

    group.bench_function("backpressured_round_trip", |b| {
        b.iter_batched(
            || {
                BackgroundOptimizer::start(TierUpConfig::default().with_max_queue_length(64))
                    .expect("optimizer should start")
            },
            |mut optimizer| {
                let mut installed = 0usize;
                let mut next = 0u32;
                while installed < n as usize {
                    while next < n && optimizer.is_queue_available() {
                        optimizer.submit(regular(next));
                        next += 1;
                    }
                    installed += optimizer.install_optimized_functions();
                    thread::yield_now();
                }
                black_box(installed);
                optimizer.stop();
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

fn bench_osr_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("tierup_osr_buffer");
    let n = 1_000u32;

    group.bench_function("insert_past_capacity_then_probe", |b| {
        b.iter_batched(
            || {
                BackgroundOptimizer::start(TierUpConfig::default().with_max_queue_length(8))
                    .expect("optimizer should start")
            },
            |mut optimizer| {
                for offset in 0..n {
                    optimizer.submit(SyntheticTask {
                        function: FunctionKey::new(2, 0),
                        osr_pc_offset: Some(offset),
                        work: 8,
                    });
                }
                while optimizer.stats().compiled < u64::from(n) {
                    thread::yield_now();
                }
                let mut hits = 0usize;
                for offset in (0..n).rev() {
                    if optimizer
                        .find_ready_osr_candidate(FunctionKey::new(2, 0), offset)
                        .is_some()
                    {
                        hits += 1;
                    }
                }
                black_box(hits);
                optimizer.stop();
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_submit_install, bench_osr_churn);
criterion_main!(benches);
