use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use strand_runtime::{task, MemoryBackend, Scheduler, SchedulerConfig};

fn memory_scheduler(compute_drivers: usize, backend: Arc<MemoryBackend>) -> Scheduler {
    Scheduler::with_backend(SchedulerConfig::new(compute_drivers), backend).unwrap()
}

fn bench_spawn_and_complete(c: &mut Criterion) {
    c.bench_function("spawn_empty_task", |b| {
        let scheduler = memory_scheduler(1, Arc::new(MemoryBackend::new()));
        b.iter(|| {
            scheduler.spawn(|| {}).unwrap();
            while scheduler.active_tasks() > 0 {
                std::hint::spin_loop();
            }
        });
        scheduler.shutdown().unwrap();
    });
}

fn bench_yield(c: &mut Criterion) {
    let mut group = c.benchmark_group("yield");

    for yields in [10u64, 100, 1000] {
        group.throughput(Throughput::Elements(yields));
        group.bench_with_input(BenchmarkId::new("single_task", yields), &yields, |b, &yields| {
            let scheduler = memory_scheduler(1, Arc::new(MemoryBackend::new()));
            b.iter(|| {
                scheduler
                    .spawn(move || {
                        for _ in 0..black_box(yields) {
                            task::yield_now().unwrap();
                        }
                    })
                    .unwrap();
                while scheduler.active_tasks() > 0 {
                    std::hint::spin_loop();
                }
            });
            scheduler.shutdown().unwrap();
        });
    }

    group.finish();
}

fn bench_blocking_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("blocking_io");

    for writes in [1u64, 16] {
        group.throughput(Throughput::Elements(writes));
        group.bench_with_input(BenchmarkId::new("writes", writes), &writes, |b, &writes| {
            let backend = Arc::new(MemoryBackend::new().with_file("bench", Vec::new()));
            let scheduler = memory_scheduler(1, backend);
            b.iter(|| {
                scheduler
                    .spawn(move || {
                        let fd = task::blocking_open("bench").unwrap();
                        for _ in 0..writes {
                            task::blocking_write(fd, black_box(b"0123456789abcdef")).unwrap();
                        }
                        task::blocking_close(fd).unwrap();
                    })
                    .unwrap();
                while scheduler.active_tasks() > 0 {
                    std::hint::spin_loop();
                }
            });
            scheduler.shutdown().unwrap();
        });
    }

    group.finish();
}

criterion_group!(benches, bench_spawn_and_complete, bench_yield, bench_blocking_write);
criterion_main!(benches);
