use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reactor_web::timer::TimerHeap;

fn add_many(c: &mut Criterion) {
    c.bench_function("timer add 10k entries", |b| {
        b.iter(|| {
            let mut heap = TimerHeap::with_capacity(10_000);
            for id in 0..10_000usize {
                heap.add(black_box(id), Duration::from_millis((id % 5000) as u64), |_| {});
            }
            heap
        });
    });
}

fn adjust_existing(c: &mut Criterion) {
    c.bench_function("timer adjust 10k live entries", |b| {
        b.iter_batched(
            || {
                let mut heap = TimerHeap::with_capacity(10_000);
                for id in 0..10_000usize {
                    heap.add(id, Duration::from_millis((id % 5000) as u64), |_| {});
                }
                heap
            },
            |mut heap| {
                for id in 0..10_000usize {
                    heap.adjust(black_box(id), Duration::from_secs(60));
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, add_many, adjust_existing);
criterion_main!(benches);
