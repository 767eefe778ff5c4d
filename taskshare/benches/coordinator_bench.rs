//! Benchmarks for task sharing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use taskshare::prelude::*;

fn coordinator_benchmark(c: &mut Criterion) {
    c.bench_function("register_and_fulfill", |b| {
        let coordinator: TaskCoordinator<u64, u64> = TaskCoordinator::new();
        b.iter(|| {
            let (task, resolver) = SharedTask::pending(1);
            let view = coordinator.register(black_box(1), task);
            resolver.fulfill(42);
            black_box(view.result().is_fulfilled())
        });
    });

    c.bench_function("lookup_ten_children", |b| {
        let coordinator: TaskCoordinator<u64, u64> = TaskCoordinator::new();
        b.iter(|| {
            let (task, resolver) = SharedTask::pending(1);
            let mut views = vec![coordinator.register(1, task)];
            for _ in 0..9 {
                views.extend(coordinator.lookup(black_box(&1)));
            }
            resolver.fulfill(42);
            black_box(views.len())
        });
    });

    c.bench_function("cancel_one_of_two", |b| {
        let coordinator: TaskCoordinator<u64, u64> = TaskCoordinator::new();
        b.iter(|| {
            let (task, resolver) = SharedTask::pending(1);
            let first = coordinator.register(1, task);
            let second = coordinator.lookup(&1);
            first.cancel();
            resolver.fulfill(42);
            black_box(second.map(|view| view.result().is_fulfilled()))
        });
    });
}

criterion_group!(benches, coordinator_benchmark);
criterion_main!(benches);
