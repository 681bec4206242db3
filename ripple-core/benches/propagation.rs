//! Benchmarks for change propagation through the reactive graph.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ripple_core::reactive::{Atom, Runtime};

/// A chain of `n` computed nodes read by one sync effect.
fn bench_computed_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("computed_chain");

    for n in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let rt = Runtime::new();
            let source = rt.atom(0u64);

            let reader = source.clone();
            let mut tail: Atom<u64> = rt.compute(move || Ok(reader.get()));
            for _ in 0..n {
                let prev = tail.clone();
                tail = rt.compute(move || Ok(prev.get()? + 1));
            }
            let _sub = rt.sync_effect(&tail, |value: u64, _| {
                black_box(value);
                Ok(())
            });

            let mut next = 0;
            b.iter(|| {
                next += 1;
                source.set(next).unwrap();
            });
        });
    }

    group.finish();
}

/// One atom observed by `n` sync effects.
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for n in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let rt = Runtime::new();
            let source = rt.atom(0u64);
            let _subs: Vec<_> = (0..n)
                .map(|_| {
                    rt.sync_effect(&source, |value: u64, _| {
                        black_box(value);
                        Ok(())
                    })
                })
                .collect();

            let mut next = 0;
            b.iter(|| {
                next += 1;
                source.set(next).unwrap();
            });
        });
    }

    group.finish();
}

/// `n` writes inside one batch, flushed to a single deferred effect.
fn bench_batched_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_writes");

    for n in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let rt = Runtime::new();
            let atoms: Vec<_> = (0..n).map(|_| rt.atom(0u64)).collect();
            let _sub = rt.effect(
                atoms.iter().map(|atom| atom.as_readonly()).collect::<Vec<_>>(),
                |values: Vec<u64>, _| {
                    black_box(values);
                    Ok(())
                },
            );
            rt.run_microtasks();

            let mut next = 0;
            b.iter(|| {
                next += 1;
                rt.batch(|| {
                    for atom in &atoms {
                        atom.set(next).unwrap();
                    }
                });
                rt.run_microtasks();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_computed_chain, bench_fan_out, bench_batched_writes);
criterion_main!(benches);
