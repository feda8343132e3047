//! Benchmark: write propagation through atoms, memos and wrappers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quiver_core::reactive::{atom, effect, memo, reactive, Target, Value};

fn number(value: Value) -> f64 {
    value.as_f64().unwrap_or_default()
}

fn benchmark_atom_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("atom_fan_out");
    for subscribers in [1usize, 10, 100] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let source = atom(0);
                let sink = Arc::new(AtomicU64::new(0));
                let effects: Vec<_> = (0..subscribers)
                    .map(|_| {
                        let (reader, sink) = (source.clone(), sink.clone());
                        effect(move || {
                            sink.fetch_add(number(reader.get()) as u64, Ordering::Relaxed);
                        })
                    })
                    .collect();

                let mut next = 0u32;
                b.iter(|| {
                    next += 1;
                    source.set(black_box(next));
                });
                for e in &effects {
                    e.stop();
                }
                assert_eq!(source.subscriber_count(), 0);
            },
        );
    }
    group.finish();
}

fn benchmark_memo_chain(c: &mut Criterion) {
    c.bench_function("memo_chain_depth_32", |b| {
        let source = atom(0);
        let reader = source.clone();
        let mut tip = memo(move || number(reader.get()));
        for _ in 0..31 {
            let previous = tip.clone();
            tip = memo(move || previous.get() + 1.0);
        }

        let mut next = 0u32;
        b.iter(|| {
            next += 1;
            source.set(next);
            black_box(tip.get())
        });
    });
}

fn benchmark_wrapper_property_write(c: &mut Criterion) {
    c.bench_function("wrapper_property_write", |b| {
        let state = reactive(&Target::object([("a", 0), ("b", 0)]));
        let reader = state.clone();
        let e = effect(move || {
            black_box(reader.get("a"));
        });

        let mut next = 0u32;
        b.iter(|| {
            next += 1;
            state.set("a", black_box(next));
            // Untracked key: no subscriber runs.
            state.set("b", black_box(next));
        });
        e.stop();
    });
}

criterion_group!(
    benches,
    benchmark_atom_fan_out,
    benchmark_memo_chain,
    benchmark_wrapper_property_write
);
criterion_main!(benches);
