//! Benchmarks for field tracking and validator diffing
//!
//! Run with: cargo bench -p fluentform-core --bench tracking

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fluentform_core::forms::{FormGroup, Validators};
use fluentform_core::reactive::{Effect, Runtime, Scope, Signal};
use fluentform_core::tracking::{TrackerOptions, ValueProxy};
use fluentform_core::validation::ValidatorEngine;
use serde_json::{json, Map, Value};

/// A flat group with `n` numeric fields `f0..fn`.
fn make_group(n: usize) -> FormGroup {
    let mut fields = Map::new();
    for i in 0..n {
        fields.insert(format!("f{i}"), json!(i));
    }
    FormGroup::from_value(&Value::Object(fields))
}

fn bench_proxy_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracking/proxy_read");

    for n in [8usize, 64, 256] {
        group.throughput(Throughput::Elements(n as u64));
        let form = make_group(n);
        let proxy = ValueProxy::new(&form, &Scope::new(), TrackerOptions::new());
        // Warm the cells so the loop measures cached reads
        for i in 0..n {
            proxy.get(&format!("f{i}"));
        }
        let names: Vec<String> = (0..n).map(|i| format!("f{i}")).collect();
        group.bench_with_input(BenchmarkId::new("get", n), &names, |b, names| {
            b.iter(|| {
                for name in names {
                    black_box(proxy.get(name));
                }
            })
        });
    }

    group.finish();
}

fn bench_single_field_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracking/write_one_of_n");

    for n in [8usize, 64, 256] {
        let form = make_group(n);
        let proxy = ValueProxy::new(&form, &Scope::new(), TrackerOptions::new());
        let p = proxy.clone();
        let _effect = Effect::new(move || {
            black_box(p.get("f0"));
        });
        let last = form.get(&format!("f{}", n - 1)).unwrap();
        let mut tick = 0i64;
        group.bench_function(BenchmarkId::new("untracked_field", n), |b| {
            b.iter(|| {
                tick += 1;
                last.set_value(json!(tick));
                Runtime::flush();
            })
        });
    }

    group.finish();
}

fn bench_identical_revalidation(c: &mut Criterion) {
    let scope = Scope::new();
    let engine = ValidatorEngine::new(&scope);
    let form = make_group(16);
    let targets: Vec<_> = form.children();
    let tick = Signal::new(0u64);
    let t = tick.clone();
    let required = Validators::required();
    engine.conditional(targets, move || {
        t.get();
        required.clone()
    });

    let mut n = 0u64;
    c.bench_function("validation/identical_rerun_16_targets", |b| {
        b.iter(|| {
            n += 1;
            tick.set(n);
            Runtime::flush();
        })
    });
}

criterion_group!(
    benches,
    bench_proxy_reads,
    bench_single_field_write,
    bench_identical_revalidation
);
criterion_main!(benches);
