//! Dispatch benchmarks: measures orchestration overhead around a zero-delay
//! echo backend.
//!
//! - `fingerprint_*`: cache key computation for short and long inputs
//! - `admission_enqueue`: one uncontended slot grant + release
//! - `translate_cold` / `translate_cached`: full pipeline, miss vs hit
//! - `batch_*`: bounded-concurrency batch submission

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_translation_orchestrator::{
    admission::{AdmissionError, AdmissionQueue, Priority},
    backend::{BackendDescriptor, EchoBackend},
    cache,
    config::{CacheConfig, OrchestratorConfig, QueueConfig},
    Orchestrator, TranslationRequest,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn orchestrator(cache_enabled: bool) -> Orchestrator {
    let config = OrchestratorConfig {
        cache: CacheConfig {
            enabled: cache_enabled,
            ..CacheConfig::default()
        },
        ..OrchestratorConfig::default()
    };
    Orchestrator::new(
        config,
        vec![
            BackendDescriptor::new("a", Arc::new(EchoBackend::with_delay(0))),
            BackendDescriptor::new("b", Arc::new(EchoBackend::with_delay(0))),
        ],
    )
    .expect("orchestrator")
}

fn request(i: usize) -> TranslationRequest {
    TranslationRequest::new(
        format!("bench.{i}"),
        format!("Benchmark message number {i}"),
        "en",
        "de",
    )
}

// ---------------------------------------------------------------------------
// Bench: fingerprint
// ---------------------------------------------------------------------------

fn bench_fingerprint(c: &mut Criterion) {
    let short = "Save your changes";
    let long = "lorem ipsum dolor sit amet ".repeat(400);

    c.bench_function("fingerprint_short", |b| {
        b.iter(|| black_box(cache::fingerprint(black_box(short), "de", "plain")))
    });
    c.bench_function("fingerprint_long", |b| {
        b.iter(|| black_box(cache::fingerprint(black_box(&long), "de", "plain")))
    });
}

// ---------------------------------------------------------------------------
// Bench: admission
// ---------------------------------------------------------------------------

fn bench_admission(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let queue = AdmissionQueue::new(QueueConfig::default());
    queue.register("a");

    c.bench_function("admission_enqueue", |b| {
        b.to_async(&rt).iter(|| async {
            let out: Result<u32, AdmissionError<()>> = queue
                .enqueue("a", Priority::Normal, || async { Ok::<_, ()>(1) })
                .await;
            black_box(out)
        })
    });
}

// ---------------------------------------------------------------------------
// Bench: full pipeline
// ---------------------------------------------------------------------------

fn bench_translate(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let cold = orchestrator(false);
    c.bench_function("translate_cold", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(cold.translate(request(0)).await) })
    });

    let warm = orchestrator(true);
    rt.block_on(warm.translate(request(0)));
    c.bench_function("translate_cached", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(warm.translate(request(0)).await) })
    });
}

fn bench_batch(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let orch = orchestrator(false);
    let mut group = c.benchmark_group("batch");

    for size in [10usize, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async {
                let requests = (0..size).map(request).collect();
                black_box(orch.translate_batch(requests).await)
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_fingerprint,
    bench_admission,
    bench_translate,
    bench_batch
);
criterion_main!(benches);
