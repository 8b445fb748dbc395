//! # Orchestrator End-to-End
//!
//! Full pipeline runs against counting backends: stale-while-revalidate
//! refreshes, failover through the façade, batch isolation, custom pipelines
//! and shutdown.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_translation_orchestrator::backend::{
    BackendDescriptor, BackendError, BackendOptions, EchoBackend, TranslationBackend,
};
use tokio_translation_orchestrator::config::{CacheConfig, OrchestratorConfig, ThrottleConfig};
use tokio_translation_orchestrator::pipeline::{
    steps, Flow, Pipeline, PipelineError, RequestContext, Step,
};
use tokio_translation_orchestrator::{Orchestrator, TranslationRequest};

/// Echo backend that counts calls and can be told to fail.
struct Counting {
    calls: AtomicUsize,
    fail: bool,
}

impl Counting {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranslationBackend for Counting {
    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        target_lang: &str,
        _options: &BackendOptions,
    ) -> Result<String, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(BackendError::Network("connection reset".into()));
        }
        Ok(format!("[{target_lang}#{n}] {text}"))
    }
}

fn config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.queue.throttle = ThrottleConfig {
        enabled: false,
        ..ThrottleConfig::default()
    };
    config
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_served_twice_refreshed_once() {
    let backend = Counting::ok();
    let mut config = config();
    config.cache = CacheConfig {
        ttl_s: 1,
        max_stale_s: 60,
        ..CacheConfig::default()
    };
    let orch = Orchestrator::new(config, vec![BackendDescriptor::new("main", backend.clone())])
        .expect("orchestrator");
    let request = || TranslationRequest::new("greeting", "Hello there", "en", "de");

    let first = orch.translate(request()).await;
    assert_eq!(first.translated.as_deref(), Some("[de#1] Hello there"));
    assert_eq!(backend.calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;

    let a = orch.translate(request()).await;
    let b = orch.translate(request()).await;
    for r in [&a, &b] {
        assert!(r.success);
        assert!(r.from_cache && r.stale);
        assert_eq!(r.translated.as_deref(), Some("[de#1] Hello there"));
    }

    // Let the single background refresh run.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.calls(), 2, "exactly one refresh");

    let fresh = orch.translate(request()).await;
    assert!(fresh.from_cache);
    assert!(!fresh.stale);
    assert_eq!(fresh.translated.as_deref(), Some("[de#2] Hello there"));

    let stats = orch.status().cache;
    assert_eq!(stats.stale_hits, 2);
    assert_eq!(stats.refreshes, 1);
    // The refresh skips the cache read, so only the first call missed and
    // only the final call hit.
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_entries_past_max_stale_are_misses() {
    let backend = Counting::ok();
    let mut config = config();
    config.cache = CacheConfig {
        ttl_s: 1,
        max_stale_s: 5,
        ..CacheConfig::default()
    };
    let orch = Orchestrator::new(config, vec![BackendDescriptor::new("main", backend.clone())])
        .expect("orchestrator");
    let request = || TranslationRequest::new("k", "Good morning", "en", "fr");

    orch.translate(request()).await;
    tokio::time::advance(Duration::from_secs(10)).await;

    let result = orch.translate(request()).await;
    assert!(!result.from_cache);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_failover_through_the_facade() {
    let down = Counting::failing();
    let up = Counting::ok();
    let orch = Orchestrator::new(
        config(),
        vec![
            BackendDescriptor::new("down", down.clone()),
            BackendDescriptor::new("up", up.clone()),
        ],
    )
    .expect("orchestrator");

    let result = orch
        .translate(TranslationRequest::new("k", "Hello", "en", "de"))
        .await;
    assert!(result.success);
    assert_eq!(result.backend.as_deref(), Some("up"));
    assert!(down.calls() >= 1);

    let status = orch.status();
    let down_health = status
        .backends
        .iter()
        .find(|h| h.name == "down")
        .expect("down present");
    assert_eq!(down_health.failures as usize, down.calls());
    assert!(down_health
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("connection reset")));
}

#[tokio::test]
async fn test_every_backend_down_fails_the_result() {
    let orch = Orchestrator::new(
        config(),
        vec![
            BackendDescriptor::new("x", Counting::failing()),
            BackendDescriptor::new("y", Counting::failing()),
        ],
    )
    .expect("orchestrator");

    let result = orch
        .translate(TranslationRequest::new("k", "Hello", "en", "de"))
        .await;
    assert!(!result.success);
    assert!(result.translated.is_none());
    assert!(result
        .error
        .as_deref()
        .is_some_and(|e| e.contains("all backends failed")));
    assert_eq!(orch.status().cache.size, 0);
}

#[tokio::test]
async fn test_batch_mixes_successes_and_validation_failures() {
    let orch = Orchestrator::new(
        config(),
        vec![BackendDescriptor::new("echo", Arc::new(EchoBackend::with_delay(1)))],
    )
    .expect("orchestrator");

    let mut requests: Vec<_> = (0..25)
        .map(|i| TranslationRequest::new(format!("k{i}"), format!("Line {i}"), "en", "es"))
        .collect();
    requests[7].text = "x".repeat(20_000);

    let results = orch.translate_batch(requests).await;
    assert_eq!(results.len(), 25);
    assert!(!results[7].success);
    assert_eq!(results.iter().filter(|r| r.success).count(), 24);
    assert_eq!(results[3].translated.as_deref(), Some("[es] Line 3"));
}

struct Canned;

#[async_trait]
impl Step for Canned {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, PipelineError> {
        ctx.succeed_with("canned answer");
        Ok(Flow::Halt)
    }
}

struct Unreachable;

#[async_trait]
impl Step for Unreachable {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn run(&self, _ctx: &mut RequestContext) -> Result<Flow, PipelineError> {
        Err(PipelineError::Step {
            step: "unreachable",
            message: "ran after a halt".into(),
        })
    }
}

#[tokio::test]
async fn test_custom_pipeline_short_circuit_keeps_result() {
    let pipeline = Pipeline::new()
        .with_step(steps::Validate::new(Default::default()))
        .with_step(Canned)
        .with_step(Unreachable);

    let mut ctx = RequestContext::new(TranslationRequest::new("k", "Hello", "en", "de"));
    pipeline.execute(&mut ctx).await.expect("halted cleanly");
    assert!(ctx.result.success);
    assert_eq!(ctx.result.translated.as_deref(), Some("canned answer"));
}

#[tokio::test]
async fn test_shutdown_rejects_new_backend_work() {
    let backend = Counting::ok();
    let orch = Orchestrator::new(config(), vec![BackendDescriptor::new("main", backend.clone())])
        .expect("orchestrator");

    orch.translate(TranslationRequest::new("k", "Hello", "en", "de"))
        .await;
    let report = orch.shutdown().await.expect("shutdown");
    assert!(report.drained);
    assert_eq!(report.cleared, 0);
    assert!(!orch.is_accepting());

    let late = orch
        .translate(TranslationRequest::new("k2", "Bye", "en", "de"))
        .await;
    assert!(!late.success);
    assert_eq!(backend.calls(), 1);
}
