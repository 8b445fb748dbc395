//! Demo binary for tokio-translation-orchestrator
//!
//! Wires three echo backends, translates a batch twice (the second pass is
//! served from the cache), runs one analysis call, and prints the status
//! report as JSON.
//!
//! ## Usage
//!
//! ```text
//! translation-orchestrator [config.toml]
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json` for structured JSON output
//! - `RUST_LOG=info` as the log level filter

use std::path::Path;
use std::sync::Arc;
use tokio_translation_orchestrator::{
    backend::{BackendDescriptor, BackendOptions, EchoBackend},
    config::{loader, OrchestratorConfig},
    init_tracing, metrics, Orchestrator, TranslationRequest,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = init_tracing();
    metrics::init_metrics()?;

    let config = match std::env::args().nth(1) {
        Some(path) => loader::load_from_file(Path::new(&path))?,
        None => OrchestratorConfig::default(),
    };

    let backends = vec![
        BackendDescriptor::new("primary", Arc::new(EchoBackend::with_delay(20))),
        BackendDescriptor::new("secondary", Arc::new(EchoBackend::with_delay(35))),
        BackendDescriptor::with_analysis("analyst", Arc::new(EchoBackend::with_delay(50))),
    ];
    let orchestrator = Orchestrator::new(config, backends)?;

    let messages = [
        ("nav.home", "Home"),
        ("nav.settings", "Settings"),
        ("settings.save", "Save your changes"),
        ("settings.discard", "Discard unsaved changes?"),
        ("greeting", "Hello {name}, welcome back!"),
        ("footer.legal", "<b>Terms</b> and <i>Privacy</i>"),
    ];
    let batch = |lang: &str| -> Vec<TranslationRequest> {
        messages
            .iter()
            .map(|(key, text)| TranslationRequest::new(*key, *text, "en", lang))
            .collect()
    };

    info!(count = messages.len(), "translating demo batch");
    for lang in ["de", "fr"] {
        for result in orchestrator.translate_batch(batch(lang)).await {
            println!(
                "{:<18} {:<4} {}",
                result.key,
                lang,
                result.translated.as_deref().unwrap_or("<failed>")
            );
        }
    }

    // Same batch again; every entry is a cache hit.
    let cached = orchestrator.translate_batch(batch("de")).await;
    info!(
        cached = cached.iter().filter(|r| r.from_cache).count(),
        "second pass complete"
    );

    let analysis = orchestrator
        .analyze("Summarise the tone of the settings strings", &BackendOptions::default())
        .await?;
    info!(backend = %analysis.backend, "analysis complete");

    println!("{}", serde_json::to_string_pretty(&orchestrator.status())?);

    let report = orchestrator.shutdown().await?;
    info!(drained = report.drained, "demo complete");
    Ok(())
}
