//! Minimal CLI that watches a root and keeps the store synchronized.
//!
//! Usage:
//!   sigweave-watch --root <dir> [--store memory|http]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sigweave::{
    Config, DependencyGraph, HeuristicExtractor, HttpKvStore, ImportExtractor, IngestionCoordinator, MemoryStore,
    Store, StructuralIndex,
};

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let root: PathBuf = parse_flag(&args, "--root").unwrap_or_else(|| ".".to_string()).into();
    let store_kind = parse_flag(&args, "--store").unwrap_or_else(|| "memory".to_string());

    let config = Config::from_env();

    let store: Arc<dyn Store> = match store_kind.as_str() {
        "http" => Arc::new(HttpKvStore::from_env()?),
        "memory" => Arc::new(MemoryStore::new()),
        other => anyhow::bail!("unknown --store value: {other} (expected memory|http)"),
    };

    let index = Arc::new(StructuralIndex::new(store, config.signature_precision));
    let graph = Arc::new(DependencyGraph::new(config.is_core_threshold));
    let extractor: Arc<dyn ImportExtractor> = Arc::new(HeuristicExtractor::default());
    let coordinator = Arc::new(IngestionCoordinator::with_extractor(
        index.clone(),
        config.clone(),
        graph.clone(),
        extractor.clone(),
    ));

    eprintln!("Initial ingest of {}...", root.display());
    let summary = coordinator
        .ingest(&root, false, sigweave::CancelToken::new())
        .await?;
    eprintln!("indexed {} text files, {} binary files", summary.text_files, summary.binary_files);

    let debounce_window = Duration::from_millis(config.watcher_debounce_ms);
    let (mut events, _watcher) = sigweave::spawn_watcher(root.clone(), debounce_window)?;

    eprintln!("Watching {} for changes...", root.display());
    while let Some(event) = events.recv().await {
        match event.kind {
            sigweave::FileEventKind::Created | sigweave::FileEventKind::Modified => {
                let Ok(body) = tokio::fs::read(&event.path).await else { continue };
                let rel = event
                    .path
                    .strip_prefix(&root)
                    .unwrap_or(&event.path)
                    .to_string_lossy()
                    .replace('\\', "/");
                let encoder_params = sigweave::EncoderParams {
                    window: config.window_bytes,
                    stride: config.stride_bytes,
                    precision: config.signature_precision,
                };
                let chaos_params = sigweave::ChaosParams {
                    state_window: config.chaos_state_window,
                    hazard_percentile: config.chaos_hazard_percentile,
                    high_threshold: config.chaos_high_threshold,
                };
                let is_text = std::str::from_utf8(&body).is_ok();
                let (signature, chaos) = if is_text {
                    match sigweave::encoder::encode(&body, encoder_params) {
                        Ok(encoded) => {
                            let profile = sigweave::chaos::analyze(&encoded, chaos_params).profile;
                            (Some(encoded.aggregate), profile)
                        }
                        Err(_) => (None, None),
                    }
                } else {
                    (None, None)
                };
                let imports: Vec<String> =
                    if is_text { extractor.extract_imports(&body).into_iter().collect() } else { Vec::new() };
                if let Err(e) = index.put_file(&rel, &body, is_text, signature, chaos, imports).await {
                    tracing::warn!(path = %rel, error = %e, "watcher failed to update file");
                } else if let Err(e) = graph.rebuild_from_index(&index, extractor.as_ref()).await {
                    tracing::warn!(error = %e, "watcher failed to rebuild dependency graph");
                }
            }
            sigweave::FileEventKind::Deleted => {
                let rel = event
                    .path
                    .strip_prefix(&root)
                    .unwrap_or(&event.path)
                    .to_string_lossy()
                    .replace('\\', "/");
                if let Err(e) = index.delete_file(&rel).await {
                    tracing::warn!(path = %rel, error = %e, "watcher failed to delete file");
                } else if let Err(e) = graph.rebuild_from_index(&index, extractor.as_ref()).await {
                    tracing::warn!(error = %e, "watcher failed to rebuild dependency graph");
                }
            }
        }
    }

    Ok(())
}
