//! Minimal CLI for a one-shot ingest run.
//!
//! Usage:
//!   sigweave-ingest --root <dir> [--clear-first] [--store memory|http]
//!
//! Lite mode (skip C2 for tests/docs) is driven by `Config::lite_globs`,
//! not a CLI flag.

use std::sync::Arc;

use sigweave::{
    CancelToken, Config, DependencyGraph, HttpKvStore, IngestionCoordinator, MemoryStore, Store, StructuralIndex,
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

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let root = parse_flag(&args, "--root").unwrap_or_else(|| ".".to_string());
    let clear_first = has_flag(&args, "--clear-first");
    let store_kind = parse_flag(&args, "--store").unwrap_or_else(|| "memory".to_string());

    let config = Config::from_env();

    let store: Arc<dyn Store> = match store_kind.as_str() {
        "http" => Arc::new(HttpKvStore::from_env()?),
        "memory" => Arc::new(MemoryStore::new()),
        other => anyhow::bail!("unknown --store value: {other} (expected memory|http)"),
    };

    let index = Arc::new(StructuralIndex::new(store, config.signature_precision));
    let graph = Arc::new(DependencyGraph::new(config.is_core_threshold));
    let coordinator = IngestionCoordinator::new(index, config, graph.clone());

    eprintln!("Ingesting {root}...");
    let summary = coordinator.ingest(&root, clear_first, CancelToken::new()).await?;

    eprintln!(
        "done: text={} binary={} bytes={} signatures={} skipped={} errors={} avg_chaos={:.3} high_risk={} elapsed_ms={}",
        summary.text_files,
        summary.binary_files,
        summary.total_bytes,
        summary.signatures,
        summary.skipped,
        summary.errors,
        summary.avg_chaos,
        summary.high_risk_count,
        summary.elapsed_ms
    );

    Ok(())
}
