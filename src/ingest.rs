//! Ingestion coordinator (C4, spec §4.4): walk a root, classify files,
//! run the C1→C2→C3 pipeline per file, batch writes, and report a
//! first-class summary.
//!
//! Shape: parse configuration, validate, run the pipeline end to end,
//! report a concise digest.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::chaos::{analyze, ChaosParams};
use crate::config::Config;
use crate::deps::{DependencyGraph, HeuristicExtractor, ImportExtractor};
use crate::encoder::{encode, EncoderParams};
use crate::index::{PutFileEntry, StructuralIndex};
use crate::model::RiskClass;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Index(#[from] crate::index::IndexError),
    #[error("ingest cancelled")]
    Cancelled,
}

/// `{text_files, binary_files, total_bytes, signatures, skipped, errors,
/// avg_chaos, high_risk_count, elapsed_ms}` (spec §4.4).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub text_files: usize,
    pub binary_files: usize,
    pub total_bytes: u64,
    pub signatures: usize,
    pub skipped: usize,
    pub errors: usize,
    pub avg_chaos: f64,
    pub high_risk_count: usize,
    pub elapsed_ms: u64,
    pub cancelled: bool,
}

/// Cooperative cancellation token (spec §5 "Cancellation"): a long-running
/// operation checks it between units of work and returns a partial,
/// marked-cancelled result rather than rolling back committed files.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<std::sync::atomic::AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Default ignored-directory prefix and binary-extension set (spec §4.4
/// item 1).
const IGNORED_DIR_PREFIX: char = '.';
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "so", "dylib", "dll", "exe", "bin", "zip", "gz", "tar", "pdf", "woff", "woff2",
];

fn is_ignored_dir(name: &str) -> bool {
    name.starts_with(IGNORED_DIR_PREFIX)
}

fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| BINARY_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Quick text/binary heuristic (spec §4.4 item 1): valid-UTF-8 prefix
/// sniff plus a NUL-byte check over the first 8 KiB.
fn classify_text(body: &[u8]) -> bool {
    let prefix_len = body.len().min(8192);
    let prefix = &body[..prefix_len];
    if prefix.contains(&0u8) {
        return false;
    }
    std::str::from_utf8(prefix).is_ok()
}

/// Builds the `lite_globs` matcher once per ingest run (spec §4.4 item 5).
fn build_lite_matcher(globs: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in globs {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

/// Drives the filesystem-walk and watcher pipelines into a [`StructuralIndex`],
/// keeping a [`DependencyGraph`] (C5) in sync with every successful write.
pub struct IngestionCoordinator {
    index: Arc<StructuralIndex>,
    config: Config,
    graph: Arc<DependencyGraph>,
    extractor: Arc<dyn ImportExtractor>,
}

impl IngestionCoordinator {
    /// Uses the built-in [`HeuristicExtractor`] (spec §4.9 "a trivial
    /// built-in implementation... documented as a placeholder, not a
    /// language-aware parser"). Use [`Self::with_extractor`] to plug in a
    /// real one.
    #[must_use]
    pub fn new(index: Arc<StructuralIndex>, config: Config, graph: Arc<DependencyGraph>) -> Self {
        Self::with_extractor(index, config, graph, Arc::new(HeuristicExtractor::default()))
    }

    #[must_use]
    pub fn with_extractor(
        index: Arc<StructuralIndex>,
        config: Config,
        graph: Arc<DependencyGraph>,
        extractor: Arc<dyn ImportExtractor>,
    ) -> Self {
        Self { index, config, graph, extractor }
    }

    /// Walk `root`, classify, encode/analyze text files, and commit via
    /// `StructuralIndex::put_file` in batches of `ingest_batch` (spec §4.4
    /// items 1-3). `clear_first` implements item 4. `cancel` implements
    /// spec §5's cooperative cancellation contract.
    #[tracing::instrument(skip(self, cancel), fields(root = %root.as_ref().display()))]
    pub async fn ingest(
        &self,
        root: impl AsRef<Path>,
        clear_first: bool,
        cancel: CancelToken,
    ) -> Result<IngestSummary, IngestError> {
        let start = Instant::now();
        let mut summary = IngestSummary::default();

        if clear_first {
            let existing = self.index.list_paths("*").await?;
            for path in existing {
                self.index.delete_file(&path).await?;
            }
        }

        let lite_matcher = build_lite_matcher(&self.config.lite_globs);
        let encoder_params = EncoderParams {
            window: self.config.window_bytes,
            stride: self.config.stride_bytes,
            precision: self.config.signature_precision,
        };
        let chaos_params = ChaosParams {
            state_window: self.config.chaos_state_window,
            hazard_percentile: self.config.chaos_hazard_percentile,
            high_threshold: self.config.chaos_high_threshold,
        };

        let mut chaos_scores = Vec::new();

        let walker = WalkDir::new(&root).into_iter().filter_entry(|entry| {
            if entry.file_type().is_dir() {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !is_ignored_dir(name) || entry.depth() == 0)
                    .unwrap_or(true)
            } else {
                true
            }
        });

        let mut pending: Vec<PutFileEntry> = Vec::with_capacity(self.config.ingest_batch);

        for entry in walker {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let Ok(entry) = entry else {
                summary.errors += 1;
                continue;
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if has_binary_extension(path) {
                summary.skipped += 1;
                continue;
            }

            let Ok(metadata) = entry.metadata() else {
                summary.errors += 1;
                continue;
            };
            if metadata.len() > self.config.max_bytes_per_file {
                summary.skipped += 1;
                continue;
            }

            let Ok(body) = tokio::fs::read(path).await else {
                summary.errors += 1;
                continue;
            };

            let rel_path = root
                .as_ref()
                .parent()
                .and_then(|parent| path.strip_prefix(parent).ok())
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            let is_text = classify_text(&body);
            summary.total_bytes += body.len() as u64;

            if !is_text {
                summary.binary_files += 1;
                pending.push(PutFileEntry {
                    path: rel_path,
                    body,
                    is_text: false,
                    signature: None,
                    chaos: None,
                    imports: vec![],
                });
            } else {
                summary.text_files += 1;
                let lite = lite_matcher.is_match(&rel_path);

                let (signature, chaos_profile) = match encode(&body, encoder_params) {
                    Ok(encoded) => {
                        summary.signatures += 1;
                        let chaos = if lite { None } else { analyze(&encoded, chaos_params).profile };
                        if let Some(profile) = &chaos {
                            chaos_scores.push(profile.chaos_score);
                            if profile.risk_class == RiskClass::High {
                                summary.high_risk_count += 1;
                            }
                        }
                        (Some(encoded.aggregate), chaos)
                    }
                    Err(_) => (None, None),
                };

                let imports: Vec<String> = self.extractor.extract_imports(&body).into_iter().collect();

                pending.push(PutFileEntry {
                    path: rel_path,
                    body,
                    is_text: true,
                    signature,
                    chaos: chaos_profile,
                    imports,
                });
            }

            if pending.len() >= self.config.ingest_batch {
                let batch = std::mem::take(&mut pending);
                summary.errors += self.commit_batch(batch).await;
            }
        }

        if !pending.is_empty() {
            summary.errors += self.commit_batch(pending).await;
        }

        if let Err(e) = self.graph.rebuild_from_index(&self.index, self.extractor.as_ref()).await {
            tracing::warn!(error = %e, "failed to rebuild dependency graph after ingest");
        }

        summary.avg_chaos = if chaos_scores.is_empty() {
            0.0
        } else {
            chaos_scores.iter().sum::<f64>() / chaos_scores.len() as f64
        };
        summary.elapsed_ms = start.elapsed().as_millis() as u64;
        Ok(summary)
    }

    /// Commit a batch as one transaction; if the transaction itself fails,
    /// fall back to committing each file individually so one bad file never
    /// fails the rest of the batch (spec §7 "per-file isolation during
    /// ingest"). Returns the number of files that failed to commit.
    async fn commit_batch(&self, batch: Vec<PutFileEntry>) -> usize {
        let len = batch.len();
        match self.index.put_files_batch(batch.clone()).await {
            Ok(()) => 0,
            Err(e) => {
                tracing::warn!(error = %e, batch_size = len, "batch commit failed, retrying per file");
                let mut errors = 0;
                for entry in batch {
                    let path = entry.path.clone();
                    if let Err(e) = self
                        .index
                        .put_file(&entry.path, &entry.body, entry.is_text, entry.signature, entry.chaos, entry.imports)
                        .await
                    {
                        tracing::warn!(path = %path, error = %e, "failed to commit file");
                        errors += 1;
                    }
                }
                errors
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn coordinator() -> IngestionCoordinator {
        let index = Arc::new(StructuralIndex::new(Arc::new(MemoryStore::new()), 3));
        let graph = Arc::new(DependencyGraph::new(Config::default().is_core_threshold));
        IngestionCoordinator::new(index, Config::default(), graph)
    }

    #[tokio::test]
    async fn ingest_empty_directory_produces_zeroed_summary() {
        let dir = tempdir();
        let coordinator = coordinator();
        let summary = coordinator.ingest(&dir, false, CancelToken::new()).await.unwrap();
        assert_eq!(summary.text_files, 0);
        assert_eq!(summary.errors, 0);
    }

    #[tokio::test]
    async fn ingest_classifies_text_and_binary() {
        let dir = tempdir();
        std::fs::write(dir.join("a.txt"), vec![b'a'; 200]).unwrap();
        std::fs::write(dir.join("b.png"), vec![0u8; 200]).unwrap();
        let coordinator = coordinator();
        let summary = coordinator.ingest(&dir, false, CancelToken::new()).await.unwrap();
        assert_eq!(summary.text_files, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn clear_first_removes_prior_records() {
        let dir = tempdir();
        std::fs::write(dir.join("a.txt"), vec![b'a'; 200]).unwrap();
        let coordinator = coordinator();
        coordinator.ingest(&dir, false, CancelToken::new()).await.unwrap();
        std::fs::remove_file(dir.join("a.txt")).unwrap();
        std::fs::write(dir.join("b.txt"), vec![b'b'; 200]).unwrap();
        let summary = coordinator.ingest(&dir, true, CancelToken::new()).await.unwrap();
        assert_eq!(summary.text_files, 1);
        let paths = coordinator.index.list_paths("*").await.unwrap();
        assert!(paths.iter().any(|p| p.ends_with("b.txt")));
        assert!(!paths.iter().any(|p| p.ends_with("a.txt")));
    }

    #[tokio::test]
    async fn ingest_twice_without_clear_first_is_idempotent() {
        let dir = tempdir();
        std::fs::write(dir.join("a.txt"), vec![b'a'; 200]).unwrap();
        let coordinator = coordinator();
        let first = coordinator.ingest(&dir, false, CancelToken::new()).await.unwrap();
        let second = coordinator.ingest(&dir, false, CancelToken::new()).await.unwrap();
        assert_eq!(first.text_files, second.text_files);
        let paths = coordinator.index.list_paths("*").await.unwrap();
        assert_eq!(paths.iter().filter(|p| p.ends_with("a.txt")).count(), 1);
    }

    #[tokio::test]
    async fn ingest_extracts_and_stores_imports_per_file() {
        let dir = tempdir();
        std::fs::write(dir.join("a.rs"), b"use crate::b;\nfn main() {}").unwrap();
        let coordinator = coordinator();
        coordinator.ingest(&dir, false, CancelToken::new()).await.unwrap();
        let paths = coordinator.index.list_paths("*").await.unwrap();
        let a_path = paths.iter().find(|p| p.ends_with("a.rs")).unwrap();
        let imports = coordinator.index.get_imports(a_path).await.unwrap();
        assert!(imports.contains(&"crate::b".to_string()));
    }

    fn tempdir() -> std::path::PathBuf {
        static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut dir = std::env::temp_dir();
        dir.push(format!("sigweave-ingest-test-{}-{n}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
