//! Structural index (C3, spec §4.3): the facade over `Store` that the rest
//! of the system talks to. Owns the key-family layout (`file:`, `sig:`,
//! `chaos:`, `sigidx:`, `files`, `fact:`) and the atomicity guarantees of
//! `put_file`/`delete_file`.

use std::sync::Arc;

use globset::GlobBuilder;
use serde::{Deserialize, Serialize};

use crate::model::{ChaosProfile, FactRecord, Signature};
use crate::store::{Store, StoreError, WriteOp};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid glob: {0}")]
    InvalidGlob(String),
}

/// Wire shape for `file:<path>` (spec §3 "File record", minus the raw body
/// which is stored as a separate zstd-compressed blob alongside it).
#[derive(Clone, Debug, Serialize, Deserialize)]
struct FileMeta {
    size_bytes: u64,
    modified_at: chrono::DateTime<chrono::Utc>,
    is_text: bool,
    imports: Vec<String>,
}

/// One file's worth of arguments to [`StructuralIndex::put_files_batch`].
#[derive(Clone, Debug)]
pub struct PutFileEntry {
    pub path: String,
    pub body: Vec<u8>,
    pub is_text: bool,
    pub signature: Option<Signature>,
    pub chaos: Option<ChaosProfile>,
    pub imports: Vec<String>,
}

/// A hit from `neighbors` (spec §4.3): path, its signature, and distance
/// to the query signature.
#[derive(Clone, Debug, PartialEq)]
pub struct NeighborHit {
    pub path: String,
    pub signature: Signature,
    pub delta: f64,
}

/// Signature-keyed, file-keyed structural index over a [`Store`] backend.
pub struct StructuralIndex {
    store: Arc<dyn Store>,
    precision: u32,
}

impl StructuralIndex {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, precision: u32) -> Self {
        Self { store, precision }
    }

    fn body_key(path: &str) -> String {
        format!("file:{path}")
    }
    fn meta_key(path: &str) -> String {
        format!("filemeta:{path}")
    }
    fn sig_key(path: &str) -> String {
        format!("sig:{path}")
    }
    fn chaos_key(path: &str) -> String {
        format!("chaos:{path}")
    }
    fn sigidx_key(sig: &str) -> String {
        format!("sigidx:{sig}")
    }

    /// Insert or replace a file record as one pipelined transaction (spec
    /// §4.3 `put_file`). If the new signature differs from the file's
    /// prior signature, the old `sigidx` entry is removed as part of the
    /// same batch so readers never observe a stale signature-index
    /// mapping (spec invariant 1).
    #[tracing::instrument(skip(self, body), fields(path = %path, bytes = body.len()))]
    pub async fn put_file(
        &self,
        path: &str,
        body: &[u8],
        is_text: bool,
        signature: Option<Signature>,
        chaos: Option<ChaosProfile>,
        imports: Vec<String>,
    ) -> Result<(), IndexError> {
        let prior_sig = self.get_signature(path).await.ok();
        let ops = self.build_put_ops(path, body, is_text, signature, chaos, imports, prior_sig)?;
        crate::store::with_retry(|| self.store.apply_batch(ops.clone())).await?;
        Ok(())
    }

    /// Insert or replace up to `ingest_batch` files as a single pipelined
    /// transaction (spec §4.4 item 3, "Group writes into pipeline
    /// transactions of up to 64 files"). Semantically equivalent to calling
    /// `put_file` once per entry, but issues one `apply_batch` for the
    /// whole group instead of one per file.
    pub async fn put_files_batch(&self, entries: Vec<PutFileEntry>) -> Result<(), IndexError> {
        let mut ops = Vec::new();
        for entry in entries {
            let prior_sig = self.get_signature(&entry.path).await.ok();
            ops.extend(self.build_put_ops(
                &entry.path,
                &entry.body,
                entry.is_text,
                entry.signature,
                entry.chaos,
                entry.imports,
                prior_sig,
            )?);
        }
        if ops.is_empty() {
            return Ok(());
        }
        crate::store::with_retry(|| self.store.apply_batch(ops.clone())).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_put_ops(
        &self,
        path: &str,
        body: &[u8],
        is_text: bool,
        signature: Option<Signature>,
        chaos: Option<ChaosProfile>,
        imports: Vec<String>,
        prior_sig: Option<String>,
    ) -> Result<Vec<WriteOp>, IndexError> {
        let compressed = zstd::encode_all(body, 0).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let meta = FileMeta {
            size_bytes: body.len() as u64,
            modified_at: chrono::Utc::now(),
            is_text,
            imports,
        };

        let mut ops = vec![
            WriteOp::Set {
                key: Self::body_key(path),
                value: base64_encode(&compressed),
            },
            WriteOp::Set {
                key: Self::meta_key(path),
                value: serde_json::to_string(&meta)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?,
            },
            WriteOp::SetAdd { key: "files".to_string(), member: path.to_string() },
        ];

        if let Some(sig) = signature {
            let canonical = sig.canonical(self.precision);
            if prior_sig.as_ref() != Some(&canonical) {
                if let Some(old) = &prior_sig {
                    ops.push(WriteOp::SetRemove {
                        key: Self::sigidx_key(old),
                        member: path.to_string(),
                    });
                }
                ops.push(WriteOp::SetAdd {
                    key: Self::sigidx_key(&canonical),
                    member: path.to_string(),
                });
            }
            ops.push(WriteOp::Set { key: Self::sig_key(path), value: canonical });
        } else {
            ops.push(WriteOp::Delete { key: Self::sig_key(path) });
        }

        if let Some(profile) = chaos {
            ops.push(WriteOp::Set {
                key: Self::chaos_key(path),
                value: serde_json::to_string(&profile)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?,
            });
        } else {
            ops.push(WriteOp::Delete { key: Self::chaos_key(path) });
        }

        Ok(ops)
    }

    /// Remove a file record and every key family it participates in (spec
    /// §4.3 `delete_file`, invariant 3).
    #[tracing::instrument(skip(self), fields(path = %path))]
    pub async fn delete_file(&self, path: &str) -> Result<(), IndexError> {
        let mut ops = vec![
            WriteOp::Delete { key: Self::body_key(path) },
            WriteOp::Delete { key: Self::meta_key(path) },
            WriteOp::Delete { key: Self::sig_key(path) },
            WriteOp::Delete { key: Self::chaos_key(path) },
            WriteOp::SetRemove { key: "files".to_string(), member: path.to_string() },
        ];
        if let Ok(sig) = self.get_signature(path).await {
            ops.push(WriteOp::SetRemove { key: Self::sigidx_key(&sig), member: path.to_string() });
        }
        crate::store::with_retry(|| self.store.apply_batch(ops.clone())).await?;
        Ok(())
    }

    pub async fn get_file(&self, path: &str) -> Result<Vec<u8>, IndexError> {
        if let Some(fact_id) = path.strip_prefix("__fact__/") {
            return Ok(self.get_fact(fact_id).await?.text.into_bytes());
        }
        let encoded = self
            .store
            .get(&Self::body_key(path))
            .await?
            .ok_or_else(|| IndexError::NotFound(path.to_string()))?;
        let compressed = base64_decode(&encoded).map_err(StoreError::Unavailable)?;
        zstd::decode_all(compressed.as_slice()).map_err(|e| IndexError::Store(StoreError::Unavailable(e.to_string())))
    }

    /// Outbound imports recorded for `path` at its last `put_file`/
    /// `put_files_batch` (spec §4.5 data flow: "C5 reads file bodies via
    /// C3"; here it reads the import set C4 already extracted and stored).
    pub async fn get_imports(&self, path: &str) -> Result<Vec<String>, IndexError> {
        let raw = self
            .store
            .get(&Self::meta_key(path))
            .await?
            .ok_or_else(|| IndexError::NotFound(path.to_string()))?;
        let meta: FileMeta =
            serde_json::from_str(&raw).map_err(|e| IndexError::Store(StoreError::Unavailable(e.to_string())))?;
        Ok(meta.imports)
    }

    pub async fn get_signature(&self, path: &str) -> Result<String, IndexError> {
        self.store
            .get(&Self::sig_key(path))
            .await?
            .ok_or_else(|| IndexError::NotFound(path.to_string()))
    }

    pub async fn get_chaos_profile(&self, path: &str) -> Result<ChaosProfile, IndexError> {
        let raw = self
            .store
            .get(&Self::chaos_key(path))
            .await?
            .ok_or_else(|| IndexError::NotFound(path.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| IndexError::Store(StoreError::Unavailable(e.to_string())))
    }

    /// `list_paths(glob)` (spec §4.3): `*` (any run of non-`/`), `**` (any
    /// run including `/`), `?`, and character classes over the full path
    /// set. `literal_separator` keeps `*`/`?` from crossing `/` boundaries
    /// so only `**` spans directories, matching the spec's literal wording.
    pub async fn list_paths(&self, glob: &str) -> Result<Vec<String>, IndexError> {
        let matcher = GlobBuilder::new(glob)
            .literal_separator(true)
            .build()
            .map_err(|e| IndexError::InvalidGlob(e.to_string()))?
            .compile_matcher();
        let all = self.store.set_members("files").await?;
        let mut matched: Vec<String> = all.into_iter().filter(|p| matcher.is_match(p)).collect();
        matched.sort();
        Ok(matched)
    }

    /// `neighbors(signature, tolerance, scope_glob, limit)` (spec §4.3):
    /// bounded component-wise tolerance, ranked by Euclidean distance
    /// ascending, ties broken by path.
    pub async fn neighbors(
        &self,
        target: Signature,
        tolerance: f64,
        scope_glob: &str,
        limit: usize,
    ) -> Result<Vec<NeighborHit>, IndexError> {
        let scoped = self.list_paths(scope_glob).await?;
        let mut hits = Vec::new();
        for path in scoped {
            let Ok(sig_str) = self.get_signature(&path).await else { continue };
            let Ok(sig) = Signature::parse(&sig_str) else { continue };
            if sig.within_tolerance(&target, tolerance) {
                hits.push(NeighborHit { path, delta: target.distance(&sig), signature: sig });
            }
        }
        hits.sort_by(|a, b| {
            a.delta
                .partial_cmp(&b.delta)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// `rank_by_chaos(scope_glob, limit, descending)` (spec §4.3).
    pub async fn rank_by_chaos(
        &self,
        scope_glob: &str,
        limit: usize,
        descending: bool,
    ) -> Result<Vec<(String, ChaosProfile)>, IndexError> {
        let scoped = self.list_paths(scope_glob).await?;
        let mut ranked = Vec::new();
        for path in scoped {
            if let Ok(profile) = self.get_chaos_profile(&path).await {
                ranked.push((path, profile));
            }
        }
        ranked.sort_by(|a, b| {
            let ord = a
                .1
                .chaos_score
                .partial_cmp(&b.1.chaos_score)
                .unwrap_or(std::cmp::Ordering::Equal);
            let ord = if descending { ord.reverse() } else { ord };
            ord.then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Store a free-text note and surface it in path searches as a
    /// synthetic file at `__fact__/<fact_id>` (spec §3 "Fact record").
    pub async fn put_fact(&self, fact_id: &str, text: &str) -> Result<(), IndexError> {
        let record = FactRecord { fact_id: fact_id.to_string(), text: text.to_string() };
        let ops = vec![
            WriteOp::Set { key: format!("fact:{fact_id}"), value: text.to_string() },
            WriteOp::SetAdd { key: "files".to_string(), member: record.synthetic_path() },
        ];
        crate::store::with_retry(|| self.store.apply_batch(ops.clone())).await?;
        Ok(())
    }

    /// Fetch a fact record by id (not its synthetic path).
    pub async fn get_fact(&self, fact_id: &str) -> Result<FactRecord, IndexError> {
        let text = self
            .store
            .get(&format!("fact:{fact_id}"))
            .await?
            .ok_or_else(|| IndexError::NotFound(fact_id.to_string()))?;
        Ok(FactRecord { fact_id: fact_id.to_string(), text })
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, String> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn index() -> StructuralIndex {
        StructuralIndex::new(Arc::new(MemoryStore::new()), 3)
    }

    #[tokio::test]
    async fn put_then_get_roundtrips_body() {
        let idx = index();
        idx.put_file("a.txt", b"hello world", true, None, None, vec![]).await.unwrap();
        assert_eq!(idx.get_file("a.txt").await.unwrap(), b"hello world".to_vec());
    }

    #[tokio::test]
    async fn signature_index_stays_consistent_across_put() {
        let idx = index();
        let sig1 = Signature { coherence: 0.5, stability: 0.5, entropy: 0.5 };
        let sig2 = Signature { coherence: 0.9, stability: 0.9, entropy: 0.9 };
        idx.put_file("a.txt", b"x", true, Some(sig1), None, vec![]).await.unwrap();
        idx.put_file("a.txt", b"y", true, Some(sig2), None, vec![]).await.unwrap();
        let s1 = idx.store.set_members(&StructuralIndex::sigidx_key(&sig1.canonical(3))).await.unwrap();
        let s2 = idx.store.set_members(&StructuralIndex::sigidx_key(&sig2.canonical(3))).await.unwrap();
        assert!(!s1.contains(&"a.txt".to_string()));
        assert!(s2.contains(&"a.txt".to_string()));
    }

    #[tokio::test]
    async fn delete_file_removes_all_key_families() {
        let idx = index();
        let sig = Signature { coherence: 0.5, stability: 0.5, entropy: 0.5 };
        idx.put_file("a.txt", b"x", true, Some(sig), None, vec![]).await.unwrap();
        idx.delete_file("a.txt").await.unwrap();
        assert!(idx.get_file("a.txt").await.is_err());
        assert!(idx.get_signature("a.txt").await.is_err());
        let paths = idx.list_paths("*").await.unwrap();
        assert!(!paths.contains(&"a.txt".to_string()));
    }

    #[tokio::test]
    async fn neighbors_is_symmetric() {
        let idx = index();
        let sig_a = Signature { coherence: 0.50, stability: 0.50, entropy: 0.50 };
        let sig_b = Signature { coherence: 0.51, stability: 0.50, entropy: 0.50 };
        idx.put_file("a.txt", b"a", true, Some(sig_a), None, vec![]).await.unwrap();
        idx.put_file("b.txt", b"b", true, Some(sig_b), None, vec![]).await.unwrap();
        let from_a = idx.neighbors(sig_a, 0.05, "*", 10).await.unwrap();
        let from_b = idx.neighbors(sig_b, 0.05, "*", 10).await.unwrap();
        assert!(from_a.iter().any(|h| h.path == "b.txt"));
        assert!(from_b.iter().any(|h| h.path == "a.txt"));
    }

    #[tokio::test]
    async fn put_files_batch_commits_every_entry() {
        let idx = index();
        let sig = Signature { coherence: 0.5, stability: 0.5, entropy: 0.5 };
        idx.put_files_batch(vec![
            PutFileEntry {
                path: "a.txt".to_string(),
                body: b"a".to_vec(),
                is_text: true,
                signature: Some(sig),
                chaos: None,
                imports: vec![],
            },
            PutFileEntry {
                path: "b.txt".to_string(),
                body: b"b".to_vec(),
                is_text: true,
                signature: None,
                chaos: None,
                imports: vec![],
            },
        ])
        .await
        .unwrap();
        assert_eq!(idx.get_file("a.txt").await.unwrap(), b"a".to_vec());
        assert_eq!(idx.get_file("b.txt").await.unwrap(), b"b".to_vec());
        let paths = idx.list_paths("*").await.unwrap();
        assert_eq!(paths, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[tokio::test]
    async fn list_paths_glob_matches_extension() {
        let idx = index();
        idx.put_file("src/a.rs", b"1", true, None, None, vec![]).await.unwrap();
        idx.put_file("src/b.txt", b"2", true, None, None, vec![]).await.unwrap();
        let rs_only = idx.list_paths("**/*.rs").await.unwrap();
        assert_eq!(rs_only, vec!["src/a.rs".to_string()]);
    }

    #[tokio::test]
    async fn list_paths_single_star_does_not_cross_directory_boundary() {
        let idx = index();
        idx.put_file("a.rs", b"1", true, None, None, vec![]).await.unwrap();
        idx.put_file("src/b.rs", b"2", true, None, None, vec![]).await.unwrap();
        let top_level_only = idx.list_paths("*.rs").await.unwrap();
        assert_eq!(top_level_only, vec!["a.rs".to_string()]);
    }

    fn profile_with_score(score: f64) -> ChaosProfile {
        ChaosProfile {
            chaos_score: score,
            entropy: 0.5,
            coherence: 0.5,
            risk_class: crate::model::RiskClass::Low,
            hazard_threshold: 0.1,
            windows_analyzed: 1,
            symbolic_states: crate::model::SymbolicStateCounts::default(),
        }
    }

    #[tokio::test]
    async fn rank_by_chaos_orders_by_score_and_respects_direction() {
        let idx = index();
        idx.put_file("quiet.rs", b"a", true, None, Some(profile_with_score(0.1)), vec![]).await.unwrap();
        idx.put_file("loud.rs", b"b", true, None, Some(profile_with_score(0.9)), vec![]).await.unwrap();
        idx.put_file("mid.rs", b"c", true, None, Some(profile_with_score(0.5)), vec![]).await.unwrap();

        let descending = idx.rank_by_chaos("*", 10, true).await.unwrap();
        let paths: Vec<&str> = descending.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["loud.rs", "mid.rs", "quiet.rs"]);

        let ascending = idx.rank_by_chaos("*", 10, false).await.unwrap();
        let paths: Vec<&str> = ascending.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["quiet.rs", "mid.rs", "loud.rs"]);

        let top_one = idx.rank_by_chaos("*", 1, true).await.unwrap();
        assert_eq!(top_one.len(), 1);
        assert_eq!(top_one[0].0, "loud.rs");
    }

    #[tokio::test]
    async fn put_fact_is_retrievable_and_surfaced_as_synthetic_path() {
        let idx = index();
        idx.put_fact("note-1", "remember this").await.unwrap();
        let fact = idx.get_fact("note-1").await.unwrap();
        assert_eq!(fact.text, "remember this");
        assert_eq!(fact.synthetic_path(), "__fact__/note-1");

        let paths = idx.list_paths("*").await.unwrap();
        assert!(paths.contains(&"__fact__/note-1".to_string()));
        assert_eq!(idx.get_file("__fact__/note-1").await.unwrap(), b"remember this".to_vec());
    }
}
