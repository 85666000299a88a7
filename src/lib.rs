//! Crate root: public surface and component wiring for the structural
//! code-intelligence engine.
//!
//! This module is the single canonical entry point for downstream users.
//! It re-exports the submodules that implement the pipeline: files flow
//! through the byte manifold encoder (C1), the symbolic chaos analyzer
//! (C2), and into the structural index (C3); the ingestion coordinator
//! (C4) drives that pipeline from a filesystem walk and a debounced
//! watcher; the dependency analyzer (C5) and risk composer (C6) read back
//! out of the index; the query surface (C7) is a read-only facade over
//! all of it.
//!
//! ## Invariants
//!
//! - Signatures and chaos profiles never outlive their file record:
//!   `StructuralIndex::delete_file` removes all key families for a path in
//!   one transaction.
//! - `risk_class == HIGH` iff `chaos_score >= chaos_high_threshold`; see
//!   `model::RiskClass` and `chaos::ChaosParams`.
//! - The encoder and chaos analyzer are pure functions over
//!   `(bytes, params)`: identical inputs always yield identical output.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

/// Data model: signatures, chaos profiles, file/fact records.
pub mod model;
/// Byte manifold encoder (C1).
pub mod encoder;
/// Symbolic chaos analyzer (C2).
pub mod chaos;
/// Store adapter: `Store` trait plus HTTP and in-memory backends (C8).
pub mod store;
/// Structural index (C3).
pub mod index;
/// Ingestion coordinator (C4).
pub mod ingest;
/// Debounced filesystem watcher (C4 item 6).
pub mod watcher;
/// Dependency analyzer (C5).
pub mod deps;
/// Risk composer (C6).
pub mod risk;
/// Query surface (C7).
pub mod query;
/// Configuration (C9).
pub mod config;

pub use chaos::{ChaosAnalysis, ChaosParams};
pub use config::Config;
pub use deps::{BlastRadius, DependencyGraph, HeuristicExtractor, ImportExtractor};
pub use encoder::{EncodedFile, EncoderParams, WindowSignature};
pub use index::{IndexError, NeighborHit, PutFileEntry, StructuralIndex};
pub use ingest::{CancelToken, IngestError, IngestSummary, IngestionCoordinator};
pub use model::{ChaosProfile, CombinedRiskClass, FactRecord, FileRecord, RiskClass, Signature, SymbolicState};
pub use query::{Cluster, QueryError, QuerySurface, SearchHit, SearchResult, VerifyResult};
pub use risk::{combined_risk, risk_class, scan_critical, RiskScore, RiskWeights};
pub use store::{HttpKvStore, MemoryStore, Store, StoreError};
pub use watcher::{debounce, spawn_watcher, FileEvent, FileEventKind, WatcherError};

/// Top-level error composing every component's error family.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Encode(#[from] encoder::TooSmallError),
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Index(#[from] index::IndexError),
    #[error(transparent)]
    Ingest(#[from] ingest::IngestError),
    #[error(transparent)]
    Query(#[from] query::QueryError),
}
