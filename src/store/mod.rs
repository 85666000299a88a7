//! Store adapter (C8, spec §6): the persistence boundary every other
//! component talks through.
//!
//! The index, ingestion coordinator, and dependency analyzer never touch a
//! concrete backend directly — they hold a `dyn Store` and go through the
//! small operation set below; the Upstash wire format itself stays
//! contained to `store::http`.

mod http;
mod memory;

pub use http::HttpKvStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

/// Everything that can go wrong talking to a backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store write conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store operation timed out: {0}")]
    Timeout(String),
}

/// One write in a transactional batch (spec §4.4 "transactional per-file
/// batch writes").
#[derive(Clone, Debug)]
pub enum WriteOp {
    Set { key: String, value: String },
    Delete { key: String },
    SetAdd { key: String, member: String },
    SetRemove { key: String, member: String },
}

/// The operation set every backend must provide. Async because the only
/// real backend (`HttpKvStore`) is a REST call; `MemoryStore` is
/// synchronous underneath but implements the same trait for test parity.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Apply a batch of writes as one logical transaction (spec §4.4):
    /// either all ops are visible afterward or none are attributable to a
    /// partial write. The HTTP backend does this with Upstash's pipeline
    /// endpoint; `MemoryStore` just applies them under one lock.
    async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;
}

/// Retry wrapper: 3 attempts, 100/500/2500 ms backoff (spec §6
/// `store_retry_attempts`, `store_retry_backoff_ms`). `NotFound` is
/// definitive and returned immediately; `Unavailable`/`Conflict`/`Timeout`
/// are retried (spec §7 "StoreConflict -- optimistic-write retry (up to 3)
/// before failing that file").
pub async fn with_retry<F, Fut, T>(mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    const BACKOFF_MS: [u64; 3] = [100, 500, 2500];
    let mut last_err = None;
    for delay in BACKOFF_MS {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e @ StoreError::NotFound(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, delay_ms = delay, "store operation failed, retrying");
                last_err = Some(e);
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| StoreError::Unavailable("retries exhausted".to_string())))
}
