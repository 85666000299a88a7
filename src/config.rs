//! Configuration (C9, spec §6): every recognized option as a field on a
//! plain struct, with a `Default` impl and an env-backed constructor.
//!
//! Plain `std::env::var` reads, no config-file parser (that stays an
//! explicit external collaborator per spec §1).

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub window_bytes: usize,
    pub stride_bytes: usize,
    pub signature_precision: u32,

    pub chaos_state_window: usize,
    pub chaos_hazard_percentile: f64,
    pub chaos_high_threshold: f64,

    pub max_bytes_per_file: u64,
    pub lite_globs: Vec<String>,

    pub ingest_batch: usize,
    pub worker_cap: usize,
    pub watcher_debounce_ms: u64,
    pub store_timeout_ms: u64,

    pub neighbor_default_tolerance: f64,
    pub combined_risk_weights: (f64, f64, f64),
    pub risk_bands: (f64, f64, f64),
    pub is_core_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_bytes: 64,
            stride_bytes: 48,
            signature_precision: 3,

            chaos_state_window: 5,
            chaos_hazard_percentile: 0.75,
            chaos_high_threshold: 0.35,

            max_bytes_per_file: 512_000,
            lite_globs: vec!["**/tests/**".to_string(), "**/docs/**".to_string(), "**/*.md".to_string()],

            ingest_batch: 64,
            worker_cap: 8,
            watcher_debounce_ms: 250,
            store_timeout_ms: 5000,

            neighbor_default_tolerance: 0.05,
            combined_risk_weights: (0.4, 0.3, 0.3),
            risk_bands: (0.40, 0.30, 0.20),
            is_core_threshold: 10,
        }
    }
}

impl Config {
    /// Read `TINYSIG_*`-prefixed env vars, falling back to `Config::default()`
    /// for anything unset or unparsable (spec §6 "Configuration"). Not a
    /// config-file format — that remains an external collaborator.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            window_bytes: env_usize("TINYSIG_WINDOW_BYTES", defaults.window_bytes),
            stride_bytes: env_usize("TINYSIG_STRIDE_BYTES", defaults.stride_bytes),
            signature_precision: env_u32("TINYSIG_SIGNATURE_PRECISION", defaults.signature_precision),

            chaos_state_window: env_usize("TINYSIG_CHAOS_STATE_WINDOW", defaults.chaos_state_window),
            chaos_hazard_percentile: env_f64(
                "TINYSIG_CHAOS_HAZARD_PERCENTILE",
                defaults.chaos_hazard_percentile,
            ),
            chaos_high_threshold: env_f64("TINYSIG_CHAOS_HIGH_THRESHOLD", defaults.chaos_high_threshold),

            max_bytes_per_file: env_u64("TINYSIG_MAX_BYTES_PER_FILE", defaults.max_bytes_per_file),
            lite_globs: defaults.lite_globs.clone(),

            ingest_batch: env_usize("TINYSIG_INGEST_BATCH", defaults.ingest_batch),
            worker_cap: env_usize("TINYSIG_WORKER_CAP", defaults.worker_cap),
            watcher_debounce_ms: env_u64("TINYSIG_WATCHER_DEBOUNCE_MS", defaults.watcher_debounce_ms),
            store_timeout_ms: env_u64("TINYSIG_STORE_TIMEOUT_MS", defaults.store_timeout_ms),

            neighbor_default_tolerance: env_f64(
                "TINYSIG_NEIGHBOR_DEFAULT_TOLERANCE",
                defaults.neighbor_default_tolerance,
            ),
            combined_risk_weights: defaults.combined_risk_weights,
            risk_bands: defaults.risk_bands,
            is_core_threshold: env_usize("TINYSIG_IS_CORE_THRESHOLD", defaults.is_core_threshold),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
