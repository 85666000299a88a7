//! Data model: window/aggregate signatures, chaos profiles, file and fact
//! records (spec §3).
//!
//! All types here are plain, typed records — never untyped JSON maps —
//! serialized only at the `Store` boundary (spec §9: "re-architect as
//! tagged records with fixed fields; serialize for the store, never across
//! component boundaries").

use std::fmt;

use serde::{Deserialize, Serialize};

/// Decimal precision `P` used when quantizing signature components.
/// Matches the default in spec §3/§6.
pub const DEFAULT_PRECISION: u32 = 3;

/// A quantized `(coherence, stability, entropy)` triple, rounded to a fixed
/// number of decimals and rendered canonically as `c{C}_s{S}_e{E}`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub coherence: f64,
    pub stability: f64,
    pub entropy: f64,
}

/// A malformed signature string was passed at a query boundary (spec §7,
/// `InvalidSignatureSyntax`).
#[derive(Debug, thiserror::Error)]
#[error("invalid signature syntax: {0:?}")]
pub struct SignatureSyntaxError(pub String);

impl Signature {
    /// Round each component to `precision` decimals using banker's
    /// rounding (round-half-to-even), matching spec §4.1 step 2.
    #[must_use]
    pub fn quantize(self, precision: u32) -> Self {
        Self {
            coherence: round_half_even(self.coherence, precision),
            stability: round_half_even(self.stability, precision),
            entropy: round_half_even(self.entropy, precision),
        }
    }

    /// Render the canonical `c{C}_s{S}_e{E}` form at `precision` fractional
    /// digits, e.g. `c0.512_s1.000_e0.734`.
    #[must_use]
    pub fn canonical(&self, precision: u32) -> String {
        format!(
            "c{}_s{}_e{}",
            fmt_fixed(self.coherence, precision),
            fmt_fixed(self.stability, precision),
            fmt_fixed(self.entropy, precision)
        )
    }

    /// Parse a canonical signature string back into its components.
    pub fn parse(s: &str) -> Result<Self, SignatureSyntaxError> {
        let rest = s
            .strip_prefix('c')
            .ok_or_else(|| SignatureSyntaxError(s.to_string()))?;
        let (c_part, rest) = rest
            .split_once("_s")
            .ok_or_else(|| SignatureSyntaxError(s.to_string()))?;
        let (s_part, e_part) = rest
            .split_once("_e")
            .ok_or_else(|| SignatureSyntaxError(s.to_string()))?;
        let coherence = c_part
            .parse::<f64>()
            .map_err(|_| SignatureSyntaxError(s.to_string()))?;
        let stability = s_part
            .parse::<f64>()
            .map_err(|_| SignatureSyntaxError(s.to_string()))?;
        let entropy = e_part
            .parse::<f64>()
            .map_err(|_| SignatureSyntaxError(s.to_string()))?;
        if !(0.0..=1.0).contains(&coherence)
            || !(0.0..=1.0).contains(&stability)
            || !(0.0..=1.0).contains(&entropy)
        {
            return Err(SignatureSyntaxError(s.to_string()));
        }
        Ok(Self { coherence, stability, entropy })
    }

    /// Euclidean distance in `(C, S, E)` space, used by `neighbors` (spec
    /// §4.3) and `cluster` (spec §4.7).
    #[must_use]
    pub fn distance(&self, other: &Signature) -> f64 {
        let dc = self.coherence - other.coherence;
        let ds = self.stability - other.stability;
        let de = self.entropy - other.entropy;
        (dc * dc + ds * ds + de * de).sqrt()
    }

    /// True iff every component-wise delta is `<= tolerance` (spec §4.3
    /// `neighbors`).
    #[must_use]
    pub fn within_tolerance(&self, other: &Signature, tolerance: f64) -> bool {
        (self.coherence - other.coherence).abs() <= tolerance
            && (self.stability - other.stability).abs() <= tolerance
            && (self.entropy - other.entropy).abs() <= tolerance
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical(DEFAULT_PRECISION))
    }
}

fn round_half_even(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    let scaled = value * factor;
    let floor = scaled.floor();
    let diff = scaled - floor;
    let rounded = if (diff - 0.5).abs() < f64::EPSILON {
        if (floor as i64) % 2 == 0 { floor } else { floor + 1.0 }
    } else {
        scaled.round()
    };
    rounded / factor
}

fn fmt_fixed(value: f64, precision: u32) -> String {
    format!("{:.*}", precision as usize, value.clamp(0.0, 1.0))
}

/// One of the three symbolic states the chaos analyzer's state machine can
/// occupy (spec §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolicState {
    LowFluctuation,
    Oscillation,
    PersistentHigh,
}

/// Per-state window counts (spec §3 `chaos_profile.symbolic_states`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolicStateCounts {
    pub low: usize,
    pub oscillation: usize,
    pub high: usize,
}

impl SymbolicStateCounts {
    pub fn record(&mut self, state: SymbolicState) {
        match state {
            SymbolicState::LowFluctuation => self.low += 1,
            SymbolicState::Oscillation => self.oscillation += 1,
            SymbolicState::PersistentHigh => self.high += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.low + self.oscillation + self.high
    }
}

/// `HIGH` iff `chaos_score >= tau_high` (spec §3 invariant 4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskClass {
    Low,
    High,
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskClass::Low => write!(f, "LOW"),
            RiskClass::High => write!(f, "HIGH"),
        }
    }
}

/// Combined-risk band (spec §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombinedRiskClass {
    Critical,
    High,
    Moderate,
    Low,
}

impl fmt::Display for CombinedRiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombinedRiskClass::Critical => write!(f, "CRITICAL"),
            CombinedRiskClass::High => write!(f, "HIGH"),
            CombinedRiskClass::Moderate => write!(f, "MODERATE"),
            CombinedRiskClass::Low => write!(f, "LOW"),
        }
    }
}

/// Per-file chaos profile (spec §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChaosProfile {
    pub chaos_score: f64,
    pub entropy: f64,
    pub coherence: f64,
    pub risk_class: RiskClass,
    pub hazard_threshold: f64,
    pub windows_analyzed: usize,
    pub symbolic_states: SymbolicStateCounts,
}

/// A logical file entity keyed by repository-relative path (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub size_bytes: u64,
    pub modified_at: chrono::DateTime<chrono::Utc>,
    pub is_text: bool,
    pub signature: Option<Signature>,
    pub chaos_profile: Option<ChaosProfile>,
    pub imports: Vec<String>,
}

/// A free-text note surfaced at path `__fact__/<fact_id>` (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FactRecord {
    pub fact_id: String,
    pub text: String,
}

impl FactRecord {
    #[must_use]
    pub fn synthetic_path(&self) -> String {
        format!("__fact__/{}", self.fact_id)
    }
}
