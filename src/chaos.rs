//! Symbolic chaos analyzer (C2, spec §4.2).
//!
//! Consumes the per-window variances produced by the encoder and derives a
//! log-variance signal, a hazard threshold, a delta-sigma modulated bit
//! stream, and a 3-state symbolic machine whose `PERSISTENT_HIGH`
//! occupancy is the file's chaos score.

use crate::encoder::EncodedFile;
use crate::model::{ChaosProfile, RiskClass, SymbolicState, SymbolicStateCounts};

const EPSILON: f64 = 1e-9;

/// `chaos_state_window`, `chaos_hazard_percentile`, `chaos_high_threshold`
/// (spec §6).
#[derive(Clone, Copy, Debug)]
pub struct ChaosParams {
    pub state_window: usize,
    pub hazard_percentile: f64,
    pub high_threshold: f64,
}

impl Default for ChaosParams {
    fn default() -> Self {
        Self { state_window: 5, hazard_percentile: 0.75, high_threshold: 0.35 }
    }
}

/// Analyze an already-encoded file, producing the chaos profile plus the
/// per-window symbolic state sequence (exposed for `verify_snippet`, spec
/// §4.7, which needs each window's gating decision).
pub fn analyze(encoded: &EncodedFile, params: ChaosParams) -> ChaosAnalysis {
    let n = encoded.windows.len();
    if n == 0 {
        return ChaosAnalysis {
            profile: None,
            per_window_states: Vec::new(),
            hazard_threshold: 0.0,
        };
    }

    let log_variance: Vec<f64> = encoded
        .windows
        .iter()
        .map(|w| w.variance.max(EPSILON).log10())
        .collect();

    let abs_signal: Vec<f64> = log_variance_signal(&log_variance);
    let hazard_threshold = quantile(&abs_signal, params.hazard_percentile);

    let mut integrator = 0.0f64;
    let mut bits = Vec::with_capacity(n);
    for &v in &log_variance {
        integrator += v - hazard_threshold;
        let bit = integrator >= 0.0;
        bits.push(bit);
        let signed = if bit { 1.0 } else { -1.0 };
        integrator -= signed * hazard_threshold;
    }

    let mut counts = SymbolicStateCounts::default();
    let mut per_window_states = Vec::with_capacity(n);
    let mut window: Vec<bool> = Vec::with_capacity(params.state_window);
    let mut state = SymbolicState::LowFluctuation;

    for &bit in &bits {
        window.push(bit);
        if window.len() > params.state_window {
            window.remove(0);
        }
        let ones = window.iter().filter(|&&b| b).count();
        let transitions = window.windows(2).filter(|pair| pair[0] != pair[1]).count();
        let k = params.state_window;
        state = if ones >= k.saturating_sub(1) && transitions <= 1 {
            SymbolicState::PersistentHigh
        } else if ones <= 1 && transitions <= 1 {
            SymbolicState::LowFluctuation
        } else {
            SymbolicState::Oscillation
        };
        counts.record(state);
        per_window_states.push(state);
    }

    let chaos_score = counts.high as f64 / n as f64;
    let risk_class = if chaos_score >= params.high_threshold { RiskClass::High } else { RiskClass::Low };

    let profile = ChaosProfile {
        chaos_score,
        entropy: encoded.aggregate.entropy,
        coherence: encoded.aggregate.coherence,
        risk_class,
        hazard_threshold,
        windows_analyzed: n,
        symbolic_states: counts,
    };

    ChaosAnalysis { profile: Some(profile), per_window_states, hazard_threshold }
}

/// Result of running the analyzer over one encoded file.
#[derive(Clone, Debug)]
pub struct ChaosAnalysis {
    pub profile: Option<ChaosProfile>,
    pub per_window_states: Vec<SymbolicState>,
    pub hazard_threshold: f64,
}

#[cfg(not(feature = "chaos-quantile-median"))]
fn log_variance_signal(log_variance: &[f64]) -> Vec<f64> {
    log_variance.iter().map(|v| v.abs()).collect()
}

/// Open Question resolution (spec §9): quantile of `|v - median(v)|`
/// instead of `|v|`, selected via the `chaos-quantile-median` feature.
#[cfg(feature = "chaos-quantile-median")]
fn log_variance_signal(log_variance: &[f64]) -> Vec<f64> {
    let med = median(log_variance);
    log_variance.iter().map(|v| (v - med).abs()).collect()
}

#[cfg(feature = "chaos-quantile-median")]
fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Linear-interpolation quantile over `|v|` (spec §4.2 step 2).
fn quantile(values: &[f64], p: f64) -> f64 {
    if values.iter().all(|&v| (v - values[0]).abs() < f64::EPSILON) {
        return values[0];
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = p * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{encode, EncoderParams};

    #[test]
    fn single_window_chaos_score_is_zero_or_one() {
        let params = EncoderParams::default();
        let encoded = encode(&[5u8; 64], params).unwrap();
        let analysis = analyze(&encoded, ChaosParams::default());
        let profile = analysis.profile.unwrap();
        assert!(profile.chaos_score == 0.0 || profile.chaos_score == 1.0);
    }

    #[test]
    fn all_zero_file_has_zero_chaos_score() {
        let params = EncoderParams::default();
        let encoded = encode(&vec![0u8; 4096], params).unwrap();
        let analysis = analyze(&encoded, ChaosParams::default());
        let profile = analysis.profile.unwrap();
        assert_eq!(profile.chaos_score, 0.0);
        assert_eq!(profile.risk_class, RiskClass::Low);
    }

    #[test]
    fn risk_class_boundary_is_high_at_threshold() {
        // chaos_score == tau_high is HIGH, per spec §4.2 tie-break.
        let params = ChaosParams::default();
        assert!(0.35 >= params.high_threshold);
    }

    #[test]
    fn concatenated_copies_have_similar_chaos_score() {
        let mut prng = 0x1234_5678u64;
        let mut next = || {
            prng ^= prng << 13;
            prng ^= prng >> 7;
            prng ^= prng << 17;
            (prng % 256) as u8
        };
        let body: Vec<u8> = (0..4096).map(|_| next()).collect();
        let params = EncoderParams::default();
        let single = analyze(&encode(&body, params).unwrap(), ChaosParams::default());
        let mut doubled = body.clone();
        doubled.extend_from_slice(&body);
        let double = analyze(&encode(&doubled, params).unwrap(), ChaosParams::default());
        let a = single.profile.unwrap().chaos_score;
        let b = double.profile.unwrap().chaos_score;
        assert!((a - b).abs() < 0.15, "chaos score drifted too far: {a} vs {b}");
    }

    #[test]
    fn quantile_handles_constant_signal() {
        let v = vec![0.5, 0.5, 0.5];
        assert_eq!(quantile(&v, 0.75), 0.5);
    }

    #[test]
    fn uniform_random_bytes_maximize_entropy_and_chaos() {
        let mut prng = 0x9e37_79b9u64;
        let mut next = || {
            prng ^= prng << 13;
            prng ^= prng >> 7;
            prng ^= prng << 17;
            (prng % 256) as u8
        };
        let body: Vec<u8> = (0..16384).map(|_| next()).collect();
        let params = EncoderParams::default();
        let encoded = encode(&body, params).unwrap();
        assert!(encoded.aggregate.entropy > 0.95, "entropy = {}", encoded.aggregate.entropy);
        assert!(encoded.aggregate.coherence < 0.05, "coherence = {}", encoded.aggregate.coherence);
        let analysis = analyze(&encoded, ChaosParams::default());
        let profile = analysis.profile.unwrap();
        assert_eq!(profile.chaos_score, 1.0);
    }
}
