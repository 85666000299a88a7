//! Byte manifold encoder (C1, spec §4.1).
//!
//! Turns a byte buffer into a sequence of window signatures plus a
//! file-level aggregate, via windowed variance, a 256-bin Shannon entropy
//! histogram, and coherence relative to the prior window.
//!
//! Determinism: all accumulators are fixed-width integers or `f64`
//! performed in a single, well-defined order, so identical
//! `(bytes, window, stride, precision)` always yields a bit-identical
//! output regardless of platform (spec §4.1 "Determinism").

use crate::model::Signature;

/// Variance of a uniform byte distribution, `255^2 / 12`, used to
/// normalize coherence (spec §3).
const UNIFORM_BYTE_VARIANCE: f64 = (255.0 * 255.0) / 12.0;

/// The encoder's only failure mode: the input is shorter than one window.
#[derive(Debug, thiserror::Error)]
#[error("input too small: have {have} bytes, need at least {want}")]
pub struct TooSmallError {
    pub have: usize,
    pub want: usize,
}

/// One window's signature plus its byte offset and raw variance (the raw
/// variance is re-derived by the chaos analyzer, spec §4.2 step 1).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowSignature {
    pub offset: usize,
    pub signature: Signature,
    pub variance: f64,
}

/// Full encoder output: all window signatures plus the file-level
/// aggregate (spec §3 "Aggregate file signature").
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedFile {
    pub windows: Vec<WindowSignature>,
    pub aggregate: Signature,
}

/// Encoder configuration (`window_bytes`, `stride_bytes`,
/// `signature_precision` in spec §6).
#[derive(Clone, Copy, Debug)]
pub struct EncoderParams {
    pub window: usize,
    pub stride: usize,
    pub precision: u32,
}

impl Default for EncoderParams {
    fn default() -> Self {
        Self { window: 64, stride: 48, precision: crate::model::DEFAULT_PRECISION }
    }
}

/// Encode `bytes` into window signatures plus the aggregate (spec §4.1
/// `encode(bytes, W, S, P) -> (windows[], aggregate)`).
pub fn encode(bytes: &[u8], params: EncoderParams) -> Result<EncodedFile, TooSmallError> {
    if bytes.len() < params.window {
        return Err(TooSmallError { have: bytes.len(), want: params.window });
    }

    let mut windows = Vec::new();
    let mut prev_coherence: Option<f64> = None;
    let mut offset = 0usize;

    // The final window's end is clamped to `bytes.len()` rather than
    // discarded when short (see DESIGN.md "Open Questions resolved" for
    // why this reading of the boundary rule matches spec §8 scenario 1's
    // worked `windows_analyzed` formula).
    loop {
        let end = (offset + params.window).min(bytes.len());
        let slice = &bytes[offset..end];
        let (mean, variance) = mean_and_variance(slice);
        let coherence = (1.0 - variance / UNIFORM_BYTE_VARIANCE).clamp(0.0, 1.0);
        let entropy = shannon_entropy_normalized(slice);
        let stability = match prev_coherence {
            None => 1.0,
            Some(prev) => 1.0 - (coherence - prev).abs(),
        };
        let _ = mean; // mean is only an intermediate of the variance computation.

        let raw = Signature { coherence, stability, entropy };
        windows.push(WindowSignature {
            offset,
            signature: raw.quantize(params.precision),
            variance,
        });
        prev_coherence = Some(coherence);

        if end == bytes.len() {
            break;
        }
        offset += params.stride;
    }

    let aggregate = aggregate_signature(&windows, params.precision);
    Ok(EncodedFile { windows, aggregate })
}

fn mean_and_variance(slice: &[u8]) -> (f64, f64) {
    let n = slice.len() as f64;
    let sum: u64 = slice.iter().map(|&b| b as u64).sum();
    let mean = sum as f64 / n;
    let sum_sq_dev: f64 = slice
        .iter()
        .map(|&b| {
            let d = b as f64 - mean;
            d * d
        })
        .sum();
    (mean, sum_sq_dev / n)
}

fn shannon_entropy_normalized(slice: &[u8]) -> f64 {
    let mut histogram = [0u32; 256];
    for &b in slice {
        histogram[b as usize] += 1;
    }
    let n = slice.len() as f64;
    let mut bits = 0.0f64;
    for &count in &histogram {
        if count == 0 {
            continue; // 0 * log2(0) := 0
        }
        let p = count as f64 / n;
        bits -= p * p.log2();
    }
    (bits / 8.0).clamp(0.0, 1.0)
}

fn aggregate_signature(windows: &[WindowSignature], precision: u32) -> Signature {
    if windows.is_empty() {
        return Signature { coherence: 0.0, stability: 0.0, entropy: 0.0 };
    }
    let n = windows.len() as f64;
    let (mut c, mut s, mut e) = (0.0, 0.0, 0.0);
    for w in windows {
        c += w.signature.coherence;
        s += w.signature.stability;
        e += w.signature.entropy;
    }
    Signature { coherence: c / n, stability: s / n, entropy: e / n }.quantize(precision)
}
