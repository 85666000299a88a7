//! Risk composer (C6, spec §4.6): chaos × blast radius × external churn
//! folded into one combined risk score and band.

use crate::deps::DependencyGraph;
use crate::index::{IndexError, StructuralIndex};
use crate::model::CombinedRiskClass;

/// `combined_risk_weights` / `risk_bands` (spec §6).
#[derive(Clone, Copy, Debug)]
pub struct RiskWeights {
    pub chaos: f64,
    pub blast_radius: f64,
    pub churn: f64,
    pub critical_band: f64,
    pub high_band: f64,
    pub moderate_band: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            chaos: 0.4,
            blast_radius: 0.3,
            churn: 0.3,
            critical_band: 0.40,
            high_band: 0.30,
            moderate_band: 0.20,
        }
    }
}

/// One file's composed risk (used by `scan_critical`).
#[derive(Clone, Debug, PartialEq)]
pub struct RiskScore {
    pub path: String,
    pub combined_risk: f64,
    pub risk_class: CombinedRiskClass,
}

/// `combined_risk(path) := 0.4*chaos + 0.3*min(blast_radius/50, 1) +
/// 0.3*churn` (spec §4.6). `churn` is provided externally; defaults to 0
/// when the caller has no VCS-history adapter wired up (spec §4.6 "the
/// repo integrates a VCS-history adapter outside this core").
pub fn combined_risk(chaos_score: f64, blast_radius_size: usize, churn: f64, weights: RiskWeights) -> f64 {
    let radius_term = (blast_radius_size as f64 / 50.0).min(1.0);
    weights.chaos * chaos_score + weights.blast_radius * radius_term + weights.churn * churn
}

#[must_use]
pub fn risk_class(combined: f64, weights: RiskWeights) -> CombinedRiskClass {
    if combined >= weights.critical_band {
        CombinedRiskClass::Critical
    } else if combined >= weights.high_band {
        CombinedRiskClass::High
    } else if combined >= weights.moderate_band {
        CombinedRiskClass::Moderate
    } else {
        CombinedRiskClass::Low
    }
}

/// `scan_critical(scope_glob, min_risk, limit)` (spec §4.6): top-`limit`
/// files with `combined_risk >= min_risk`, descending, ties by path.
pub async fn scan_critical(
    index: &StructuralIndex,
    graph: &DependencyGraph,
    scope_glob: &str,
    min_risk: f64,
    limit: usize,
    weights: RiskWeights,
    churn_of: impl Fn(&str) -> f64,
) -> Result<Vec<RiskScore>, IndexError> {
    let paths = index.list_paths(scope_glob).await?;
    let mut scored = Vec::new();
    for path in paths {
        let Ok(profile) = index.get_chaos_profile(&path).await else { continue };
        let radius = graph.blast_radius(&path, 10);
        let combined = combined_risk(profile.chaos_score, radius.size, churn_of(&path), weights);
        if combined >= min_risk {
            scored.push(RiskScore { path, combined_risk: combined, risk_class: risk_class(combined, weights) });
        }
    }
    scored.sort_by(|a, b| {
        b.combined_risk
            .partial_cmp(&a.combined_risk)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    scored.truncate(limit);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::{DependencyGraph, HeuristicExtractor, ImportExtractor};
    use crate::index::StructuralIndex;
    use crate::model::{ChaosProfile, RiskClass, Signature, SymbolicStateCounts};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn scan_critical_orders_descending_and_applies_min_risk() {
        let index = StructuralIndex::new(Arc::new(MemoryStore::new()), 3);
        let profile_high = ChaosProfile {
            chaos_score: 0.9,
            entropy: 0.5,
            coherence: 0.5,
            risk_class: RiskClass::High,
            hazard_threshold: 0.1,
            windows_analyzed: 10,
            symbolic_states: SymbolicStateCounts::default(),
        };
        let profile_low = ChaosProfile { chaos_score: 0.0, ..profile_high.clone() };
        let sig = Signature { coherence: 0.5, stability: 0.5, entropy: 0.5 };

        index.put_file("hot.rs", b"x", true, Some(sig), Some(profile_high), vec![]).await.unwrap();
        index.put_file("cold.rs", b"y", true, Some(sig), Some(profile_low), vec![]).await.unwrap();

        let graph = DependencyGraph::new(10);
        graph.rebuild(&[], &HeuristicExtractor::default());

        let results = scan_critical(&index, &graph, "*", 0.0, 10, RiskWeights::default(), |_| 0.0)
            .await
            .unwrap();
        assert_eq!(results[0].path, "hot.rs");
        assert!(results[0].combined_risk >= results.last().unwrap().combined_risk);

        let only_high = scan_critical(&index, &graph, "*", 0.3, 10, RiskWeights::default(), |_| 0.0)
            .await
            .unwrap();
        assert_eq!(only_high.len(), 1);
        assert_eq!(only_high[0].path, "hot.rs");
    }

    #[test]
    fn combined_risk_matches_spec_formula() {
        let weights = RiskWeights::default();
        let r = combined_risk(0.5, 25, 0.2, weights);
        assert!((r - (0.4 * 0.5 + 0.3 * 0.5 + 0.3 * 0.2)).abs() < 1e-9);
    }

    #[test]
    fn blast_radius_term_is_capped_at_one() {
        let weights = RiskWeights::default();
        let r = combined_risk(0.0, 500, 0.0, weights);
        assert!((r - 0.3).abs() < 1e-9);
    }

    #[test]
    fn risk_bands_are_inclusive_at_boundary() {
        let weights = RiskWeights::default();
        assert_eq!(risk_class(0.40, weights), CombinedRiskClass::Critical);
        assert_eq!(risk_class(0.30, weights), CombinedRiskClass::High);
        assert_eq!(risk_class(0.20, weights), CombinedRiskClass::Moderate);
        assert_eq!(risk_class(0.19, weights), CombinedRiskClass::Low);
    }
}
