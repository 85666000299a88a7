//! Query surface (C7, spec §4.7): a thin read-only facade over the
//! structural index — substring/regex search, snippet verification, and
//! k-means clustering in signature space.

use rand::prelude::*;

use crate::chaos::{analyze, ChaosParams};
use crate::encoder::{encode, EncoderParams};
use crate::index::{IndexError, StructuralIndex};
use crate::model::Signature;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("invalid regex: {0}")]
    InvalidRegex(String),
}

/// One substring/regex match with two lines of context on either side
/// (spec §4.7 `search_substring`).
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    pub path: String,
    pub line_number: usize,
    pub context: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub total_count: usize,
}

/// Characters that mark a query as regex rather than literal (spec §4.7:
/// "interpreted as regex if it contains regex metacharacters").
const REGEX_METACHARACTERS: &[char] = &['.', '*', '+', '?', '(', ')', '[', ']', '{', '}', '^', '$', '|', '\\'];

fn looks_like_regex(query: &str) -> bool {
    query.chars().any(|c| REGEX_METACHARACTERS.contains(&c))
}

/// Read-only facade over a [`StructuralIndex`]: search, snippet verification,
/// and signature clustering.
pub struct QuerySurface<'a> {
    index: &'a StructuralIndex,
    encoder_params: EncoderParams,
    chaos_params: ChaosParams,
}

impl<'a> QuerySurface<'a> {
    #[must_use]
    pub fn new(index: &'a StructuralIndex, encoder_params: EncoderParams, chaos_params: ChaosParams) -> Self {
        Self { index, encoder_params, chaos_params }
    }

    /// `search_substring(query, file_glob, case_sensitive, limit)` (spec
    /// §4.7).
    #[tracing::instrument(skip(self), fields(file_glob = %file_glob))]
    pub async fn search_substring(
        &self,
        query: &str,
        file_glob: &str,
        case_sensitive: bool,
        limit: usize,
    ) -> Result<SearchResult, QueryError> {
        let pattern = if looks_like_regex(query) {
            query.to_string()
        } else {
            regex::escape(query)
        };
        let re = if case_sensitive {
            regex::Regex::new(&pattern)
        } else {
            regex::RegexBuilder::new(&pattern).case_insensitive(true).build()
        }
        .map_err(|e| QueryError::InvalidRegex(e.to_string()))?;

        let paths = self.index.list_paths(file_glob).await?;
        let mut hits = Vec::new();
        let mut total_count = 0usize;

        for path in paths {
            let Ok(body) = self.index.get_file(&path).await else { continue };
            let text = String::from_utf8_lossy(&body);
            let lines: Vec<&str> = text.lines().collect();
            for (i, line) in lines.iter().enumerate() {
                if re.is_match(line) {
                    total_count += 1;
                    if hits.len() < limit {
                        let lo = i.saturating_sub(2);
                        let hi = (i + 2).min(lines.len().saturating_sub(1));
                        let context = lines[lo..=hi].iter().map(|s| s.to_string()).collect();
                        hits.push(SearchHit { path: path.clone(), line_number: i + 1, context });
                    }
                }
            }
        }
        Ok(SearchResult { hits, total_count })
    }

    /// `verify_snippet(snippet, coverage_threshold, scope_glob)` (spec
    /// §4.7): run C1+C2 on the snippet, then for each window query the
    /// index for files within signature tolerance.
    #[tracing::instrument(skip(self, snippet), fields(bytes = snippet.len()))]
    pub async fn verify_snippet(
        &self,
        snippet: &[u8],
        coverage_threshold: f64,
        scope_glob: &str,
    ) -> Result<VerifyResult, QueryError> {
        let encoded = encode(snippet, self.encoder_params).map_err(|_| {
            QueryError::Index(IndexError::NotFound("snippet shorter than one window".to_string()))
        })?;
        let analysis = analyze(&encoded, self.chaos_params);
        let theta = analysis.hazard_threshold;
        let total_windows = encoded.windows.len();

        let mut matched_windows = 0usize;
        let mut gated_hits = 0usize;

        for window in &encoded.windows {
            let neighbors = self
                .index
                .neighbors(window.signature, 0.05, scope_glob, 1)
                .await?;
            let matched = !neighbors.is_empty();
            if matched {
                matched_windows += 1;
            }
            // spec §4.7: "gated iff its variance exceeds the snippet's
            // hazard threshold theta" -- theta itself is computed over the
            // log-variance signal (spec §4.2 step 2); compared here
            // against the raw window variance per the literal wording.
            if matched && window.variance > theta {
                gated_hits += 1;
            }
        }

        let raw_match_ratio = matched_windows as f64 / total_windows as f64;
        let safe_coverage = gated_hits as f64 / total_windows as f64;
        let verified = safe_coverage >= coverage_threshold;

        Ok(VerifyResult { raw_match_ratio, safe_coverage, verified, total_windows })
    }

    /// `cluster(scope_glob, k)` (spec §4.7): k-means in `(C, S, E)` space,
    /// k-means++ init, stop at 50 iterations or centroid movement `< 1e-4`.
    #[tracing::instrument(skip(self), fields(scope_glob = %scope_glob, k))]
    pub async fn cluster(&self, scope_glob: &str, k: usize) -> Result<Vec<Cluster>, QueryError> {
        let paths = self.index.list_paths(scope_glob).await?;
        let mut points = Vec::new();
        for path in paths {
            if let Ok(sig_str) = self.index.get_signature(&path).await {
                if let Ok(sig) = Signature::parse(&sig_str) {
                    points.push((path, sig));
                }
            }
        }
        if points.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let k = k.min(points.len());

        let mut rng = rand::thread_rng();
        let mut centroids = kmeans_plus_plus_init(&points, k, &mut rng);

        let mut assignments = vec![0usize; points.len()];
        for _iteration in 0..50 {
            for (i, (_, sig)) in points.iter().enumerate() {
                assignments[i] = nearest_centroid(sig, &centroids);
            }

            let mut sums = vec![(0.0, 0.0, 0.0, 0usize); k];
            for (i, (_, sig)) in points.iter().enumerate() {
                let c = assignments[i];
                sums[c].0 += sig.coherence;
                sums[c].1 += sig.stability;
                sums[c].2 += sig.entropy;
                sums[c].3 += 1;
            }

            let mut max_move = 0.0f64;
            let mut next_centroids = centroids.clone();
            for (c, (sc, ss, se, n)) in sums.into_iter().enumerate() {
                if n == 0 {
                    continue;
                }
                let new_centroid = Signature {
                    coherence: sc / n as f64,
                    stability: ss / n as f64,
                    entropy: se / n as f64,
                };
                max_move = max_move.max(new_centroid.distance(&centroids[c]));
                next_centroids[c] = new_centroid;
            }
            centroids = next_centroids;
            if max_move < 1e-4 {
                break;
            }
        }

        let mut clusters: Vec<Cluster> = centroids
            .into_iter()
            .map(|centroid| Cluster { centroid, members: Vec::new() })
            .collect();
        for (i, (path, _)) in points.into_iter().enumerate() {
            clusters[assignments[i]].members.push(path);
        }
        Ok(clusters)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VerifyResult {
    pub raw_match_ratio: f64,
    pub safe_coverage: f64,
    pub verified: bool,
    pub total_windows: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub centroid: Signature,
    pub members: Vec<String>,
}

fn nearest_centroid(sig: &Signature, centroids: &[Signature]) -> usize {
    centroids
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            sig.distance(a).partial_cmp(&sig.distance(b)).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn kmeans_plus_plus_init(points: &[(String, Signature)], k: usize, rng: &mut impl Rng) -> Vec<Signature> {
    let mut centroids = Vec::with_capacity(k);
    let first = points.choose(rng).expect("points is non-empty").1;
    centroids.push(first);

    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|(_, sig)| {
                centroids
                    .iter()
                    .map(|c| sig.distance(c).powi(2))
                    .fold(f64::MAX, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            centroids.push(points[0].1);
            continue;
        }
        let mut threshold = rng.gen::<f64>() * total;
        let mut chosen = points[0].1;
        for (w, (_, sig)) in weights.iter().zip(points.iter()) {
            if threshold <= *w {
                chosen = *sig;
                break;
            }
            threshold -= w;
        }
        centroids.push(chosen);
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::StructuralIndex;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn index() -> StructuralIndex {
        StructuralIndex::new(Arc::new(MemoryStore::new()), 3)
    }

    #[tokio::test]
    async fn search_substring_finds_literal_match() {
        let idx = index();
        idx.put_file("a.txt", b"hello\nworld\nhello again", true, None, None, vec![]).await.unwrap();
        let qs = QuerySurface::new(&idx, EncoderParams::default(), ChaosParams::default());
        let result = qs.search_substring("hello", "*", false, 10).await.unwrap();
        assert_eq!(result.total_count, 2);
    }

    #[tokio::test]
    async fn search_substring_is_case_insensitive_by_default() {
        let idx = index();
        idx.put_file("a.txt", b"Hello", true, None, None, vec![]).await.unwrap();
        let qs = QuerySurface::new(&idx, EncoderParams::default(), ChaosParams::default());
        let result = qs.search_substring("hello", "*", false, 10).await.unwrap();
        assert_eq!(result.total_count, 1);
    }

    /// Every window of the snippet is re-indexed under its own signature, so
    /// `neighbors` finds an exact match for each one; at `coverage_threshold
    /// == 0.0` that alone must verify (spec's "Verify subset" scenario, the
    /// weak end of the gate).
    #[tokio::test]
    async fn verify_snippet_of_indexed_file_is_verified_at_zero_threshold() {
        let idx = index();
        let body: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let encoder_params = EncoderParams::default();
        let chaos_params = ChaosParams::default();
        let encoded = encode(&body, encoder_params).unwrap();
        let profile = analyze(&encoded, chaos_params).profile;
        idx.put_file("a.txt", &body, true, Some(encoded.aggregate), profile, vec![]).await.unwrap();
        for w in &encoded.windows {
            idx.put_file(
                &format!("win-{}", w.offset),
                &body[w.offset..(w.offset + encoder_params.window).min(body.len())],
                true,
                Some(w.signature),
                None,
                vec![],
            )
            .await
            .unwrap();
        }
        let qs = QuerySurface::new(&idx, encoder_params, chaos_params);
        let result = qs.verify_snippet(&body, 0.0, "*").await.unwrap();
        assert!(result.total_windows > 0);
        assert!(result.verified, "safe_coverage {} should clear threshold 0.0", result.safe_coverage);
    }

    /// At `coverage_threshold == 1.0` every window must be both matched and
    /// gated (variance above theta) for `verified` to hold, and
    /// `safe_coverage` must reach exactly 1.0 -- the literal scenario 6
    /// invariant.
    #[tokio::test]
    async fn verify_snippet_reaches_full_safe_coverage_at_full_threshold() {
        let idx = index();
        let mut prng = 0xabcd_1234u64;
        let mut next = || {
            prng ^= prng << 13;
            prng ^= prng >> 7;
            prng ^= prng << 17;
            (prng % 256) as u8
        };
        let body: Vec<u8> = (0..4096).map(|_| next()).collect();
        let encoder_params = EncoderParams::default();
        let chaos_params = ChaosParams::default();
        let encoded = encode(&body, encoder_params).unwrap();
        for w in &encoded.windows {
            idx.put_file(
                &format!("win-{}", w.offset),
                &body[w.offset..(w.offset + encoder_params.window).min(body.len())],
                true,
                Some(w.signature),
                None,
                vec![],
            )
            .await
            .unwrap();
        }
        let qs = QuerySurface::new(&idx, encoder_params, chaos_params);
        let result = qs.verify_snippet(&body, 1.0, "*").await.unwrap();
        assert_eq!(result.safe_coverage, 1.0);
        assert!(result.verified);
    }

    #[tokio::test]
    async fn verify_snippet_against_empty_index_is_never_verified() {
        let idx = index();
        let body: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let qs = QuerySurface::new(&idx, EncoderParams::default(), ChaosParams::default());
        let result = qs.verify_snippet(&body, 1.0, "*").await.unwrap();
        assert_eq!(result.safe_coverage, 0.0);
        assert!(!result.verified);
    }

    #[tokio::test]
    async fn cluster_returns_k_clusters_when_enough_points() {
        let idx = index();
        for i in 0..6 {
            let sig = Signature { coherence: (i as f64) / 10.0, stability: 0.5, entropy: 0.5 };
            idx.put_file(&format!("f{i}.txt"), b"x", true, Some(sig), None, vec![]).await.unwrap();
        }
        let qs = QuerySurface::new(&idx, EncoderParams::default(), ChaosParams::default());
        let clusters = qs.cluster("*", 2).await.unwrap();
        assert_eq!(clusters.len(), 2);
        let total_members: usize = clusters.iter().map(|c| c.members.len()).sum();
        assert_eq!(total_members, 6);
    }
}
