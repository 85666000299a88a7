//! Dependency analyzer (C5, spec §4.5): a directed import graph over
//! indexed text files, with blast-radius and outbound-import queries.
//!
//! The graph is rebuilt lazily and swapped in atomically with `arc-swap`,
//! mirroring spec §5's "single-writer, many-reader... swap is atomic" for
//! C5 (see DESIGN.md for how this pattern is grounded).

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use arc_swap::ArcSwap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::index::{IndexError, StructuralIndex};

/// Produces a module name from a file's path, and the set of modules a
/// file's body references, per spec §4.5's pluggable import extractor.
pub trait ImportExtractor: Send + Sync {
    fn extract_imports(&self, body: &[u8]) -> HashSet<String>;
    fn path_to_module(&self, path: &str) -> Option<String>;
}

/// Recognizes common `import`/`use`/`require`-style lines by regex. This
/// is a placeholder extractor, not a language-aware parser — spec §4.5
/// delegates real import extraction to an external collaborator.
pub struct HeuristicExtractor {
    import_re: regex::Regex,
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self {
            import_re: regex::Regex::new(
                r#"(?m)^\s*(?:use\s+([\w:]+)|import\s+([\w./]+)|from\s+([\w.]+)\s+import|(?:const|let)\s+\w+\s*=\s*require\(['"]([\w./\-]+)['"]\))"#,
            )
            .expect("static regex is valid"),
        }
    }
}

impl ImportExtractor for HeuristicExtractor {
    fn extract_imports(&self, body: &[u8]) -> HashSet<String> {
        let text = String::from_utf8_lossy(body);
        let mut modules = HashSet::new();
        for caps in self.import_re.captures_iter(&text) {
            for group in [1, 2, 3, 4] {
                if let Some(m) = caps.get(group) {
                    modules.insert(m.as_str().to_string());
                }
            }
        }
        modules
    }

    fn path_to_module(&self, path: &str) -> Option<String> {
        let stem = path.strip_suffix(".rs").unwrap_or(path);
        Some(stem.replace('/', "::"))
    }
}

/// BFS result for `blast_radius` (spec §4.5).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlastRadius {
    pub imported_by: HashSet<String>,
    pub depth: usize,
    pub size: usize,
}

#[derive(Default)]
struct GraphState {
    graph: DiGraph<String, ()>,
    nodes: std::collections::HashMap<String, NodeIndex>,
}

impl GraphState {
    fn node(&mut self, path: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(path) {
            return idx;
        }
        let idx = self.graph.add_node(path.to_string());
        self.nodes.insert(path.to_string(), idx);
        idx
    }
}

/// Directed import graph, atomically swappable so readers never block a
/// rebuild (spec §5 C5 scheduling rule).
pub struct DependencyGraph {
    state: ArcSwap<GraphState>,
    is_core_threshold: usize,
}

impl DependencyGraph {
    #[must_use]
    pub fn new(is_core_threshold: usize) -> Self {
        Self { state: ArcSwap::from_pointee(GraphState::default()), is_core_threshold }
    }

    /// Rebuild the entire graph from a fresh `(path, imports)` snapshot and
    /// swap it in atomically (spec §4.5 "rebuilt lazily... implementations
    /// may cache and invalidate rather than rebuild eagerly").
    pub fn rebuild(&self, files: &[(String, Vec<String>)], extractor: &dyn ImportExtractor) {
        let mut next = GraphState::default();
        for (path, _) in files {
            next.node(path);
        }
        let module_to_path: std::collections::HashMap<String, String> = files
            .iter()
            .filter_map(|(path, _)| extractor.path_to_module(path).map(|m| (m, path.clone())))
            .collect();

        for (path, imports) in files {
            let from = next.node(path);
            for module in imports {
                if let Some(target_path) = module_to_path.get(module) {
                    let to = next.node(target_path);
                    if from != to {
                        next.graph.add_edge(from, to, ());
                    }
                }
            }
        }
        self.state.store(Arc::new(next));
    }

    /// `imports(path) -> set<path>` (spec §4.5): outbound neighbors.
    #[must_use]
    pub fn imports(&self, path: &str) -> HashSet<String> {
        let state = self.state.load();
        let Some(&idx) = state.nodes.get(path) else { return HashSet::new() };
        state
            .graph
            .edges(idx)
            .map(|e| state.graph[e.target()].clone())
            .collect()
    }

    /// `blast_radius(path, depth_cap)` (spec §4.5): reverse BFS.
    #[must_use]
    pub fn blast_radius(&self, path: &str, depth_cap: usize) -> BlastRadius {
        let state = self.state.load();
        let Some(&start) = state.nodes.get(path) else {
            return BlastRadius { imported_by: HashSet::new(), depth: 0, size: 0 };
        };

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back((start, 0usize));
        visited.insert(start);
        let mut max_depth = 0;
        let mut imported_by = HashSet::new();

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= depth_cap {
                continue;
            }
            for edge in state.graph.edges_directed(node, petgraph::Direction::Incoming) {
                let pred = edge.source();
                if visited.insert(pred) {
                    imported_by.insert(state.graph[pred].clone());
                    max_depth = max_depth.max(depth + 1);
                    queue.push_back((pred, depth + 1));
                }
            }
        }

        BlastRadius { size: imported_by.len(), depth: max_depth, imported_by }
    }

    /// `is_core(path) -> bool`: `blast_radius(path).size >= threshold`
    /// (spec §4.5 default 10; spec §9 Open Question, see DESIGN.md).
    #[must_use]
    pub fn is_core(&self, path: &str) -> bool {
        self.blast_radius(path, usize::MAX).size >= self.is_core_threshold
    }

    /// Read every indexed path's stored import set back out of `index` and
    /// rebuild the graph from it (spec §4.5 data flow: "C5 reads file
    /// bodies via C3 and builds a graph in memory"; here the bodies have
    /// already been reduced to import sets by C4's extractor and cached in
    /// file metadata, so this reads that cache rather than re-parsing
    /// bodies). Synthetic fact paths never carry imports and are skipped.
    pub async fn rebuild_from_index(
        &self,
        index: &StructuralIndex,
        extractor: &dyn ImportExtractor,
    ) -> Result<(), IndexError> {
        let paths = index.list_paths("*").await?;
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            if path.starts_with("__fact__/") {
                continue;
            }
            let imports = index.get_imports(&path).await.unwrap_or_default();
            files.push((path, imports));
        }
        self.rebuild(&files, extractor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blast_radius_counts_transitive_importers() {
        let graph = DependencyGraph::new(10);
        let extractor = HeuristicExtractor::default();
        let files = vec![
            ("a.rs".to_string(), vec!["b".to_string()]),
            ("b.rs".to_string(), vec!["c".to_string()]),
            ("c.rs".to_string(), vec![]),
        ];
        graph.rebuild(&files, &extractor);
        let radius = graph.blast_radius("c.rs", 10);
        assert_eq!(radius.size, 2);
        assert!(radius.imported_by.contains("a.rs"));
        assert!(radius.imported_by.contains("b.rs"));
    }

    #[test]
    fn is_core_respects_threshold() {
        let graph = DependencyGraph::new(2);
        let extractor = HeuristicExtractor::default();
        let files = vec![
            ("a.rs".to_string(), vec!["leaf".to_string()]),
            ("b.rs".to_string(), vec!["leaf".to_string()]),
            ("leaf.rs".to_string(), vec![]),
        ];
        graph.rebuild(&files, &extractor);
        assert!(graph.is_core("leaf.rs"));
        assert!(!graph.is_core("a.rs"));
    }

    #[test]
    fn heuristic_extractor_finds_use_and_require() {
        let extractor = HeuristicExtractor::default();
        let rust_body = b"use crate::model::Signature;\nfn main() {}";
        let js_body = b"const fs = require('fs');\n";
        assert!(extractor.extract_imports(rust_body).contains("crate::model::Signature"));
        assert!(extractor.extract_imports(js_body).contains("fs"));
    }

    #[test]
    fn unknown_path_has_empty_blast_radius() {
        let graph = DependencyGraph::new(10);
        let radius = graph.blast_radius("missing.rs", 10);
        assert_eq!(radius.size, 0);
    }

    #[tokio::test]
    async fn rebuild_from_index_reads_back_stored_imports() {
        use crate::store::MemoryStore;
        use std::sync::Arc;

        let index = StructuralIndex::new(Arc::new(MemoryStore::new()), 3);
        index
            .put_file("a.rs", b"use crate::b;", true, None, None, vec!["b".to_string()])
            .await
            .unwrap();
        index.put_file("b.rs", b"fn leaf() {}", true, None, None, vec![]).await.unwrap();

        let graph = DependencyGraph::new(10);
        graph.rebuild_from_index(&index, &HeuristicExtractor::default()).await.unwrap();

        assert!(graph.imports("a.rs").contains("b.rs"));
        let radius = graph.blast_radius("b.rs", 10);
        assert_eq!(radius.size, 1);
        assert!(radius.imported_by.contains("a.rs"));
    }
}
