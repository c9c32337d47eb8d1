//! Dependency resolution and check ordering.
//!
//! [`resolve`] asks the [`ImportResolver`] for the imports of every `Test`/`Lint` package and
//! records an edge `importer -> imported` for each import naming another live package. `Watch`
//! packages can be imported but never import, and they do not count towards anyone's wait
//! count.
//!
//! The check order is produced by peeling: each round takes every unordered package whose
//! remaining wait count is zero (in import-path order), appends them, and releases their
//! dependents. A round that takes nothing while packages remain means a cycle, reported as
//! [`FixmeError::CycleDetected`].
//!
//! A package whose import lookup fails is cut out of the graph for this resolution: it has no
//! edges in either direction, and it is ordered in the first round like any package without
//! dependencies.

use petgraph::{graph::NodeIndex, Direction, Graph};
use std::collections::{BTreeMap, BTreeSet};

use crate::{error::FixmeError, package::PackageSet, toolchain::ImportResolver};

/// Edges point from importer to imported package.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    graph: Graph<String, ()>,
    index: BTreeMap<String, NodeIndex>,
}

impl DependencyGraph {
    fn node(&mut self, import_path: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(import_path) {
            return *idx;
        }
        let idx = self.graph.add_node(import_path.to_string());
        self.index.insert(import_path.to_string(), idx);
        idx
    }

    pub fn add_edge(&mut self, importer: &str, imported: &str) {
        let from = self.node(importer);
        let to = self.node(imported);
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    fn neighbors(&self, import_path: &str, direction: Direction) -> Vec<String> {
        let Some(idx) = self.index.get(import_path) else {
            return Vec::new();
        };
        let mut out: Vec<String> = self
            .graph
            .neighbors_directed(*idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        out.sort();
        out
    }

    /// Packages `import_path` imports.
    pub fn dependencies_of(&self, import_path: &str) -> Vec<String> {
        self.neighbors(import_path, Direction::Outgoing)
    }

    /// Packages importing `import_path`.
    pub fn dependents_of(&self, import_path: &str) -> Vec<String> {
        self.neighbors(import_path, Direction::Incoming)
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Peel `checked` into dependency order. Only dependencies that are themselves in
    /// `checked` hold a package back.
    pub fn check_order(&self, checked: &BTreeSet<String>) -> Result<Vec<String>, FixmeError> {
        let mut waiting: BTreeMap<&str, usize> = checked
            .iter()
            .map(|imp| {
                let count = self
                    .dependencies_of(imp)
                    .iter()
                    .filter(|dep| checked.contains(*dep))
                    .count();
                (imp.as_str(), count)
            })
            .collect();

        let mut order = Vec::with_capacity(waiting.len());
        while !waiting.is_empty() {
            let ready: Vec<&str> = waiting
                .iter()
                .filter_map(|(imp, count)| (*count == 0).then_some(*imp))
                .collect();
            if ready.is_empty() {
                let stuck: Vec<String> = waiting.keys().map(|s| s.to_string()).collect();
                tracing::warn!("[Resolver] No progress, cycle among {:?}", stuck);
                return Err(FixmeError::CycleDetected { stuck });
            }
            for imp in ready.iter() {
                waiting.remove(imp);
            }
            for imp in ready {
                for dependent in self.dependents_of(imp) {
                    if let Some(count) = waiting.get_mut(dependent.as_str()) {
                        *count = count.saturating_sub(1);
                    }
                }
                order.push(imp.to_string());
            }
        }
        Ok(order)
    }
}

/// Recompute every package's edges and return the new check order.
///
/// Edges on the packages are rebuilt even when a cycle is reported; the caller decides whether
/// to keep its previous order.
pub fn resolve(
    packages: &mut PackageSet,
    resolver: &dyn ImportResolver,
) -> Result<Vec<String>, FixmeError> {
    for pkg in packages.iter_mut() {
        pkg.clear_edges();
    }

    let mut checked = BTreeSet::new();
    let mut excluded = BTreeSet::new();
    let mut imports: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pkg in packages.iter().filter(|p| p.action.is_checked()) {
        checked.insert(pkg.import_path.clone());
        match resolver.imports(pkg) {
            Ok(list) => {
                imports.insert(pkg.import_path.clone(), list);
            }
            Err(e) => {
                tracing::warn!(
                    "[Resolver] Excluding {} from the dependency graph: {}",
                    pkg.import_path,
                    e
                );
                excluded.insert(pkg.import_path.clone());
            }
        }
    }

    let mut graph = DependencyGraph::default();
    for (importer, list) in imports.iter() {
        for imported in list {
            if imported == importer || excluded.contains(imported) || !packages.contains(imported)
            {
                continue;
            }
            graph.add_edge(importer, imported);
        }
    }
    tracing::debug!(
        "[Resolver] {} checked packages, {} edges, {} excluded",
        checked.len(),
        graph.edge_count(),
        excluded.len()
    );

    for pkg in packages.iter_mut() {
        pkg.dependencies = graph.dependencies_of(&pkg.import_path);
        pkg.dependents = graph.dependents_of(&pkg.import_path);
    }

    graph.check_order(&checked)
}
