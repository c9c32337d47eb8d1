//! Package nodes: the checkable units of a project.
//!
//! A [`Package`] is a directory/import-path pair carrying an [`Action`] (how the project treats
//! it) and a [`CheckState`] (the outcome of the last check pass). Packages are owned by a
//! [`PackageSet`], which keeps the by-path and by-import indexes in sync.
//!
//! Discovery hands out immutable [`PackageDescriptor`]s; a project converts one into an owned
//! `Package` when an action is assigned, so nothing the project mutates is shared with the
//! discovery cache.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    str::FromStr,
};

use crate::error::FixmeError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Not part of the project. Packages with this action never enter a [`PackageSet`].
    #[default]
    None,
    /// Watch the package's files; never built, tested or linted.
    Watch,
    Test,
    /// Test, then lint.
    Lint,
}

impl Action {
    /// Whether packages with this action take part in the check order.
    pub fn is_checked(&self) -> bool {
        matches!(self, Action::Test | Action::Lint)
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Action::None => write!(f, "none"),
            Action::Watch => write!(f, "watch"),
            Action::Test => write!(f, "test"),
            Action::Lint => write!(f, "lint"),
        }
    }
}

impl FromStr for Action {
    type Err = FixmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Action::None),
            "watch" => Ok(Action::Watch),
            "test" => Ok(Action::Test),
            "lint" => Ok(Action::Lint),
            other => Err(FixmeError::NotFound(format!("Unknown package action '{other}'"))),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckState {
    #[default]
    NotRun,
    FailBuild,
    FailTest,
    FailLint,
    /// A check tool for this package could not be run; the code itself was not judged.
    ToolError,
    Passing,
}

impl Display for CheckState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CheckState::NotRun => write!(f, "Not Run"),
            CheckState::FailBuild => write!(f, "Build"),
            CheckState::FailTest => write!(f, "Test"),
            CheckState::FailLint => write!(f, "Lint"),
            CheckState::ToolError => write!(f, "Tool Error"),
            CheckState::Passing => write!(f, "Passing"),
        }
    }
}

/// What discovery knows about a package directory. Never mutated after discovery.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub path: String,
    pub import_path: String,
    /// Last segment of the import path.
    pub name: String,
}

impl PackageDescriptor {
    pub fn new(path: impl Into<String>, import_path: impl Into<String>) -> Self {
        let import_path = import_path.into();
        let name = import_path
            .rsplit('/')
            .next()
            .unwrap_or(import_path.as_str())
            .to_string();
        PackageDescriptor {
            path: path.into(),
            import_path,
            name,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub path: String,
    pub import_path: String,
    pub action: Action,
    pub state: CheckState,
    /// Diagnostic output of the last check that touched this package.
    pub last_output: String,
    /// Import paths this package depends on. Only valid right after a resolution pass.
    #[serde(skip)]
    pub dependencies: Vec<String>,
    /// Import paths depending on this package. Only valid right after a resolution pass.
    #[serde(skip)]
    pub dependents: Vec<String>,
}

impl Package {
    pub fn new(path: impl Into<String>, import_path: impl Into<String>, action: Action) -> Self {
        Package {
            path: path.into(),
            import_path: import_path.into(),
            action,
            ..Default::default()
        }
    }

    pub fn from_descriptor(desc: &PackageDescriptor, action: Action) -> Self {
        Package::new(desc.path.clone(), desc.import_path.clone(), action)
    }

    pub fn record(&self) -> PackageRecord {
        PackageRecord {
            import_path: self.import_path.clone(),
            action: self.action,
        }
    }

    pub(crate) fn clear_edges(&mut self) {
        self.dependencies.clear();
        self.dependents.clear();
    }
}

/// The persisted form of a package: path and state are re-derived on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub import_path: String,
    pub action: Action,
}

/// The live packages of a project, indexed by path and by import path.
///
/// Invariant: both indexes always name the same set of packages, and no two packages share a
/// path or an import path.
#[derive(Debug, Default, Clone)]
pub struct PackageSet {
    by_import: BTreeMap<String, Package>,
    import_by_path: BTreeMap<String, String>,
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a package. A package whose action is [`Action::None`] is removed
    /// instead. Any package previously holding the same path or import path is evicted.
    pub fn insert(&mut self, pkg: Package) {
        if pkg.action == Action::None {
            self.remove(&pkg.import_path);
            return;
        }
        if let Some(old_import) = self.import_by_path.get(&pkg.path).cloned() {
            self.remove(&old_import);
        }
        self.remove(&pkg.import_path);
        self.import_by_path
            .insert(pkg.path.clone(), pkg.import_path.clone());
        self.by_import.insert(pkg.import_path.clone(), pkg);
    }

    pub fn remove(&mut self, import_path: &str) -> Option<Package> {
        let pkg = self.by_import.remove(import_path)?;
        self.import_by_path.remove(&pkg.path);
        Some(pkg)
    }

    pub fn get(&self, import_path: &str) -> Option<&Package> {
        self.by_import.get(import_path)
    }

    pub fn get_mut(&mut self, import_path: &str) -> Option<&mut Package> {
        self.by_import.get_mut(import_path)
    }

    pub fn get_by_path(&self, path: &str) -> Option<&Package> {
        self.import_by_path
            .get(path)
            .and_then(|imp| self.by_import.get(imp))
    }

    pub fn contains(&self, import_path: &str) -> bool {
        self.by_import.contains_key(import_path)
    }

    pub fn len(&self) -> usize {
        self.by_import.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_import.is_empty()
    }

    /// Packages in import-path order.
    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.by_import.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Package> {
        self.by_import.values_mut()
    }

    pub fn paths(&self) -> Vec<String> {
        self.import_by_path.keys().cloned().collect()
    }

    pub fn records(&self) -> Vec<PackageRecord> {
        self.iter().map(Package::record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_action_round_trips_through_strings() {
        for action in [Action::None, Action::Watch, Action::Test, Action::Lint] {
            assert_eq!(action.to_string().parse::<Action>().unwrap(), action);
        }
        assert!("bogus".parse::<Action>().is_err());
        assert!(Action::Lint.is_checked());
        assert!(!Action::Watch.is_checked());
    }

    #[test]
    fn test_descriptor_name_is_last_segment() {
        let desc = PackageDescriptor::new("/src/example.com/util/strs", "example.com/util/strs");
        assert_eq!(desc.name, "strs");
        let root = PackageDescriptor::new("/src/top", "top");
        assert_eq!(root.name, "top");
    }

    #[test]
    fn test_package_set_keeps_indexes_in_sync() {
        let mut set = PackageSet::new();
        set.insert(Package::new("/src/a", "a", Action::Test));
        set.insert(Package::new("/src/b", "b", Action::Watch));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get_by_path("/src/a").unwrap().import_path, "a");

        // Same import path at a new location replaces the old entry entirely
        set.insert(Package::new("/src/a2", "a", Action::Lint));
        assert_eq!(set.len(), 2);
        assert!(set.get_by_path("/src/a").is_none());
        assert_eq!(set.get("a").unwrap().action, Action::Lint);

        // Same path under a different import path evicts the previous owner of the path
        set.insert(Package::new("/src/b", "c", Action::Test));
        assert!(!set.contains("b"));
        assert_eq!(set.get_by_path("/src/b").unwrap().import_path, "c");
        assert_eq!(set.paths(), vec!["/src/a2".to_string(), "/src/b".to_string()]);
    }

    #[test]
    fn test_none_action_is_never_inserted() {
        let mut set = PackageSet::new();
        set.insert(Package::new("/src/a", "a", Action::Test));
        set.insert(Package::new("/src/a", "a", Action::None));
        assert!(set.is_empty());
        assert!(set.get_by_path("/src/a").is_none());
    }
}
