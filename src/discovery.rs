//! Package discovery: every directory below a source root is a candidate package, identified by
//! its root-relative, slash-separated import path.
//!
//! A [`PackageDiscovery`] is built once (at startup, or on first use by the caller) and shared
//! by reference between the CLI layer and every project.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use walkdir::{DirEntry, WalkDir};

use crate::{error::FixmeError, package::PackageDescriptor};

#[derive(Debug, Default, Clone)]
pub struct PackageDiscovery {
    by_import: BTreeMap<String, PackageDescriptor>,
    by_name: BTreeMap<String, Vec<PackageDescriptor>>,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

impl PackageDiscovery {
    /// Walk every root. Roots that do not exist are skipped with a warning, unreadable
    /// directories below a root are skipped silently.
    pub fn scan<P: AsRef<Path>>(roots: &[P]) -> Result<Self, FixmeError> {
        let mut descriptors = Vec::new();
        for root in roots {
            let root = root.as_ref();
            if !root.is_dir() {
                tracing::warn!("[Discovery] Source root {:?} is not a directory", root);
                continue;
            }
            let walker = WalkDir::new(root)
                .min_depth(1)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || (e.file_type().is_dir() && !is_hidden(e)));
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::debug!("[Discovery] Skipping unreadable entry: {}", e);
                        continue;
                    }
                };
                let rel = entry.path().strip_prefix(root)?;
                let import_path = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                descriptors.push(PackageDescriptor::new(
                    entry.path().to_string_lossy(),
                    import_path,
                ));
            }
        }
        tracing::info!(
            "[Discovery] Found {} package directories under {} root(s)",
            descriptors.len(),
            roots.len()
        );
        Ok(Self::from_descriptors(descriptors))
    }

    /// Build from an explicit list. When two descriptors share an import path, the one listed
    /// first wins (earlier roots shadow later ones).
    pub fn from_descriptors<I: IntoIterator<Item = PackageDescriptor>>(descriptors: I) -> Self {
        let mut discovery = PackageDiscovery::default();
        for desc in descriptors {
            if discovery.by_import.contains_key(&desc.import_path) {
                continue;
            }
            discovery
                .by_name
                .entry(desc.name.clone())
                .or_default()
                .push(desc.clone());
            discovery.by_import.insert(desc.import_path.clone(), desc);
        }
        for matches in discovery.by_name.values_mut() {
            matches.sort();
        }
        discovery
    }

    pub fn by_import(&self, import_path: &str) -> Option<&PackageDescriptor> {
        self.by_import.get(import_path)
    }

    pub fn by_name(&self, name: &str) -> &[PackageDescriptor] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_import.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_import.is_empty()
    }
}

/// Default source roots: every `src` directory of `$GOPATH`, else `~/go/src`.
pub fn default_source_roots() -> Vec<PathBuf> {
    if let Some(gopath) = std::env::var_os("GOPATH") {
        let roots: Vec<PathBuf> = std::env::split_paths(&gopath)
            .map(|p| p.join("src"))
            .collect();
        if !roots.is_empty() {
            return roots;
        }
    }
    std::env::var_os("HOME")
        .map(|home| vec![PathBuf::from(home).join("go").join("src")])
        .unwrap_or_default()
}
