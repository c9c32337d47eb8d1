use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{create_dir_all, read_to_string, write},
    path::{Path, PathBuf},
};

use crate::{
    discovery::default_source_roots,
    error::FixmeError,
    project::{ProjectId, ProjectRecord},
};

pub const CONFIG_FILE: &str = "config.toml";
pub const PROJECTS_FILE: &str = "projects.toml";

/// Commands run for each check step, as argv vectors executed in the package directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub build: Vec<String>,
    pub test: Vec<String>,
    pub lint: Vec<String>,
    /// Must print one import path per line.
    pub imports: Vec<String>,
    /// Matches `file:line` references in build output; capture group 1 is the file.
    pub failure_marker: String,
    /// File names the developer edits. A file matching it is never taken for output of a
    /// check pass, so an edit to it always triggers a pass.
    pub source_pattern: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        fn argv(parts: &[&str]) -> Vec<String> {
            parts.iter().map(|s| s.to_string()).collect()
        }
        ToolchainConfig {
            // Naming a second package makes `go build` discard the binary instead of writing it
            // into the watched package directory.
            build: argv(&["go", "build", ".", "errors"]),
            test: argv(&["go", "test"]),
            lint: argv(&["golint"]),
            imports: argv(&["go", "list", "-f", "{{join .Imports \"\\n\"}}", "."]),
            failure_marker: r"([^\s:]+\.go):\d+".to_string(),
            source_pattern: r"\.go$".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixmeConfig {
    pub source_roots: Vec<PathBuf>,
    /// Quiet period after the last file event before a pass runs.
    pub debounce_ms: u64,
    /// Capacity of each subscriber's notification queue.
    pub notification_capacity: usize,
    pub store_path: Option<PathBuf>,
    pub toolchain: ToolchainConfig,
}

impl Default for FixmeConfig {
    fn default() -> Self {
        FixmeConfig {
            source_roots: default_source_roots(),
            debounce_ms: 100,
            notification_capacity: 3,
            store_path: None,
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl FixmeConfig {
    /// Read a config file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FixmeError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to read config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(FixmeConfig::default());
        }
        let content = read_to_string(path)?;
        let config: FixmeConfig = toml::from_str(&content)?;
        if config.notification_capacity == 0 {
            return Err(FixmeError::Config(
                "notification_capacity must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), FixmeError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        write(path, toml::to_string(self)?)?;
        Ok(())
    }

    /// Where projects are stored: the configured path, else `projects.toml` in `data_dir`.
    pub fn store_path(&self, data_dir: &Path) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| data_dir.join(PROJECTS_FILE))
    }
}

/// Persistence for project records, keyed by project id.
pub trait ProjectStore: Send + Sync {
    fn save(&self, record: &ProjectRecord) -> Result<(), FixmeError>;
    fn delete(&self, id: &ProjectId) -> Result<(), FixmeError>;
    /// Load a project by id, or the first stored project when `id` is `None`.
    fn load(&self, id: Option<&ProjectId>) -> Result<Option<ProjectRecord>, FixmeError>;
    /// All stored projects, without their package lists.
    fn list(&self) -> Result<Vec<ProjectRecord>, FixmeError>;
}

/// Keeps every project record in a single TOML document.
#[derive(Debug)]
pub struct TomlProjectStore {
    path: PathBuf,
    lock: Mutex<()>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredProjects {
    #[serde(default)]
    projects: BTreeMap<String, ProjectRecord>,
}

impl TomlProjectStore {
    pub fn new(path: PathBuf) -> Self {
        TomlProjectStore {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StoredProjects, FixmeError> {
        if !self.path.exists() {
            return Ok(StoredProjects::default());
        }
        let content = read_to_string(&self.path).map_err(|e| {
            FixmeError::Store(format!("could not read {}: {e}", self.path.display()))
        })?;
        Ok(toml::from_str(&content)?)
    }

    fn write(&self, stored: &StoredProjects) -> Result<(), FixmeError> {
        if let Some(parent) = self.path.parent() {
            create_dir_all(parent)?;
        }
        let toml_string = toml::to_string(stored)?;
        write(&self.path, toml_string).map_err(|e| {
            FixmeError::Store(format!("could not write {}: {e}", self.path.display()))
        })
    }
}

impl ProjectStore for TomlProjectStore {
    fn save(&self, record: &ProjectRecord) -> Result<(), FixmeError> {
        let _guard = self.lock.lock();
        let mut stored = self.read()?;
        tracing::debug!("[Store] Saving project {} ({})", record.id, record.name);
        stored.projects.insert(record.id.to_string(), record.clone());
        self.write(&stored)
    }

    fn delete(&self, id: &ProjectId) -> Result<(), FixmeError> {
        let _guard = self.lock.lock();
        let mut stored = self.read()?;
        if stored.projects.remove(&id.to_string()).is_some() {
            tracing::debug!("[Store] Deleted project {}", id);
            self.write(&stored)?;
        }
        Ok(())
    }

    fn load(&self, id: Option<&ProjectId>) -> Result<Option<ProjectRecord>, FixmeError> {
        let _guard = self.lock.lock();
        let mut stored = self.read()?;
        Ok(match id {
            Some(id) => stored.projects.remove(&id.to_string()),
            None => stored.projects.into_values().next(),
        })
    }

    fn list(&self) -> Result<Vec<ProjectRecord>, FixmeError> {
        let _guard = self.lock.lock();
        let stored = self.read()?;
        Ok(stored
            .projects
            .into_values()
            .map(|mut record| {
                record.packages.clear();
                record
            })
            .collect())
    }
}
