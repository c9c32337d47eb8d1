//! Shared fakes for pipeline, resolver, watch loop and project tests

use parking_lot::Mutex;
use regex::Regex;
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    config::{ProjectStore, ToolchainConfig},
    discovery::PackageDiscovery,
    error::FixmeError,
    package::{Package, PackageDescriptor},
    pipeline::Stage,
    project::ProjectServices,
    toolchain::{CheckRunner, ImportResolver, StepOutput},
    watch::{FileWatcher, WatchBackend, WatchSignal},
};

/// What `go test` prints for a passing package.
pub const PASSING_TEST_OUTPUT: &str = "PASS\nok  \tpkg\t0.001s\n";

/// Initialize logging for tests
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Ordered record of what the fakes were asked to do, shared between fakes so tests can check
/// interleaving (e.g. a watch removed before the next build).
#[derive(Debug, Default, Clone)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Output(String),
    MissingTool,
}

/// Check runner answering from a script: builds and lints print nothing and tests print
/// [`PASSING_TEST_OUTPUT`] unless told otherwise.
#[derive(Debug, Default, Clone)]
pub struct FakeToolchain {
    script: Arc<Mutex<HashMap<(Stage, String), Scripted>>>,
    calls: Arc<Mutex<Vec<(Stage, String)>>>,
    journal: Option<Journal>,
    artifacts: Option<FakeWatchBackend>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Make every build write a binary named after the package into its directory, the way
    /// `go build .` does for a main package, and report the write through `backend`.
    pub fn with_build_artifacts(mut self, backend: FakeWatchBackend) -> Self {
        self.artifacts = Some(backend);
        self
    }

    pub fn output(self, stage: Stage, import_path: &str, text: &str) -> Self {
        self.set(stage, import_path, text);
        self
    }

    pub fn fail(self, stage: Stage, import_path: &str, text: &str) -> Self {
        self.output(stage, import_path, text)
    }

    pub fn missing_tool(self, stage: Stage, import_path: &str) -> Self {
        self.script
            .lock()
            .insert((stage, import_path.to_string()), Scripted::MissingTool);
        self
    }

    /// Change the script of a toolchain already handed to a project.
    pub fn set(&self, stage: Stage, import_path: &str, text: &str) {
        self.script.lock().insert(
            (stage, import_path.to_string()),
            Scripted::Output(text.to_string()),
        );
    }

    /// Go back to default (passing) output for this step.
    pub fn clear(&self, stage: Stage, import_path: &str) {
        self.script.lock().remove(&(stage, import_path.to_string()));
    }

    pub fn calls(&self) -> Vec<(Stage, String)> {
        self.calls.lock().clone()
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.calls.lock().iter().filter(|(s, _)| *s == stage).count()
    }

    fn step(&self, stage: Stage, pkg: &Package) -> Result<StepOutput, FixmeError> {
        self.calls.lock().push((stage, pkg.import_path.clone()));
        if let Some(journal) = &self.journal {
            journal.push(format!("{stage}:{}", pkg.import_path));
        }
        if let (Stage::Build, Some(backend)) = (stage, &self.artifacts) {
            let name = pkg.import_path.rsplit('/').next().unwrap_or("a.out");
            let binary = Path::new(&pkg.path).join(name);
            let builds = self.count(Stage::Build);
            std::fs::write(&binary, vec![0u8; builds]).map_err(FixmeError::from)?;
            backend.touch(binary);
        }
        let scripted = self
            .script
            .lock()
            .get(&(stage, pkg.import_path.clone()))
            .cloned();
        match scripted {
            Some(Scripted::Output(text)) => Ok(StepOutput::new(text, true)),
            Some(Scripted::MissingTool) => Err(FixmeError::Toolchain {
                tool: stage.to_string(),
                message: "No such file or directory".to_string(),
            }),
            None if stage == Stage::Test => Ok(StepOutput::new(PASSING_TEST_OUTPUT, true)),
            None => Ok(StepOutput::default()),
        }
    }
}

impl CheckRunner for FakeToolchain {
    fn build(&self, pkg: &Package) -> Result<StepOutput, FixmeError> {
        self.step(Stage::Build, pkg)
    }

    fn test(&self, pkg: &Package) -> Result<StepOutput, FixmeError> {
        self.step(Stage::Test, pkg)
    }

    fn lint(&self, pkg: &Package) -> Result<StepOutput, FixmeError> {
        self.step(Stage::Lint, pkg)
    }
}

/// Import lookups from a fixed table. Packages missing from the table fail their lookup.
#[derive(Debug, Default, Clone)]
pub struct FakeImports {
    imports: BTreeMap<String, Vec<String>>,
    asked: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeImports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, import_path: &str, imports: &[&str]) -> Self {
        self.imports.insert(
            import_path.to_string(),
            imports.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn asked(&self, import_path: &str) -> usize {
        self.asked.lock().get(import_path).copied().unwrap_or(0)
    }
}

impl ImportResolver for FakeImports {
    fn imports(&self, pkg: &Package) -> Result<Vec<String>, FixmeError> {
        *self.asked.lock().entry(pkg.import_path.clone()).or_default() += 1;
        self.imports
            .get(&pkg.import_path)
            .cloned()
            .ok_or_else(|| FixmeError::ImportLookup {
                import_path: pkg.import_path.clone(),
                message: "cannot find package".to_string(),
            })
    }
}

/// Watch backend that records add/remove calls and lets the test inject file events.
#[derive(Debug, Default, Clone)]
pub struct FakeWatchBackend {
    watched: Arc<Mutex<Vec<PathBuf>>>,
    signals: Arc<Mutex<Option<UnboundedSender<WatchSignal>>>>,
    reject: Arc<Mutex<Vec<PathBuf>>>,
    journal: Option<Journal>,
    created: Arc<Mutex<usize>>,
}

struct FakeWatcher {
    backend: FakeWatchBackend,
}

impl FakeWatchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Make `add` fail for this path.
    pub fn reject(&self, path: impl Into<PathBuf>) {
        self.reject.lock().push(path.into());
    }

    pub fn watched(&self) -> Vec<PathBuf> {
        self.watched.lock().clone()
    }

    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        self.watched.lock().iter().any(|p| p == path.as_ref())
    }

    pub fn created(&self) -> usize {
        *self.created.lock()
    }

    /// Deliver a change event for `path`, as the platform watcher would.
    pub fn touch(&self, path: impl Into<PathBuf>) -> bool {
        self.emit(WatchSignal::Changed(vec![path.into()]))
    }

    pub fn emit(&self, signal: WatchSignal) -> bool {
        match self.signals.lock().as_ref() {
            Some(tx) => tx.send(signal).is_ok(),
            None => false,
        }
    }

    /// True once the loop has dropped its watcher.
    pub fn is_released(&self) -> bool {
        self.signals
            .lock()
            .as_ref()
            .map(|tx| tx.is_closed())
            .unwrap_or(true)
    }
}

impl FileWatcher for FakeWatcher {
    fn add(&mut self, path: &Path) -> Result<(), FixmeError> {
        if self.backend.reject.lock().iter().any(|p| p == path) {
            return Err(FixmeError::NotFound(format!("{path:?}")));
        }
        if let Some(journal) = &self.backend.journal {
            journal.push(format!("add:{}", path.display()));
        }
        self.backend.watched.lock().push(path.to_path_buf());
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> Result<(), FixmeError> {
        if let Some(journal) = &self.backend.journal {
            journal.push(format!("remove:{}", path.display()));
        }
        let mut watched = self.backend.watched.lock();
        match watched.iter().position(|p| p == path) {
            Some(idx) => {
                watched.remove(idx);
                Ok(())
            }
            None => Err(FixmeError::NotFound(format!("watch for {path:?}"))),
        }
    }
}

impl WatchBackend for FakeWatchBackend {
    fn create(
        &self,
        signals: UnboundedSender<WatchSignal>,
    ) -> Result<Box<dyn FileWatcher>, FixmeError> {
        *self.signals.lock() = Some(signals);
        *self.created.lock() += 1;
        Ok(Box::new(FakeWatcher {
            backend: self.clone(),
        }))
    }
}

pub fn descriptor(import_path: &str) -> PackageDescriptor {
    PackageDescriptor::new(format!("/src/{import_path}"), import_path)
}

/// Services wired to fakes, discovering `import_paths` under `/src`.
pub fn fake_services(
    import_paths: &[&str],
    toolchain: FakeToolchain,
    imports: FakeImports,
    backend: FakeWatchBackend,
    store: Option<Arc<dyn ProjectStore>>,
) -> ProjectServices {
    ProjectServices {
        discovery: Arc::new(PackageDiscovery::from_descriptors(
            import_paths.iter().map(|imp| descriptor(imp)),
        )),
        runner: Arc::new(toolchain),
        imports: Arc::new(imports),
        watch_backend: Arc::new(backend),
        store,
        debounce: Duration::from_millis(100),
        notification_capacity: 3,
        failure_marker: Regex::new(&ToolchainConfig::default().failure_marker).unwrap(),
        source_pattern: Regex::new(&ToolchainConfig::default().source_pattern).unwrap(),
    }
}
