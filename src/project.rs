//! The project orchestrator.
//!
//! A [`Project`] owns its package set, the current check order and (while started) one watch
//! loop. External callers change it only through its methods.
//!
//! Changing a package's action never re-resolves the dependency graph. Call
//! [`Project::resolve`] after `add_*`/`remove` before relying on the check order; until then
//! the loop keeps checking in the previous order, skipping packages that have left the set or
//! are no longer checked.

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::{
        mpsc::{unbounded_channel, UnboundedSender},
        watch,
    },
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    config::{FixmeConfig, ProjectStore},
    discovery::PackageDiscovery,
    error::FixmeError,
    event::{Publisher, Subscription},
    graph,
    package::{Action, Package, PackageDescriptor, PackageRecord, PackageSet},
    pipeline::{run_pass, PassOutcome},
    toolchain::{CheckRunner, CommandToolchain, ImportResolver},
    watch::{LoopCommand, LoopContext, NotifyBackend, WatchBackend, WatchLoop},
};

pub const DEFAULT_PROJECT_NAME: &str = "New Project";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(Uuid);

impl ProjectId {
    pub fn new() -> Self {
        ProjectId(Uuid::new_v4())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ProjectId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for ProjectId {
    type Err = FixmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ProjectId(Uuid::parse_str(s)?))
    }
}

/// The persisted form of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
}

/// Collaborators shared by every project of a session.
#[derive(Clone)]
pub struct ProjectServices {
    pub discovery: Arc<PackageDiscovery>,
    pub runner: Arc<dyn CheckRunner>,
    pub imports: Arc<dyn ImportResolver>,
    pub watch_backend: Arc<dyn WatchBackend>,
    pub store: Option<Arc<dyn ProjectStore>>,
    pub debounce: Duration,
    pub notification_capacity: usize,
    pub failure_marker: Regex,
    pub source_pattern: Regex,
}

impl ProjectServices {
    /// Services backed by the configured toolchain commands and the platform file watcher.
    pub fn from_config(
        config: &FixmeConfig,
        discovery: Arc<PackageDiscovery>,
        store: Option<Arc<dyn ProjectStore>>,
    ) -> Result<Self, FixmeError> {
        let toolchain = Arc::new(CommandToolchain::new(config.toolchain.clone()));
        Ok(ProjectServices {
            discovery,
            runner: toolchain.clone(),
            imports: toolchain,
            watch_backend: Arc::new(NotifyBackend),
            store,
            debounce: Duration::from_millis(config.debounce_ms),
            notification_capacity: config.notification_capacity,
            failure_marker: Regex::new(&config.toolchain.failure_marker)?,
            source_pattern: Regex::new(&config.toolchain.source_pattern)?,
        })
    }
}

struct LoopHandle {
    commands: UnboundedSender<LoopCommand>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Project {
    id: ProjectId,
    name: String,
    services: ProjectServices,
    packages: Arc<RwLock<PackageSet>>,
    check_order: Arc<RwLock<Vec<String>>>,
    publisher: Arc<Publisher>,
    last_outcome: Arc<Mutex<Option<PassOutcome>>>,
    handle: Option<LoopHandle>,
}

impl Project {
    pub fn new(services: ProjectServices) -> Self {
        Self::with_identity(ProjectId::new(), DEFAULT_PROJECT_NAME.to_string(), services)
    }

    fn with_identity(id: ProjectId, name: String, services: ProjectServices) -> Self {
        let publisher = Arc::new(Publisher::new(services.notification_capacity));
        Project {
            id,
            name,
            services,
            packages: Arc::new(RwLock::new(PackageSet::new())),
            check_order: Arc::new(RwLock::new(Vec::new())),
            publisher,
            last_outcome: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }

    /// Rebuild a project from its stored record. Packages discovery can no longer find are
    /// dropped. The check order is empty until [`Project::resolve`] runs.
    pub fn from_record(record: ProjectRecord, services: ProjectServices) -> Self {
        let project = Self::with_identity(record.id, record.name, services);
        {
            let mut packages = project.packages.write();
            for pkg in record.packages.iter() {
                if pkg.action == Action::None {
                    continue;
                }
                match project.services.discovery.by_import(&pkg.import_path) {
                    Some(desc) => packages.insert(Package::from_descriptor(desc, pkg.action)),
                    None => tracing::warn!(
                        "[Project] Dropping {}: package can no longer be found",
                        pkg.import_path
                    ),
                }
            }
        }
        project
    }

    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn services(&self) -> &ProjectServices {
        &self.services
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), FixmeError> {
        self.name = name.into();
        self.save()
    }

    pub fn record(&self) -> ProjectRecord {
        ProjectRecord {
            id: self.id,
            name: self.name.clone(),
            packages: self.packages.read().records(),
        }
    }

    pub fn save(&self) -> Result<(), FixmeError> {
        match &self.services.store {
            Some(store) => store.save(&self.record()),
            None => Ok(()),
        }
    }

    /// Remove this project from the store. Does not stop a running loop.
    pub fn delete(&self) -> Result<(), FixmeError> {
        match &self.services.store {
            Some(store) => store.delete(&self.id),
            None => Ok(()),
        }
    }

    pub fn add_test(&mut self, desc: &PackageDescriptor) -> Result<(), FixmeError> {
        self.set_action(desc, Action::Test)
    }

    pub fn add_lint(&mut self, desc: &PackageDescriptor) -> Result<(), FixmeError> {
        self.set_action(desc, Action::Lint)
    }

    pub fn add_watch(&mut self, desc: &PackageDescriptor) -> Result<(), FixmeError> {
        self.set_action(desc, Action::Watch)
    }

    /// Insert or update a package with `action` and persist the project. [`Action::None`]
    /// removes the package instead.
    ///
    /// The in-memory change stands even when persisting fails; the error is returned.
    pub fn set_action(&mut self, desc: &PackageDescriptor, action: Action) -> Result<(), FixmeError> {
        if action == Action::None {
            return self.remove(&desc.import_path).map(|_| ());
        }
        {
            let mut packages = self.packages.write();
            let mut pkg = Package::from_descriptor(desc, action);
            if let Some(existing) = packages.get(&desc.import_path) {
                pkg.state = existing.state;
                pkg.last_output = existing.last_output.clone();
            }
            packages.insert(pkg);
        }
        tracing::debug!("[Project] {} set to {}", desc.import_path, action);
        self.send(LoopCommand::Watch(PathBuf::from(&desc.path)));
        self.save()
    }

    /// Evict a package and persist the project.
    pub fn remove(&mut self, import_path: &str) -> Result<Option<Package>, FixmeError> {
        let removed = self.packages.write().remove(import_path);
        if let Some(pkg) = &removed {
            tracing::debug!("[Project] Removed {}", import_path);
            self.send(LoopCommand::Unwatch(PathBuf::from(&pkg.path)));
        }
        self.save()?;
        Ok(removed)
    }

    /// Recompute dependency edges and replace the check order. On failure the previous order
    /// stays in effect.
    pub fn resolve(&self) -> Result<Vec<String>, FixmeError> {
        let order = {
            let mut packages = self.packages.write();
            graph::resolve(&mut packages, self.services.imports.as_ref())?
        };
        tracing::info!("[Project] Check order: {:?}", order);
        *self.check_order.write() = order.clone();
        Ok(order)
    }

    pub fn check_order(&self) -> Vec<String> {
        self.check_order.read().clone()
    }

    pub fn package(&self, import_path: &str) -> Option<Package> {
        self.packages.read().get(import_path).cloned()
    }

    pub fn packages(&self) -> Vec<Package> {
        self.packages.read().iter().cloned().collect()
    }

    pub fn last_outcome(&self) -> Option<PassOutcome> {
        self.last_outcome.lock().clone()
    }

    /// A new receiver for the outcome of every pass from now on.
    pub fn subscribe(&self) -> Subscription {
        self.publisher.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }

    /// Launch the watch loop on the current tokio runtime and run one pass right away. Does
    /// nothing if the loop is already running.
    pub fn start(&mut self) -> Result<(), FixmeError> {
        if self.is_running() {
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|e| {
            FixmeError::Custom(format!("starting a project requires a tokio runtime: {e}"))
        })?;

        let (signal_tx, signal_rx) = unbounded_channel();
        let watcher = self.services.watch_backend.create(signal_tx)?;
        let (command_tx, command_rx) = unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = LoopContext {
            name: self.name.clone(),
            packages: self.packages.clone(),
            check_order: self.check_order.clone(),
            runner: self.services.runner.clone(),
            publisher: self.publisher.clone(),
            debounce: self.services.debounce,
            failure_marker: self.services.failure_marker.clone(),
            source_pattern: self.services.source_pattern.clone(),
            last_outcome: self.last_outcome.clone(),
        };
        let task = runtime.spawn(WatchLoop::new(ctx, watcher).run(signal_rx, command_rx, shutdown_rx));
        command_tx.send(LoopCommand::Trigger)?;
        tracing::info!("[Project] Started {} ({})", self.name, self.id);

        self.handle = Some(LoopHandle {
            commands: command_tx,
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Signal the watch loop to stop. A pass already running completes first.
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        let handle = self.handle.take()?;
        // The loop may already be gone; then there is nothing left to stop.
        let _ = handle.shutdown.send(true);
        tracing::info!("[Project] Stopping {} ({})", self.name, self.id);
        Some(handle.task)
    }

    /// Stop the watch loop and wait until it has released its watcher.
    pub async fn shutdown(&mut self) -> Result<(), FixmeError> {
        if let Some(task) = self.stop() {
            task.await?;
        }
        Ok(())
    }

    /// Ask the running loop for a pass now. Errors when the loop is not running.
    pub fn trigger(&self) -> Result<(), FixmeError> {
        match &self.handle {
            Some(handle) => Ok(handle.commands.send(LoopCommand::Trigger)?),
            None => Err(FixmeError::Custom(format!(
                "project {} is not running",
                self.id
            ))),
        }
    }

    /// Run one pass on the calling thread, outside the watch loop. Must not be used while the
    /// loop is running.
    pub fn run_once(&self) -> PassOutcome {
        let order = self.check_order.read().clone();
        let outcome = {
            let mut packages = self.packages.write();
            run_pass(&order, &mut packages, self.services.runner.as_ref())
        };
        *self.last_outcome.lock() = Some(outcome.clone());
        outcome
    }

    fn send(&self, command: LoopCommand) {
        if let Some(handle) = &self.handle {
            if let Err(e) = handle.commands.send(command) {
                tracing::warn!("[Project] {}", FixmeError::from(e));
            }
        }
    }
}

impl Drop for Project {
    fn drop(&mut self) {
        self.stop();
    }
}
