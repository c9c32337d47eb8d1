//! # Watch Loop - Debounced Check Passes on File Changes
//!
//! Each running [`Project`](crate::project::Project) owns exactly one watch loop task. The loop
//! owns the project's [`FileWatcher`], which is registered on the directory of every live
//! package, and it is the only place check passes run, so two passes of one project never
//! overlap.
//!
//! ## Debouncing
//!
//! Every filesystem change (re)arms a quiet-period timer (100ms by default). Events arriving
//! before the timer fires re-arm it again, so a burst of saves collapses into one pass.
//!
//! ## Temporary watches
//!
//! When a pass fails in the build stage, every `file.go:line` reference in the failing
//! package's output is watched individually until the next pass starts. A fix to exactly that
//! file then retriggers a pass even where directory granularity would miss it.
//!
//! ## Pass output
//!
//! Build tools may write into the very directories being watched (`go build .` drops the binary
//! of a main package next to its sources). Each pass snapshots the files of the package
//! directories before and after it runs; files that appeared, changed or vanished in between are
//! taken for the pass's own output, and events for only those paths are ignored for a short
//! grace period. Files matching the toolchain's `source_pattern` are never taken for output.
//!
//! ## Threading Model
//!
//! - The loop task selects over: the stop signal, watcher signals, [`LoopCommand`]s from the
//!   project, and the debounce timer.
//! - A pass runs on the blocking pool (`spawn_blocking`) against a snapshot of the package set;
//!   the loop awaits it before selecting again. Resulting states are written back to the live
//!   set afterwards.
//! - The outcome is then published. Publishing waits for room in every subscriber's queue, so
//!   a stalled consumer stalls the loop: file events queue up unprocessed until it drains. The
//!   stop signal is still honoured while waiting.
//!
//! ## Error Handling
//!
//! - Watch add/remove failures and watcher errors are logged, never fatal.
//! - A pass that panics is logged and the loop keeps running.

use notify::{
    event::EventKind, Event as NotifyEvent, RecommendedWatcher, RecursiveMode, Watcher,
};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{
    sync::{
        mpsc::{UnboundedReceiver, UnboundedSender},
        watch,
    },
    task::spawn_blocking,
    time::{sleep_until, Instant},
};
use walkdir::WalkDir;

use crate::{
    error::FixmeError,
    event::{Notification, Publisher},
    package::PackageSet,
    pipeline::{run_pass, PassOutcome, Stage},
    toolchain::CheckRunner,
};

/// What a [`FileWatcher`] reports back to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    Changed(Vec<PathBuf>),
    Error(String),
}

/// Requests from the owning project to its running loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopCommand {
    Watch(PathBuf),
    Unwatch(PathBuf),
    /// Run a pass now, without waiting for a file event.
    Trigger,
}

pub trait FileWatcher: Send {
    fn add(&mut self, path: &Path) -> Result<(), FixmeError>;
    fn remove(&mut self, path: &Path) -> Result<(), FixmeError>;
}

/// Creates the watcher for a loop. The watcher must report through `signals` until dropped.
pub trait WatchBackend: Send + Sync {
    fn create(
        &self,
        signals: UnboundedSender<WatchSignal>,
    ) -> Result<Box<dyn FileWatcher>, FixmeError>;
}

/// Filesystem notifications from the platform's recommended `notify` watcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

struct NotifyWatcher(RecommendedWatcher);

impl FileWatcher for NotifyWatcher {
    fn add(&mut self, path: &Path) -> Result<(), FixmeError> {
        Ok(self.0.watch(path, RecursiveMode::NonRecursive)?)
    }

    fn remove(&mut self, path: &Path) -> Result<(), FixmeError> {
        Ok(self.0.unwatch(path)?)
    }
}

impl WatchBackend for NotifyBackend {
    fn create(
        &self,
        signals: UnboundedSender<WatchSignal>,
    ) -> Result<Box<dyn FileWatcher>, FixmeError> {
        let watcher = notify::recommended_watcher(
            move |result: Result<NotifyEvent, notify::Error>| {
                let signal = match result {
                    Ok(event) => match event.kind {
                        EventKind::Access(_) => return,
                        _ => WatchSignal::Changed(event.paths),
                    },
                    Err(e) => WatchSignal::Error(FixmeError::from(e).to_string()),
                };
                // The loop is gone once the receiver is dropped; nothing left to tell.
                let _ = signals.send(signal);
            },
        )?;
        Ok(Box::new(NotifyWatcher(watcher)))
    }
}

/// Files referenced as `file:line` in `output`, resolved against the package directory.
///
/// `marker` must match a whole reference with the file in capture group 1. A leading `./` is
/// dropped; duplicates are reported once.
pub fn failing_files(marker: &Regex, pkg_path: &str, output: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    for line in output.lines() {
        let Some(caps) = marker.captures(line) else {
            continue;
        };
        let Some(token) = caps.get(1).or_else(|| caps.get(0)) else {
            continue;
        };
        let token = token.as_str().trim_start_matches("./");
        let path = Path::new(pkg_path).join(token);
        if !files.contains(&path) {
            files.push(path);
        }
    }
    files
}

/// How long events for files a pass wrote are ignored after the pass ends.
const PASS_OUTPUT_GRACE: Duration = Duration::from_secs(3);

/// Modification time and size of every file directly inside some directories.
pub(crate) type DirSnapshot = BTreeMap<PathBuf, (Option<SystemTime>, u64)>;

pub(crate) fn snapshot_dirs(dirs: &[String]) -> DirSnapshot {
    let mut files = DirSnapshot::new();
    for dir in dirs {
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                files.insert(entry.into_path(), (meta.modified().ok(), meta.len()));
            }
        }
    }
    files
}

/// Files that appeared, changed or vanished between two snapshots, leaving out source files.
pub(crate) fn pass_output(before: &DirSnapshot, after: &DirSnapshot, source: &Regex) -> Vec<PathBuf> {
    let changed = after
        .iter()
        .filter(|(path, stamp)| before.get(*path) != Some(stamp))
        .map(|(path, _)| path);
    let vanished = before.keys().filter(|path| !after.contains_key(*path));
    changed
        .chain(vanished)
        .filter(|path| {
            let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            !source.is_match(&name)
        })
        .cloned()
        .collect()
}

/// Everything the loop shares with its project.
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub name: String,
    pub packages: Arc<RwLock<PackageSet>>,
    pub check_order: Arc<RwLock<Vec<String>>>,
    pub runner: Arc<dyn CheckRunner>,
    pub publisher: Arc<Publisher>,
    pub debounce: Duration,
    pub failure_marker: Regex,
    pub source_pattern: Regex,
    /// Outcome of the most recent pass.
    pub last_outcome: Arc<Mutex<Option<PassOutcome>>>,
}

pub(crate) struct WatchLoop {
    ctx: LoopContext,
    watcher: Box<dyn FileWatcher>,
    temporary: Vec<PathBuf>,
    /// Files written by recent passes, with when to stop ignoring them.
    own_output: HashMap<PathBuf, Instant>,
}

impl WatchLoop {
    pub fn new(ctx: LoopContext, watcher: Box<dyn FileWatcher>) -> Self {
        WatchLoop {
            ctx,
            watcher,
            temporary: Vec::new(),
            own_output: HashMap::new(),
        }
    }

    fn add_watch(&mut self, path: &Path) -> bool {
        match self.watcher.add(path) {
            Ok(()) => {
                tracing::debug!("[WatchLoop] Watching {:?}", path);
                true
            }
            Err(e) => {
                tracing::warn!("[WatchLoop] Could not watch {:?}: {}", path, e);
                false
            }
        }
    }

    fn remove_watch(&mut self, path: &Path) {
        if let Err(e) = self.watcher.remove(path) {
            tracing::warn!("[WatchLoop] Could not stop watching {:?}: {}", path, e);
        }
    }

    /// True when every path of an event is output of a recent pass.
    fn is_own_output(&mut self, paths: &[PathBuf]) -> bool {
        let now = Instant::now();
        self.own_output.retain(|_, until| *until > now);
        !paths.is_empty() && paths.iter().all(|p| self.own_output.contains_key(p))
    }

    #[tracing::instrument(skip_all, fields(project = %self.ctx.name))]
    pub async fn run(
        mut self,
        mut signals: UnboundedReceiver<WatchSignal>,
        mut commands: UnboundedReceiver<LoopCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("[WatchLoop] Starting");
        let paths = self.ctx.packages.read().paths();
        for path in paths {
            self.add_watch(Path::new(&path));
        }

        let mut deadline: Option<Instant> = None;
        loop {
            let armed = deadline;
            let timer = async move {
                match armed {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            let run_now = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(signal) = signals.recv() => {
                    match signal {
                        WatchSignal::Changed(paths) if self.is_own_output(&paths) => {
                            tracing::debug!("[WatchLoop] Ignoring pass output {:?}", paths);
                        }
                        WatchSignal::Changed(paths) => {
                            tracing::debug!("[WatchLoop] Change in {:?}, restarting quiet period", paths);
                            deadline = Some(Instant::now() + self.ctx.debounce);
                        }
                        WatchSignal::Error(e) => {
                            tracing::warn!("[WatchLoop] Watcher error: {}", e);
                        }
                    }
                    false
                }
                Some(command) = commands.recv() => {
                    match command {
                        LoopCommand::Watch(path) => {
                            self.add_watch(&path);
                            false
                        }
                        LoopCommand::Unwatch(path) => {
                            self.remove_watch(&path);
                            false
                        }
                        LoopCommand::Trigger => true,
                    }
                }
                _ = timer => {
                    deadline = None;
                    true
                }
            };
            if run_now && !self.pass(&mut shutdown).await {
                break;
            }
        }

        for path in std::mem::take(&mut self.temporary) {
            self.remove_watch(&path);
        }
        tracing::info!("[WatchLoop] Stopped");
    }

    /// Run one pass and publish its outcome. Returns false when stopped while publishing.
    async fn pass(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        for path in std::mem::take(&mut self.temporary) {
            self.remove_watch(&path);
        }

        let order = self.ctx.check_order.read().clone();
        let mut snapshot = self.ctx.packages.read().clone();
        let runner = self.ctx.runner.clone();
        let source = self.ctx.source_pattern.clone();
        let joined = spawn_blocking(move || {
            let dirs = snapshot.paths();
            let before = snapshot_dirs(&dirs);
            let outcome = run_pass(&order, &mut snapshot, runner.as_ref());
            let written = pass_output(&before, &snapshot_dirs(&dirs), &source);
            (order, snapshot, outcome, written)
        })
        .await;
        let (order, snapshot, outcome, written) = match joined {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("[WatchLoop] Check pass did not complete: {}", e);
                return true;
            }
        };

        if !written.is_empty() {
            tracing::debug!("[WatchLoop] Pass wrote {:?}", written);
            let until = Instant::now() + PASS_OUTPUT_GRACE;
            self.own_output.extend(written.into_iter().map(|path| (path, until)));
        }

        {
            let mut live = self.ctx.packages.write();
            for imp in order.iter() {
                if let (Some(done), Some(pkg)) = (snapshot.get(imp), live.get_mut(imp)) {
                    pkg.state = done.state;
                    pkg.last_output = done.last_output.clone();
                }
            }
        }

        if let PassOutcome::Failed {
            import_path,
            stage: Stage::Build,
            output,
        } = &outcome
        {
            if let Some(pkg) = snapshot.get(import_path) {
                for file in failing_files(&self.ctx.failure_marker, &pkg.path, output) {
                    if self.add_watch(&file) {
                        self.temporary.push(file);
                    }
                }
            }
        }

        let notification = Notification::from(&outcome);
        *self.ctx.last_outcome.lock() = Some(outcome);
        tokio::select! {
            delivered = self.ctx.publisher.publish(notification) => {
                tracing::debug!("[WatchLoop] Notified {} subscriber(s)", delivered);
                true
            }
            _ = shutdown.changed() => {
                tracing::info!("[WatchLoop] Stopped while waiting on a subscriber");
                false
            }
        }
    }
}
