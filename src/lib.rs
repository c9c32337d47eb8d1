//! # fixme
//!
//! An incremental build, test and lint watcher for Go workspaces.
//!
//! ## Overview
//!
//! A *project* is a named set of packages, each marked with an action: `watch`, `test` or
//! `lint`. While a project is running, any change inside one of its package directories starts
//! a *check pass* after a short quiet period. The pass walks the checked packages in dependency
//! order through three stages:
//!
//! 1. **build** every `test`/`lint` package
//! 2. **test** every `test`/`lint` package
//! 3. **lint** every `lint` package
//!
//! and stops at the first failure. Each pass ends with one notification: the failing package
//! with the tool output, or the all-clear. `watch` packages only trigger passes.
//!
//! ## Architecture
//!
//! - **[`package`]**: Actions, check states and the live [`package::PackageSet`]
//! - **[`discovery`]**: Finds packages under the source roots, by import path or by name
//! - **[`graph`]**: Import edges and the dependency-first check order (Kahn's algorithm)
//! - **[`pipeline`]**: The staged build → test → lint pass
//! - **[`watch`]**: The debounced watch loop, one per running project
//! - **[`project`]**: The orchestrator tying the above together
//! - **[`event`]**: Bounded notification streams
//! - **[`commands`]**: Session-level operations (find, set action, new/load/delete project)
//! - **[`config`]**: Configuration file and project persistence
//! - **[`toolchain`]**: Runs the external build, test, lint and import tools
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fixme::{config::FixmeConfig, discovery::PackageDiscovery, project::{Project, ProjectServices}};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), fixme::FixmeError> {
//!     let config = FixmeConfig::default();
//!     let discovery = Arc::new(PackageDiscovery::scan(&config.source_roots)?);
//!     let services = ProjectServices::from_config(&config, discovery.clone(), None)?;
//!
//!     let mut project = Project::new(services);
//!     if let Some(pkg) = discovery.by_import("example.com/app") {
//!         project.add_test(pkg)?;
//!     }
//!     project.resolve()?;
//!
//!     let mut updates = project.subscribe();
//!     project.start()?;
//!     while let Some(update) = updates.recv().await {
//!         println!("{:?}", update);
//!     }
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod graph;
pub mod package;
pub mod pipeline;
pub mod project;
#[cfg(test)]
mod tests;
pub mod toolchain;
pub mod watch;

pub use error::*;
