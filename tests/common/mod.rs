//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use fixme::config::{FixmeConfig, ToolchainConfig};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; later calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

/// A toolchain of shell one-liners driven by files in each package directory:
///
/// - `imports.txt`: one import path per line
/// - `build.txt`: printed by the build step (absent means a clean build)
/// - `test.txt`: printed by the test step (absent means `PASS`)
/// - `lint.txt`: printed by the lint step
#[allow(dead_code)]
pub fn scripted_toolchain() -> ToolchainConfig {
    ToolchainConfig {
        build: sh("cat build.txt 2>/dev/null || true"),
        test: sh("if [ -f test.txt ]; then cat test.txt; else printf 'PASS\\nok\\n'; fi"),
        lint: sh("cat lint.txt 2>/dev/null || true"),
        imports: sh("cat imports.txt 2>/dev/null || true"),
        ..ToolchainConfig::default()
    }
}

/// Create a package directory under `src` with a source file and its imports.
#[allow(dead_code)]
pub fn create_package(src: &Path, import_path: &str, imports: &[&str]) -> PathBuf {
    let dir = src.join(import_path);
    std::fs::create_dir_all(&dir).unwrap();
    let name = import_path.rsplit('/').next().unwrap();
    std::fs::write(dir.join(format!("{name}.go")), format!("package {name}\n")).unwrap();
    std::fs::write(dir.join("imports.txt"), imports.join("\n")).unwrap();
    dir
}

/// Config rooted in `temp_dir`: sources under `src/`, projects in `projects.toml`.
#[allow(dead_code)]
pub fn test_config(temp_dir: &TempDir) -> FixmeConfig {
    let src = temp_dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    FixmeConfig {
        source_roots: vec![src],
        store_path: Some(temp_dir.path().join("projects.toml")),
        toolchain: scripted_toolchain(),
        ..FixmeConfig::default()
    }
}
