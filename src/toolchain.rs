//! Collaborators that shell out to the host toolchain.
//!
//! [`CheckRunner`] runs the build, test and lint step for one package; [`ImportResolver`] lists a
//! package's direct imports. [`CommandToolchain`] implements both by running the commands named
//! in [`ToolchainConfig`] with the package directory as working directory.
//!
//! A step that ran returns `Ok` whatever its exit status: the pipeline judges the output. A step
//! whose tool could not be started returns [`FixmeError::Toolchain`].

use std::process::Command;

use crate::{config::ToolchainConfig, error::FixmeError, package::Package};

/// Combined stdout/stderr of a tool run, plus whether it exited successfully.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub text: String,
    pub success: bool,
}

impl StepOutput {
    pub fn new(text: impl Into<String>, success: bool) -> Self {
        StepOutput {
            text: text.into(),
            success,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

pub trait CheckRunner: Send + Sync {
    fn build(&self, pkg: &Package) -> Result<StepOutput, FixmeError>;
    fn test(&self, pkg: &Package) -> Result<StepOutput, FixmeError>;
    fn lint(&self, pkg: &Package) -> Result<StepOutput, FixmeError>;
}

pub trait ImportResolver: Send + Sync {
    fn imports(&self, pkg: &Package) -> Result<Vec<String>, FixmeError>;
}

#[derive(Debug, Clone, Default)]
pub struct CommandToolchain {
    config: ToolchainConfig,
}

impl CommandToolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        CommandToolchain { config }
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    fn run(&self, argv: &[String], pkg: &Package) -> Result<StepOutput, FixmeError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| FixmeError::Config("empty toolchain command".to_string()))?;
        tracing::debug!(
            "[Toolchain] Running {} {:?} in {}",
            program,
            args,
            pkg.path
        );
        let output = Command::new(program)
            .args(args)
            .current_dir(&pkg.path)
            .output()
            .map_err(|e| FixmeError::Toolchain {
                tool: program.clone(),
                message: e.to_string(),
            })?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(StepOutput::new(text, output.status.success()))
    }
}

impl CheckRunner for CommandToolchain {
    fn build(&self, pkg: &Package) -> Result<StepOutput, FixmeError> {
        self.run(&self.config.build, pkg)
    }

    fn test(&self, pkg: &Package) -> Result<StepOutput, FixmeError> {
        self.run(&self.config.test, pkg)
    }

    fn lint(&self, pkg: &Package) -> Result<StepOutput, FixmeError> {
        self.run(&self.config.lint, pkg)
    }
}

impl ImportResolver for CommandToolchain {
    fn imports(&self, pkg: &Package) -> Result<Vec<String>, FixmeError> {
        let output = self.run(&self.config.imports, pkg)?;
        if !output.success {
            return Err(FixmeError::ImportLookup {
                import_path: pkg.import_path.clone(),
                message: output.text.trim().to_string(),
            });
        }
        Ok(output
            .text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}
