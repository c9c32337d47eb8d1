//! The staged build → test → lint gate.
//!
//! Each stage runs over the whole check order before the next stage starts, and the first
//! package to fail a stage ends the pass. Only that one failure is reported.
//!
//! Failure detection per stage:
//! - build: any output at all
//! - test: [`test_output_passed`] on the output text
//! - lint: any output (only packages with [`Action::Lint`] are linted)
//!
//! A step whose tool could not run ends the pass the same way, reported as
//! [`PassOutcome::ToolError`] rather than as a content failure.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use crate::{
    error::FixmeError,
    package::{Action, CheckState, PackageSet},
    toolchain::{CheckRunner, StepOutput},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Build,
    Test,
    Lint,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Build, Stage::Test, Stage::Lint];

    pub fn failed_state(&self) -> CheckState {
        match self {
            Stage::Build => CheckState::FailBuild,
            Stage::Test => CheckState::FailTest,
            Stage::Lint => CheckState::FailLint,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Stage::Build => write!(f, "build"),
            Stage::Test => write!(f, "test"),
            Stage::Lint => write!(f, "lint"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Passing,
    Failed {
        import_path: String,
        stage: Stage,
        output: String,
    },
    ToolError {
        import_path: String,
        stage: Stage,
        error: FixmeError,
    },
}

impl PassOutcome {
    pub fn is_passing(&self) -> bool {
        matches!(self, PassOutcome::Passing)
    }

    /// The package the pass stopped at, if any.
    pub fn import_path(&self) -> Option<&str> {
        match self {
            PassOutcome::Passing => None,
            PassOutcome::Failed { import_path, .. } | PassOutcome::ToolError { import_path, .. } => {
                Some(import_path)
            }
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            PassOutcome::Passing => None,
            PassOutcome::Failed { stage, .. } | PassOutcome::ToolError { stage, .. } => Some(*stage),
        }
    }
}

/// `go test` style success check: the third-from-last line must read `PASS`. Output with fewer
/// than three lines cannot carry the marker and counts as a failure.
pub fn test_output_passed(output: &str) -> bool {
    let lines: Vec<&str> = output.split('\n').collect();
    lines.len() >= 3 && lines[lines.len() - 3].trim() == "PASS"
}

/// The stage after which a package with `action` has nothing left to check.
fn final_stage(action: Action) -> Stage {
    match action {
        Action::Lint => Stage::Lint,
        _ => Stage::Test,
    }
}

fn step_failed(stage: Stage, output: &StepOutput) -> bool {
    match stage {
        Stage::Build | Stage::Lint => !output.is_empty(),
        Stage::Test => !test_output_passed(&output.text),
    }
}

/// Run one pass over `order`, updating package states in place.
///
/// Every package in the order starts the pass as [`CheckState::NotRun`]. A package becomes
/// [`CheckState::Passing`] as soon as it clears the last stage its action asks for (test for
/// `Test`, lint for `Lint`), so packages that finished before a later failure keep their
/// result. The failing package ends in the failed state of its stage, or
/// [`CheckState::ToolError`] when the tool could not run. Entries of `order` that are no longer
/// live `Test`/`Lint` packages are skipped.
pub fn run_pass(order: &[String], packages: &mut PackageSet, runner: &dyn CheckRunner) -> PassOutcome {
    for imp in order {
        if let Some(pkg) = packages.get_mut(imp) {
            pkg.state = CheckState::NotRun;
        }
    }

    let mut test_output: BTreeMap<String, String> = BTreeMap::new();
    for stage in Stage::ALL {
        tracing::debug!("[Pipeline] Starting {} stage over {} packages", stage, order.len());
        for imp in order {
            let Some(pkg) = packages.get(imp) else {
                tracing::debug!("[Pipeline] {} is no longer part of the project, skipping", imp);
                continue;
            };
            if !pkg.action.is_checked() {
                tracing::debug!("[Pipeline] {} is not checked ({}), skipping", imp, pkg.action);
                continue;
            }
            if stage == Stage::Lint && pkg.action != Action::Lint {
                continue;
            }

            let action = pkg.action;
            let result = match stage {
                Stage::Build => runner.build(pkg),
                Stage::Test => runner.test(pkg),
                Stage::Lint => runner.lint(pkg),
            };

            let outcome = match result {
                Ok(output) if step_failed(stage, &output) => PassOutcome::Failed {
                    import_path: imp.clone(),
                    stage,
                    output: output.text,
                },
                Ok(output) => {
                    if stage == Stage::Test {
                        test_output.insert(imp.clone(), output.text);
                    }
                    if stage == final_stage(action) {
                        if let Some(pkg) = packages.get_mut(imp) {
                            pkg.state = CheckState::Passing;
                            pkg.last_output = test_output.remove(imp).unwrap_or_default();
                        }
                    }
                    continue;
                }
                Err(error) => PassOutcome::ToolError {
                    import_path: imp.clone(),
                    stage,
                    error,
                },
            };

            if let Some(pkg) = packages.get_mut(imp) {
                pkg.state = match &outcome {
                    PassOutcome::ToolError { .. } => CheckState::ToolError,
                    _ => stage.failed_state(),
                };
                pkg.last_output = match &outcome {
                    PassOutcome::Failed { output, .. } => output.clone(),
                    PassOutcome::ToolError { error, .. } => error.to_string(),
                    PassOutcome::Passing => String::new(),
                };
            }
            tracing::info!("[Pipeline] {} failed the {} stage", imp, stage);
            return outcome;
        }
    }

    tracing::info!("[Pipeline] All {} packages passing", order.len());
    PassOutcome::Passing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        package::Package,
        tests::helpers::{FakeToolchain, PASSING_TEST_OUTPUT},
    };
    use test_log::test;

    fn packages(pkgs: &[(&str, Action)]) -> (PackageSet, Vec<String>) {
        let mut set = PackageSet::new();
        let mut order = Vec::new();
        for (imp, action) in pkgs {
            set.insert(Package::new(format!("/src/{imp}"), *imp, *action));
            order.push(imp.to_string());
        }
        (set, order)
    }

    #[test]
    fn test_output_heuristic() {
        assert!(test_output_passed("PASS\nok  \texample.com/a\t0.01s\n"));
        assert!(test_output_passed("=== RUN TestX\n  PASS  \nok\n"));
        assert!(!test_output_passed("FAIL\nexit status 1\nFAIL\texample.com/a\t0.01s\n"));
        // two lines cannot hold the marker
        assert!(!test_output_passed("ok  \texample.com/a\t0.01s\n"));
        assert!(!test_output_passed("PASS\nok"));
        assert!(!test_output_passed(""));
    }

    #[test]
    fn test_build_failure_stops_before_any_test() {
        let (mut set, order) = packages(&[("b", Action::Test), ("a", Action::Lint)]);
        let runner = FakeToolchain::new().fail(Stage::Build, "b", "./b.go:3:1: syntax error\n");

        let outcome = run_pass(&order, &mut set, &runner);

        assert_eq!(
            outcome,
            PassOutcome::Failed {
                import_path: "b".to_string(),
                stage: Stage::Build,
                output: "./b.go:3:1: syntax error\n".to_string(),
            }
        );
        assert_eq!(runner.calls(), vec![(Stage::Build, "b".to_string())]);
        assert_eq!(set.get("b").unwrap().state, CheckState::FailBuild);
        assert_eq!(set.get("a").unwrap().state, CheckState::NotRun);
    }

    #[test]
    fn test_every_build_runs_before_first_test() {
        let (mut set, order) = packages(&[("a", Action::Test), ("b", Action::Test)]);
        let runner = FakeToolchain::new().fail(Stage::Test, "b", "--- FAIL: TestB\nFAIL\nexit status 1\n");

        let outcome = run_pass(&order, &mut set, &runner);

        assert_eq!(outcome.stage(), Some(Stage::Test));
        assert_eq!(outcome.import_path(), Some("b"));
        assert_eq!(
            runner.calls(),
            vec![
                (Stage::Build, "a".to_string()),
                (Stage::Build, "b".to_string()),
                (Stage::Test, "a".to_string()),
                (Stage::Test, "b".to_string()),
            ]
        );
        assert_eq!(set.get("b").unwrap().state, CheckState::FailTest);
        assert_eq!(set.get("a").unwrap().state, CheckState::Passing);
    }

    #[test]
    fn test_lint_failure_after_all_tests_pass() {
        let (mut set, order) = packages(&[
            ("a", Action::Test),
            ("b", Action::Lint),
            ("c", Action::Lint),
        ]);
        let runner = FakeToolchain::new().fail(Stage::Lint, "c", "c.go:1:1: exported func should have comment\n");

        let outcome = run_pass(&order, &mut set, &runner);

        assert!(matches!(outcome, PassOutcome::Failed { stage: Stage::Lint, ref import_path, .. } if import_path == "c"));
        let calls = runner.calls();
        let tests: Vec<_> = calls.iter().filter(|(s, _)| *s == Stage::Test).collect();
        assert_eq!(tests.len(), 3);
        // lint is never invoked for Test-only packages
        assert!(!calls.contains(&(Stage::Lint, "a".to_string())));
        assert_eq!(calls.last(), Some(&(Stage::Lint, "c".to_string())));
        assert_eq!(set.get("c").unwrap().state, CheckState::FailLint);
        // a finished with its tests, b with its lint, before c failed
        assert_eq!(set.get("a").unwrap().state, CheckState::Passing);
        assert_eq!(set.get("a").unwrap().last_output, PASSING_TEST_OUTPUT);
        assert_eq!(set.get("b").unwrap().state, CheckState::Passing);
    }

    #[test]
    fn test_lint_package_is_not_passing_before_its_lint_runs() {
        let (mut set, order) = packages(&[("a", Action::Lint), ("b", Action::Test)]);
        let runner = FakeToolchain::new().fail(Stage::Test, "b", "--- FAIL: TestB\nFAIL\nexit status 1\n");

        run_pass(&order, &mut set, &runner);

        assert_eq!(set.get("a").unwrap().state, CheckState::NotRun);
        assert_eq!(set.get("b").unwrap().state, CheckState::FailTest);
    }

    #[test]
    fn test_two_line_test_output_fails_without_error() {
        let (mut set, order) = packages(&[("a", Action::Test)]);
        let runner = FakeToolchain::new().output(Stage::Test, "a", "ok  \ta\t0.01s\n");
        let outcome = run_pass(&order, &mut set, &runner);
        assert_eq!(outcome.stage(), Some(Stage::Test));
    }

    #[test]
    fn test_clean_pass_marks_everything_passing() {
        let (mut set, order) = packages(&[("a", Action::Test), ("b", Action::Lint)]);
        let runner = FakeToolchain::new();
        assert_eq!(run_pass(&order, &mut set, &runner), PassOutcome::Passing);
        for pkg in set.iter() {
            assert_eq!(pkg.state, CheckState::Passing);
            assert_eq!(pkg.last_output, PASSING_TEST_OUTPUT);
        }
    }

    #[test]
    fn test_tool_error_is_reported_separately() {
        let (mut set, order) = packages(&[("a", Action::Test), ("b", Action::Test)]);
        let runner = FakeToolchain::new().missing_tool(Stage::Build, "a");
        let outcome = run_pass(&order, &mut set, &runner);
        assert!(matches!(
            outcome,
            PassOutcome::ToolError { stage: Stage::Build, error: FixmeError::Toolchain { .. }, .. }
        ));
        assert_eq!(runner.calls().len(), 1);
        let a = set.get("a").unwrap();
        assert_eq!(a.state, CheckState::ToolError);
        assert!(a.last_output.contains("No such file or directory"));
        assert_eq!(set.get("b").unwrap().state, CheckState::NotRun);
    }

    #[test]
    fn test_stale_and_watch_entries_are_never_checked() {
        let (mut set, mut order) = packages(&[("a", Action::Test), ("w", Action::Watch)]);
        order.push("gone".to_string());
        let runner = FakeToolchain::new();
        assert!(run_pass(&order, &mut set, &runner).is_passing());
        assert!(runner.calls().iter().all(|(_, imp)| imp == "a"));
        assert_eq!(set.get("w").unwrap().state, CheckState::NotRun);
    }
}
