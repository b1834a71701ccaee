//! Test toolchain invocation and spec file persistence
//!
//! The only module allowed to write spec files. Wraps the Angular CLI test
//! runner (`npx ng test`) behind the `Toolchain` trait so the run loop can
//! be exercised with a deterministic fake.

use crate::lcov::{self, CoverageRecord, CoverageReport};
use crate::util::{resolve_spec_path, run_command_with_timeout, tail_chars};
use anyhow::{bail, Result};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

const OUTPUT_TAIL_MAX_CHARS: usize = 8_000;

/// Outcome of persisting a candidate and running the toolchain against it.
#[derive(Debug, Clone)]
pub enum Validation {
    /// Tests ran green. Carries the fresh record for the source file plus
    /// the whole re-parsed report: a scoped run can exercise files the spec
    /// imports, and their lifted records matter to the queue too.
    Pass {
        record: CoverageRecord,
        report: CoverageReport,
    },
    /// Compilation or test execution failed; diagnostic feeds the next prompt.
    Fail(String),
    /// The target spec file exists but was not authored by this tool; the
    /// file is skipped rather than clobbered.
    Refused(String),
    /// The toolchain itself cannot run. Fatal for the whole run.
    Broken(String),
}

/// Capability seam between the run loop and the build/test environment.
pub trait Toolchain {
    /// Persist `candidate` at `spec_rel` and run the toolchain scoped to
    /// that spec, reporting the fresh record for `source_rel`.
    fn validate(&self, source_rel: &str, spec_rel: &str, candidate: &str) -> Validation;

    /// Run a full coverage measurement and parse the resulting report.
    fn refresh_report(&self) -> Result<CoverageReport>;
}

/// Real toolchain: Angular CLI via npx, lcov output under `coverage/`.
pub struct NgToolchain {
    project_root: PathBuf,
    test_timeout: Duration,
}

impl NgToolchain {
    pub fn new(project_root: PathBuf, test_timeout: Duration) -> Self {
        Self {
            project_root,
            test_timeout,
        }
    }

    fn run_ng_test(&self, include: Option<&str>) -> Result<RunOutput, RunError> {
        let mut command = Command::new("npx");
        command
            .current_dir(&self.project_root)
            .args(ng_test_args(include));

        match run_command_with_timeout(&mut command, self.test_timeout) {
            Ok(result) => {
                let combined = format!("{}\n{}", result.stdout, result.stderr);
                let tail = tail_chars(&combined, OUTPUT_TAIL_MAX_CHARS);
                if result.timed_out {
                    return Ok(RunOutput {
                        passed: false,
                        output: format!(
                            "test run exceeded {}s timeout\n{}",
                            self.test_timeout.as_secs(),
                            tail
                        ),
                    });
                }
                let passed = result.status.map(|s| s.success()).unwrap_or(false);
                Ok(RunOutput {
                    passed,
                    output: tail,
                })
            }
            // Spawn failure means npx/node is missing, not that the tests
            // are wrong. Escalate instead of retrying.
            Err(spawn_error) => Err(RunError(spawn_error)),
        }
    }

    fn write_spec(&self, spec_rel: &str, candidate: &str) -> Result<(), Validation> {
        let resolved = resolve_spec_path(&self.project_root, std::path::Path::new(spec_rel))
            .map_err(Validation::Refused)?;

        if resolved.absolute.exists() {
            let existing = fs::read_to_string(&resolved.absolute)
                .map_err(|e| Validation::Broken(format!("cannot read existing spec: {}", e)))?;
            if !existing.trim().is_empty() && !existing.contains("describe(") {
                return Err(Validation::Refused(format!(
                    "{} exists but does not look like a spec file; refusing to overwrite",
                    resolved.relative.display()
                )));
            }
        }

        if let Some(parent) = resolved.absolute.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Validation::Broken(format!("cannot create spec directory: {}", e)))?;
        }
        fs::write(&resolved.absolute, candidate)
            .map_err(|e| Validation::Broken(format!("cannot write spec file: {}", e)))
    }
}

/// Arguments for one `npx ng test` invocation, optionally scoped to a
/// single spec so a validation run measures only the file under repair.
fn ng_test_args(include: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "ng".to_string(),
        "test".to_string(),
        "--watch=false".to_string(),
        "--code-coverage".to_string(),
    ];
    if let Some(spec) = include {
        args.push(format!("--include={}", spec));
    }
    args
}

struct RunOutput {
    passed: bool,
    output: String,
}

struct RunError(String);

impl Toolchain for NgToolchain {
    fn validate(&self, source_rel: &str, spec_rel: &str, candidate: &str) -> Validation {
        if let Err(outcome) = self.write_spec(spec_rel, candidate) {
            return outcome;
        }

        let run = match self.run_ng_test(Some(spec_rel)) {
            Ok(run) => run,
            Err(RunError(reason)) => return Validation::Broken(reason),
        };
        if !run.passed {
            return Validation::Fail(run.output);
        }

        // Pass/fail alone is not enough; the fresh record decides whether
        // the file actually cleared the bar.
        match lcov::load_report(&self.project_root) {
            Ok(report) => match report.get(source_rel).copied() {
                Some(record) => Validation::Pass { record, report },
                None => Validation::Fail(format!(
                    "test run passed but produced no coverage record for {}",
                    source_rel
                )),
            },
            Err(e) => Validation::Broken(format!("coverage report unreadable after run: {}", e)),
        }
    }

    fn refresh_report(&self) -> Result<CoverageReport> {
        // Coverage output is usually written even when some tests fail, so a
        // red full run is not fatal here; a missing or unreadable report is.
        match self.run_ng_test(None) {
            Ok(_) => {}
            Err(RunError(reason)) => bail!("test toolchain cannot be invoked: {}", reason),
        }
        lcov::load_report(&self.project_root)
    }
}
