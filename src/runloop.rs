//! The coverage-gated synthesis loop
//!
//! Owns every piece of mutable run state: queue position, per-file attempt
//! counters, the running result accumulator. One file at a time, one attempt
//! at a time; the only suspension points are the model call and the
//! toolchain run, and nothing proceeds until each resolves or times out.
//!
//! Per-file lifecycle: Pending -> Attempting -> Fixed | Abandoned. A green
//! test run is necessary but not sufficient — the fresh coverage record must
//! also clear the threshold, otherwise the attempt counts as a failure and
//! the shortfall is fed back into the next prompt.

use crate::candidate;
use crate::deficiency::{discover_sources, select, Deficiency};
use crate::lcov::{AggregateCoverage, CoverageReport};
use crate::ollama::{GenerationError, Generator};
use crate::prompt::{build_prompt, PromptRequest, SPEC_SYSTEM};
use crate::toolchain::{Toolchain, Validation};
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tunable budgets and thresholds for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Minimum line AND branch percentage a file must reach.
    pub min_pct: f64,
    /// Total attempts allowed across the whole run.
    pub max_iters: u32,
    /// Attempts allowed for a single file before it is abandoned.
    pub retries_per_file: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            min_pct: 90.0,
            max_iters: 10,
            retries_per_file: 3,
        }
    }
}

/// Terminal state of one queued file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// Cleared the threshold after `attempts` synthesis attempts.
    Fixed { attempts: u32 },
    /// Already over the threshold when revisited; no attempt spent.
    AlreadyCovered,
    /// Given up on, with the reason a reader needs.
    Abandoned { reason: String, attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: String,
    pub outcome: FileOutcome,
}

/// How the run as a whole ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Every originally deficient file ended Fixed or AlreadyCovered.
    Success,
    /// At least one file was abandoned; coverage goal not met.
    Shortfall,
    /// The toolchain broke mid-run; remaining work was not attempted.
    Fatal(String),
}

#[derive(Debug)]
pub struct RunResult {
    pub files: Vec<FileReport>,
    pub attempts_used: u32,
    pub aggregate_before: AggregateCoverage,
    pub aggregate_after: Option<AggregateCoverage>,
    pub status: RunStatus,
}

impl RunResult {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success => 0,
            RunStatus::Shortfall => 1,
            RunStatus::Fatal(_) => 2,
        }
    }
}

/// Owned run context passed through every transition; no ambient state.
pub struct RunContext {
    pub project_root: PathBuf,
    pub config: RunConfig,
    /// Flipped by ctrl-c; checked before each new attempt so an interrupt
    /// never kills an in-flight toolchain run or rolls back written specs.
    pub interrupted: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(project_root: PathBuf, config: RunConfig) -> Self {
        Self {
            project_root,
            config,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }
}

/// What one synthesis attempt concluded.
enum AttemptVerdict {
    Cleared,
    Retry(String),
    GiveUp(String),
    FatalToolchain(String),
}

/// Drive the full run: measure, queue, synthesize, validate, repeat.
///
/// Errors returned here are pre-run fatal (report unreadable before any
/// attempt); everything after the queue starts is captured in `RunResult`.
pub async fn run<G: Generator, T: Toolchain>(
    ctx: &RunContext,
    generator: &G,
    toolchain: &T,
) -> Result<RunResult> {
    let report = toolchain
        .refresh_report()
        .context("initial coverage measurement failed")?;
    let aggregate_before = AggregateCoverage::from_report(&report);

    let sources = discover_sources(&ctx.project_root);
    let queue = select(&report, ctx.config.min_pct, &sources);

    eprintln!(
        "  {} file(s) below {:.0}% (line or branch)",
        queue.len(),
        ctx.config.min_pct
    );

    let mut result = RunResult {
        files: Vec::new(),
        attempts_used: 0,
        aggregate_before,
        aggregate_after: None,
        status: RunStatus::Success,
    };

    // Coverage facts as of the latest measurement, updated in place as
    // scoped validation runs return fresh records.
    let mut latest = report;
    let mut fatal: Option<String> = None;

    for (position, deficiency) in queue.iter().enumerate() {
        if let Some(reason) = &fatal {
            result.files.push(FileReport {
                path: deficiency.path.clone(),
                outcome: FileOutcome::Abandoned {
                    reason: format!("run aborted: {}", reason),
                    attempts: 0,
                },
            });
            continue;
        }
        if ctx.is_interrupted() {
            result.files.push(FileReport {
                path: deficiency.path.clone(),
                outcome: FileOutcome::Abandoned {
                    reason: "interrupted".to_string(),
                    attempts: 0,
                },
            });
            continue;
        }

        eprintln!(
            "\n=== File {}/{}: {} | lines {:.2}% | branches {:.2}% ===",
            position + 1,
            queue.len(),
            deficiency.path,
            deficiency.record.line_pct(),
            deficiency.record.branch_pct()
        );

        // A scoped run for an earlier file can lift this one over the bar
        // when the toolchain batches their coverage together.
        if let Some(record) = latest.get(&deficiency.path) {
            if record.meets(ctx.config.min_pct) {
                eprintln!("  already above threshold, skipping");
                result.files.push(FileReport {
                    path: deficiency.path.clone(),
                    outcome: FileOutcome::AlreadyCovered,
                });
                continue;
            }
        }

        let outcome =
            attempt_file(ctx, generator, toolchain, deficiency, &mut result, &mut latest).await;
        if let FileOutcome::Abandoned { reason, .. } = &outcome {
            if let Some(broken) = reason.strip_prefix("toolchain broken: ") {
                fatal = Some(broken.to_string());
            }
        }
        result.files.push(FileReport {
            path: deficiency.path.clone(),
            outcome,
        });
    }

    if let Some(reason) = fatal {
        result.status = RunStatus::Fatal(reason);
        return Ok(result);
    }

    // Coverage can only change through test execution, so the final number
    // is re-measured, never inferred from per-file deltas.
    match toolchain.refresh_report() {
        Ok(fresh) => {
            result.aggregate_after = Some(AggregateCoverage::from_report(&fresh));
        }
        Err(e) => {
            result.status = RunStatus::Fatal(format!("final coverage measurement failed: {}", e));
            return Ok(result);
        }
    }

    let any_abandoned = result
        .files
        .iter()
        .any(|f| matches!(f.outcome, FileOutcome::Abandoned { .. }));
    result.status = if any_abandoned {
        RunStatus::Shortfall
    } else {
        RunStatus::Success
    };
    Ok(result)
}

/// Retry loop for a single file. Every pass through the loop consumes one
/// attempt from both the per-file and the global budget — there are no
/// silent no-op retries.
async fn attempt_file<G: Generator, T: Toolchain>(
    ctx: &RunContext,
    generator: &G,
    toolchain: &T,
    deficiency: &Deficiency,
    result: &mut RunResult,
    latest: &mut CoverageReport,
) -> FileOutcome {
    let source_abs = ctx.project_root.join(&deficiency.path);
    let source_text = match fs::read_to_string(&source_abs) {
        Ok(text) => text,
        Err(e) => {
            // Stale report entry; nothing to generate against.
            return FileOutcome::Abandoned {
                reason: format!("source not found on disk: {}", e),
                attempts: 0,
            };
        }
    };
    let spec_rel = deficiency.spec_path();
    let spec_abs = ctx.project_root.join(&spec_rel);

    let mut feedback = String::new();
    let mut attempts_here: u32 = 0;

    loop {
        if result.attempts_used >= ctx.config.max_iters {
            return FileOutcome::Abandoned {
                reason: "run iteration budget exhausted".to_string(),
                attempts: attempts_here,
            };
        }
        if attempts_here >= ctx.config.retries_per_file {
            return FileOutcome::Abandoned {
                reason: format!(
                    "retry budget exhausted after {} attempts; last failure: {}",
                    attempts_here,
                    crate::util::truncate(&feedback, 300)
                ),
                attempts: attempts_here,
            };
        }
        if ctx.is_interrupted() {
            return FileOutcome::Abandoned {
                reason: "interrupted".to_string(),
                attempts: attempts_here,
            };
        }

        attempts_here += 1;
        result.attempts_used += 1;
        eprintln!(
            "  attempt {}/{} (run total {}/{})",
            attempts_here, ctx.config.retries_per_file, result.attempts_used, ctx.config.max_iters
        );

        // The spec is re-read every attempt: the previous attempt rewrote it.
        let spec_text = fs::read_to_string(&spec_abs).unwrap_or_default();
        let record = latest
            .get(&deficiency.path)
            .copied()
            .unwrap_or(deficiency.record);

        let prompt = build_prompt(&PromptRequest {
            source_path: &deficiency.path,
            source_text: &source_text,
            spec_path: &spec_rel,
            spec_text: &spec_text,
            min_pct: ctx.config.min_pct,
            line_pct: record.line_pct(),
            branch_pct: record.branch_pct(),
            attempt: attempts_here,
            feedback: &feedback,
        });

        let verdict = run_attempt(
            generator,
            toolchain,
            &deficiency.path,
            &spec_rel,
            &prompt,
            ctx.config.min_pct,
            latest,
        )
        .await;

        match verdict {
            AttemptVerdict::Cleared => {
                eprintln!("  fixed after {} attempt(s)", attempts_here);
                return FileOutcome::Fixed {
                    attempts: attempts_here,
                };
            }
            AttemptVerdict::Retry(diagnostic) => {
                eprintln!("  attempt failed: {}", crate::util::truncate(&diagnostic, 160));
                feedback = diagnostic;
            }
            AttemptVerdict::GiveUp(reason) => {
                return FileOutcome::Abandoned {
                    reason,
                    attempts: attempts_here,
                };
            }
            AttemptVerdict::FatalToolchain(reason) => {
                return FileOutcome::Abandoned {
                    reason: format!("toolchain broken: {}", reason),
                    attempts: attempts_here,
                };
            }
        }
    }
}

/// One generate -> clean -> validate pass.
async fn run_attempt<G: Generator, T: Toolchain>(
    generator: &G,
    toolchain: &T,
    source_rel: &str,
    spec_rel: &str,
    prompt: &str,
    min_pct: f64,
    latest: &mut CoverageReport,
) -> AttemptVerdict {
    let raw = match generator.generate(SPEC_SYSTEM, prompt).await {
        Ok(raw) => raw,
        Err(e @ GenerationError::Unavailable(_)) => return AttemptVerdict::Retry(e.to_string()),
        Err(e @ GenerationError::Empty) => return AttemptVerdict::Retry(e.to_string()),
    };

    // A malformed candidate short-circuits to retry without a toolchain run.
    let cleaned = match candidate::clean(&raw) {
        Ok(cleaned) => cleaned,
        Err(reason) => {
            return AttemptVerdict::Retry(format!(
                "your previous output was rejected before it could run: {}",
                reason
            ))
        }
    };

    match toolchain.validate(source_rel, spec_rel, &cleaned) {
        Validation::Pass { record, report } => {
            // Merge the whole re-parsed report, not just this file's record:
            // the scoped run may have lifted files still waiting in the
            // queue, and they should skip their attempt when revisited.
            latest.extend(report);
            if record.meets(min_pct) {
                AttemptVerdict::Cleared
            } else {
                // Green but still short: same budget as any other failure.
                AttemptVerdict::Retry(format!(
                    "tests passed but coverage is still below the bar: \
                     lines {:.2}%, branches {:.2}%, required {:.0}%. \
                     Add tests for the uncovered lines and branches.",
                    record.line_pct(),
                    record.branch_pct(),
                    min_pct
                ))
            }
        }
        Validation::Fail(diagnostic) => AttemptVerdict::Retry(diagnostic),
        Validation::Refused(reason) => AttemptVerdict::GiveUp(reason),
        Validation::Broken(reason) => AttemptVerdict::FatalToolchain(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcov::{parse, CoverageRecord};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const GOOD_SPEC: &str = "\
import { TestBed } from '@angular/core/testing';
describe('Foo', () => {
  it('works', () => {
    expect(1).toBe(1);
  });
});";

    struct FakeGenerator {
        responses: Mutex<VecDeque<Result<String, GenerationError>>>,
        prompts_seen: Mutex<Vec<String>>,
    }

    impl FakeGenerator {
        fn with(responses: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts_seen: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts_seen.lock().unwrap().clone()
        }
    }

    impl Generator for FakeGenerator {
        async fn generate(&self, _system: &str, prompt: &str) -> Result<String, GenerationError> {
            self.prompts_seen.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(GenerationError::Empty))
        }
    }

    struct FakeToolchain {
        report: CoverageReport,
        validations: Mutex<VecDeque<Validation>>,
        validate_calls: Mutex<Vec<String>>,
    }

    impl FakeToolchain {
        fn new(report: CoverageReport, validations: Vec<Validation>) -> Self {
            Self {
                report,
                validations: Mutex::new(validations.into()),
                validate_calls: Mutex::new(Vec::new()),
            }
        }

        fn validated_specs(&self) -> Vec<String> {
            self.validate_calls.lock().unwrap().clone()
        }
    }

    impl Toolchain for FakeToolchain {
        fn validate(&self, _source_rel: &str, spec_rel: &str, _candidate: &str) -> Validation {
            self.validate_calls.lock().unwrap().push(spec_rel.to_string());
            self.validations
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Validation::Fail("no scripted outcome".to_string()))
        }

        fn refresh_report(&self) -> Result<CoverageReport> {
            Ok(self.report.clone())
        }
    }

    fn passing_record() -> CoverageRecord {
        CoverageRecord {
            lines_covered: 95,
            lines_total: 100,
            branches_covered: 19,
            branches_total: 20,
        }
    }

    /// A green validation whose re-parsed report covers exactly the given
    /// files; the first entry is the file under validation.
    fn pass_for(files: &[(&str, CoverageRecord)]) -> Validation {
        let mut report = CoverageReport::new();
        for (path, record) in files {
            report.insert(path.to_string(), *record);
        }
        Validation::Pass {
            record: files[0].1,
            report,
        }
    }

    /// A project tree with one under-covered source file.
    fn fixture(files: &[(&str, &str)]) -> (tempfile::TempDir, RunContext) {
        let dir = tempfile::tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let ctx = RunContext::new(dir.path().to_path_buf(), RunConfig::default());
        (dir, ctx)
    }

    fn low_coverage_report(path: &str) -> CoverageReport {
        parse(&format!(
            "SF:{}\nLH:4\nLF:10\nBRH:1\nBRF:4\nend_of_record\n",
            path
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_single_file_fixed_on_first_attempt() {
        let (_dir, ctx) = fixture(&[("src/app/foo.ts", "export class Foo {}")]);
        let generator = FakeGenerator::with(vec![Ok(GOOD_SPEC.to_string())]);
        let toolchain = FakeToolchain::new(
            low_coverage_report("src/app/foo.ts"),
            vec![pass_for(&[("src/app/foo.ts", passing_record())])],
        );

        let result = run(&ctx, &generator, &toolchain).await.unwrap();
        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.attempts_used, 1);
        assert_eq!(
            result.files[0].outcome,
            FileOutcome::Fixed { attempts: 1 }
        );
        assert_eq!(toolchain.validated_specs(), vec!["src/app/foo.spec.ts"]);
    }

    #[tokio::test]
    async fn test_file_lifted_by_earlier_run_skips_attempt() {
        // a.ts's spec also exercises b.ts, so validating a.ts returns a
        // report in which both files clear the bar. When b.ts is revisited
        // it must not spend an attempt or a generator call.
        let (_dir, ctx) = fixture(&[
            ("src/app/a.ts", "export class A {}"),
            ("src/app/b.ts", "export class B {}"),
        ]);
        let report = parse(
            "SF:src/app/a.ts\nLH:1\nLF:10\nend_of_record\n\
             SF:src/app/b.ts\nLH:2\nLF:10\nend_of_record\n",
        )
        .unwrap();
        let generator = FakeGenerator::with(vec![Ok(GOOD_SPEC.to_string())]);
        let toolchain = FakeToolchain::new(
            report,
            vec![pass_for(&[
                ("src/app/a.ts", passing_record()),
                ("src/app/b.ts", passing_record()),
            ])],
        );

        let result = run(&ctx, &generator, &toolchain).await.unwrap();
        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.attempts_used, 1);
        assert_eq!(generator.prompts().len(), 1);
        assert_eq!(result.files[0].outcome, FileOutcome::Fixed { attempts: 1 });
        assert_eq!(result.files[1].outcome, FileOutcome::AlreadyCovered);
    }

    #[tokio::test]
    async fn test_three_failures_abandon_with_feedback_threading() {
        let (_dir, ctx) = fixture(&[("src/app/baz.ts", "export class Baz {}")]);
        let generator = FakeGenerator::with(vec![
            Ok(GOOD_SPEC.to_string()),
            Ok(GOOD_SPEC.to_string()),
            Ok(GOOD_SPEC.to_string()),
        ]);
        let toolchain = FakeToolchain::new(
            low_coverage_report("src/app/baz.ts"),
            vec![
                Validation::Fail("first failure: Baz is not defined".to_string()),
                Validation::Fail("second failure: expected 2 to be 3".to_string()),
                Validation::Fail("third failure".to_string()),
            ],
        );

        let result = run(&ctx, &generator, &toolchain).await.unwrap();
        assert_eq!(result.status, RunStatus::Shortfall);
        assert_ne!(result.exit_code(), 0);
        assert!(matches!(
            result.files[0].outcome,
            FileOutcome::Abandoned { attempts: 3, .. }
        ));

        // The diagnostic from attempt 2 appears verbatim in attempt 3's prompt.
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(!prompts[0].contains("PREVIOUS ATTEMPT FAILED"));
        assert!(prompts[1].contains("first failure: Baz is not defined"));
        assert!(prompts[2].contains("second failure: expected 2 to be 3"));
    }

    #[tokio::test]
    async fn test_global_cap_abandons_second_file_unattempted() {
        let (_dir, mut ctx) = fixture(&[
            ("src/app/a.ts", "export class A {}"),
            ("src/app/b.ts", "export class B {}"),
        ]);
        ctx.config.max_iters = 1;

        let report = parse(
            "SF:src/app/a.ts\nLH:1\nLF:10\nend_of_record\n\
             SF:src/app/b.ts\nLH:2\nLF:10\nend_of_record\n",
        )
        .unwrap();
        let generator = FakeGenerator::with(vec![Ok(GOOD_SPEC.to_string())]);
        let toolchain =
            FakeToolchain::new(report, vec![pass_for(&[("src/app/a.ts", passing_record())])]);

        let result = run(&ctx, &generator, &toolchain).await.unwrap();
        assert_eq!(result.attempts_used, 1);
        assert_eq!(result.files.len(), 2);
        assert_eq!(result.files[0].outcome, FileOutcome::Fixed { attempts: 1 });
        match &result.files[1].outcome {
            FileOutcome::Abandoned { reason, attempts } => {
                assert_eq!(*attempts, 0);
                assert!(reason.contains("iteration budget"));
            }
            other => panic!("expected abandoned, got {:?}", other),
        }
        assert_ne!(result.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_pass_below_threshold_retries_with_shortfall_feedback() {
        let (_dir, ctx) = fixture(&[("src/app/foo.ts", "export class Foo {}")]);
        let weak = CoverageRecord {
            lines_covered: 6,
            lines_total: 10,
            branches_covered: 1,
            branches_total: 4,
        };
        let generator = FakeGenerator::with(vec![
            Ok(GOOD_SPEC.to_string()),
            Ok(GOOD_SPEC.to_string()),
        ]);
        let toolchain = FakeToolchain::new(
            low_coverage_report("src/app/foo.ts"),
            vec![
                pass_for(&[("src/app/foo.ts", weak)]),
                pass_for(&[("src/app/foo.ts", passing_record())]),
            ],
        );

        let result = run(&ctx, &generator, &toolchain).await.unwrap();
        assert_eq!(result.files[0].outcome, FileOutcome::Fixed { attempts: 2 });

        let prompts = generator.prompts();
        assert!(prompts[1].contains("tests passed but coverage is still below"));
        assert!(prompts[1].contains("60.00%"));
    }

    #[tokio::test]
    async fn test_generation_failures_consume_attempts() {
        let (_dir, ctx) = fixture(&[("src/app/foo.ts", "export class Foo {}")]);
        let generator = FakeGenerator::with(vec![
            Err(GenerationError::Unavailable("connection refused".to_string())),
            Err(GenerationError::Empty),
            Err(GenerationError::Unavailable("connection refused".to_string())),
        ]);
        let toolchain = FakeToolchain::new(low_coverage_report("src/app/foo.ts"), vec![]);

        let result = run(&ctx, &generator, &toolchain).await.unwrap();
        // Identical inputs each time, but the counter still advanced.
        assert_eq!(result.attempts_used, 3);
        assert!(matches!(
            result.files[0].outcome,
            FileOutcome::Abandoned { attempts: 3, .. }
        ));
        // Validator never ran: every candidate failed before it.
        assert!(toolchain.validated_specs().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_candidate_skips_validator() {
        let (_dir, ctx) = fixture(&[("src/app/foo.ts", "export class Foo {}")]);
        let generator = FakeGenerator::with(vec![
            Ok("I'm sorry, I cannot write tests today.".to_string()),
            Ok(GOOD_SPEC.to_string()),
        ]);
        let toolchain = FakeToolchain::new(
            low_coverage_report("src/app/foo.ts"),
            vec![pass_for(&[("src/app/foo.ts", passing_record())])],
        );

        let result = run(&ctx, &generator, &toolchain).await.unwrap();
        assert_eq!(result.files[0].outcome, FileOutcome::Fixed { attempts: 2 });
        // Only the second attempt reached the toolchain.
        assert_eq!(toolchain.validated_specs().len(), 1);

        let prompts = generator.prompts();
        assert!(prompts[1].contains("rejected before it could run"));
    }

    #[tokio::test]
    async fn test_broken_toolchain_aborts_remaining_files() {
        let (_dir, ctx) = fixture(&[
            ("src/app/a.ts", "export class A {}"),
            ("src/app/b.ts", "export class B {}"),
        ]);
        let report = parse(
            "SF:src/app/a.ts\nLH:1\nLF:10\nend_of_record\n\
             SF:src/app/b.ts\nLH:2\nLF:10\nend_of_record\n",
        )
        .unwrap();
        let generator = FakeGenerator::with(vec![Ok(GOOD_SPEC.to_string())]);
        let toolchain = FakeToolchain::new(
            report,
            vec![Validation::Broken("npx not found".to_string())],
        );

        let result = run(&ctx, &generator, &toolchain).await.unwrap();
        assert!(matches!(result.status, RunStatus::Fatal(_)));
        assert_eq!(result.exit_code(), 2);
        assert_eq!(result.files.len(), 2);
        match &result.files[1].outcome {
            FileOutcome::Abandoned { reason, .. } => assert!(reason.contains("run aborted")),
            other => panic!("expected abandoned, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refused_spec_abandons_without_retry() {
        let (_dir, ctx) = fixture(&[("src/app/foo.ts", "export class Foo {}")]);
        let generator = FakeGenerator::with(vec![Ok(GOOD_SPEC.to_string())]);
        let toolchain = FakeToolchain::new(
            low_coverage_report("src/app/foo.ts"),
            vec![Validation::Refused("foreign spec file".to_string())],
        );

        let result = run(&ctx, &generator, &toolchain).await.unwrap();
        assert!(matches!(
            result.files[0].outcome,
            FileOutcome::Abandoned { attempts: 1, .. }
        ));
        // One attempt, not the full retry budget.
        assert_eq!(result.attempts_used, 1);
    }

    #[tokio::test]
    async fn test_missing_source_synthesized_and_attempted() {
        // bar.ts exists on disk but has no entry in the report.
        let (_dir, ctx) = fixture(&[("src/app/bar.ts", "export class Bar {}")]);
        let report = parse("SF:src/app/other.ts\nLH:10\nLF:10\nend_of_record\n").unwrap();
        let generator = FakeGenerator::with(vec![Ok(GOOD_SPEC.to_string())]);
        let toolchain =
            FakeToolchain::new(report, vec![pass_for(&[("src/app/bar.ts", passing_record())])]);

        let result = run(&ctx, &generator, &toolchain).await.unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].path, "src/app/bar.ts");
        assert_eq!(result.files[0].outcome, FileOutcome::Fixed { attempts: 1 });

        // The synthesized 0% record shows up in the prompt context.
        let prompts = generator.prompts();
        assert!(prompts[0].contains("lines=0.00%"));
    }

    #[tokio::test]
    async fn test_interrupt_stops_before_next_attempt() {
        let (_dir, ctx) = fixture(&[
            ("src/app/a.ts", "export class A {}"),
            ("src/app/b.ts", "export class B {}"),
        ]);
        let report = parse(
            "SF:src/app/a.ts\nLH:1\nLF:10\nend_of_record\n\
             SF:src/app/b.ts\nLH:2\nLF:10\nend_of_record\n",
        )
        .unwrap();
        ctx.interrupted.store(true, Ordering::Relaxed);

        let generator = FakeGenerator::with(vec![]);
        let toolchain = FakeToolchain::new(report, vec![]);

        let result = run(&ctx, &generator, &toolchain).await.unwrap();
        assert_eq!(result.attempts_used, 0);
        assert!(result
            .files
            .iter()
            .all(|f| matches!(&f.outcome, FileOutcome::Abandoned { reason, .. } if reason == "interrupted")));
    }

    #[tokio::test]
    async fn test_clean_report_yields_success_without_attempts() {
        let (_dir, ctx) = fixture(&[("src/app/foo.ts", "export class Foo {}")]);
        let report = parse("SF:src/app/foo.ts\nLH:10\nLF:10\nBRH:4\nBRF:4\nend_of_record\n").unwrap();
        let generator = FakeGenerator::with(vec![]);
        let toolchain = FakeToolchain::new(report, vec![]);

        let result = run(&ctx, &generator, &toolchain).await.unwrap();
        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.attempts_used, 0);
        assert!(result.files.is_empty());
    }
}
