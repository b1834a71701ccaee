//! Deficiency selection: which files need test work, in what order
//!
//! Filters a coverage report against the configured threshold and produces
//! the ordered work queue. Ordering is deterministic (worst coverage first,
//! path as tiebreak) so reruns walk the same queue.

use crate::lcov::{CoverageRecord, CoverageReport};
use std::cmp::Ordering;
use std::path::Path;
use walkdir::WalkDir;

/// One queued unit of work: an under-covered file and its current facts.
#[derive(Debug, Clone, PartialEq)]
pub struct Deficiency {
    pub path: String,
    pub record: CoverageRecord,
    /// True when the file had no entry in the report at all (no spec exists
    /// yet, so the toolchain never measured it).
    pub unmeasured: bool,
}

impl Deficiency {
    /// The spec file path this deficiency's generated tests belong in.
    pub fn spec_path(&self) -> String {
        match self.path.strip_suffix(".ts") {
            Some(stem) => format!("{}.spec.ts", stem),
            None => format!("{}.spec.ts", self.path),
        }
    }
}

/// A source file qualifies as a coverage target: under `src/`, TypeScript,
/// not itself a spec, not entry-point boilerplate.
pub fn is_coverage_target(path: &str) -> bool {
    if !path.starts_with("src/") {
        return false;
    }
    if !path.ends_with(".ts") || path.ends_with(".spec.ts") {
        return false;
    }
    if path.ends_with("/main.ts") || path.ends_with("/test.ts") {
        return false;
    }
    true
}

/// Walk the project tree and list coverage-target sources, project-relative
/// with forward slashes. Used to synthesize deficiencies for files the
/// report never mentions.
pub fn discover_sources(project_root: &Path) -> Vec<String> {
    let src_dir = project_root.join("src");
    let mut sources: Vec<String> = WalkDir::new(&src_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(project_root).ok()?;
            let rel = rel.to_string_lossy().replace('\\', "/");
            is_coverage_target(&rel).then_some(rel)
        })
        .collect();
    sources.sort();
    sources
}

/// Select the ordered deficiency queue: every coverage target whose line or
/// branch percentage is below `min_pct`, plus every discovered source the
/// report has no entry for (treated as 0% covered).
///
/// Identical report + threshold + sources always yields the identical list.
pub fn select(report: &CoverageReport, min_pct: f64, sources: &[String]) -> Vec<Deficiency> {
    let mut out: Vec<Deficiency> = Vec::new();

    for (path, record) in report {
        if !is_coverage_target(path) {
            continue;
        }
        if record.line_pct() < min_pct || record.branch_pct() < min_pct {
            out.push(Deficiency {
                path: path.clone(),
                record: *record,
                unmeasured: false,
            });
        }
    }

    for path in sources {
        if !report.contains_key(path) {
            // A missing spec is the degenerate case of a fully under-covered
            // file: 0 of 1 lines, so it sorts to the front of the queue.
            out.push(Deficiency {
                path: path.clone(),
                record: CoverageRecord {
                    lines_covered: 0,
                    lines_total: 1,
                    branches_covered: 0,
                    branches_total: 0,
                },
                unmeasured: true,
            });
        }
    }

    out.sort_by(|a, b| {
        cmp_pct(a.record.line_pct(), b.record.line_pct())
            .then(cmp_pct(a.record.branch_pct(), b.record.branch_pct()))
            .then_with(|| a.path.cmp(&b.path))
    });
    out
}

fn cmp_pct(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}
