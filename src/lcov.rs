//! lcov coverage report parsing
//!
//! Reads the `coverage/**/lcov.info` file the test toolchain emits and turns
//! it into per-file coverage facts. Tolerant by design: a garbled record is
//! skipped, not fatal. Only an input with no recognizable structure at all is
//! rejected, since that means the coverage run itself went wrong.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Per-file coverage counts from one measurement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoverageRecord {
    pub lines_covered: u64,
    pub lines_total: u64,
    pub branches_covered: u64,
    pub branches_total: u64,
}

impl CoverageRecord {
    /// Line coverage percentage. A file with no measurable lines counts as
    /// fully covered (generated barrels, pure type files).
    pub fn line_pct(&self) -> f64 {
        if self.lines_total == 0 {
            100.0
        } else {
            self.lines_covered as f64 / self.lines_total as f64 * 100.0
        }
    }

    /// Branch coverage percentage, 100 when the file has no branches.
    pub fn branch_pct(&self) -> f64 {
        if self.branches_total == 0 {
            100.0
        } else {
            self.branches_covered as f64 / self.branches_total as f64 * 100.0
        }
    }

    pub fn meets(&self, min_pct: f64) -> bool {
        self.line_pct() >= min_pct && self.branch_pct() >= min_pct
    }
}

/// Immutable snapshot of one coverage run, keyed by normalized
/// project-relative path. BTreeMap keeps iteration order stable so the
/// deficiency queue is reproducible.
pub type CoverageReport = BTreeMap<String, CoverageRecord>;

/// Whole-project totals, summed across every record in a report.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateCoverage {
    pub lines_covered: u64,
    pub lines_total: u64,
    pub branches_covered: u64,
    pub branches_total: u64,
}

impl AggregateCoverage {
    pub fn from_report(report: &CoverageReport) -> Self {
        let mut agg = Self::default();
        for record in report.values() {
            agg.lines_covered += record.lines_covered;
            agg.lines_total += record.lines_total;
            agg.branches_covered += record.branches_covered;
            agg.branches_total += record.branches_total;
        }
        agg
    }

    pub fn line_pct(&self) -> f64 {
        if self.lines_total == 0 {
            100.0
        } else {
            self.lines_covered as f64 / self.lines_total as f64 * 100.0
        }
    }

    pub fn branch_pct(&self) -> f64 {
        if self.branches_total == 0 {
            100.0
        } else {
            self.branches_covered as f64 / self.branches_total as f64 * 100.0
        }
    }
}

/// Normalize an lcov `SF:` path to project-relative form: forward slashes,
/// no leading `./`. Lookups after this point are exact-match.
pub fn normalize_path(raw: &str) -> String {
    let mut path = raw.trim().replace('\\', "/");
    while let Some(stripped) = path.strip_prefix("./") {
        path = stripped.to_string();
    }
    path
}

/// One in-flight lcov record while scanning line by line.
#[derive(Default)]
struct RecordBuilder {
    path: Option<String>,
    lines_covered: Option<u64>,
    lines_total: Option<u64>,
    branches_covered: Option<u64>,
    branches_total: Option<u64>,
    corrupt: bool,
}

impl RecordBuilder {
    fn finish(self) -> Option<(String, CoverageRecord)> {
        if self.corrupt {
            return None;
        }
        // LH/LF are mandatory; branch counters default to 0 when the
        // toolchain omits BRH/BRF for branchless files.
        let path = self.path?;
        let record = CoverageRecord {
            lines_covered: self.lines_covered?,
            lines_total: self.lines_total?,
            branches_covered: self.branches_covered.unwrap_or(0),
            branches_total: self.branches_total.unwrap_or(0),
        };
        Some((path, record))
    }
}

/// Parse lcov text into a report. Records that fail to parse are skipped;
/// the parse as a whole fails only when nothing recognizable was found.
pub fn parse(text: &str) -> Result<CoverageReport> {
    if text.trim().is_empty() {
        bail!("coverage report is empty");
    }

    let mut report = CoverageReport::new();
    let mut current = RecordBuilder::default();
    let mut saw_structure = false;

    for raw in text.lines() {
        let line = raw.trim();
        if let Some(rest) = line.strip_prefix("SF:") {
            saw_structure = true;
            current = RecordBuilder::default();
            let path = normalize_path(rest);
            if path.is_empty() {
                current.corrupt = true;
            } else {
                current.path = Some(path);
            }
        } else if let Some(rest) = line.strip_prefix("LH:") {
            parse_count(rest, &mut current.lines_covered, &mut current.corrupt);
        } else if let Some(rest) = line.strip_prefix("LF:") {
            parse_count(rest, &mut current.lines_total, &mut current.corrupt);
        } else if let Some(rest) = line.strip_prefix("BRH:") {
            parse_count(rest, &mut current.branches_covered, &mut current.corrupt);
        } else if let Some(rest) = line.strip_prefix("BRF:") {
            parse_count(rest, &mut current.branches_total, &mut current.corrupt);
        } else if line == "end_of_record" {
            saw_structure = true;
            if let Some((path, record)) = std::mem::take(&mut current).finish() {
                if record.lines_covered <= record.lines_total
                    && record.branches_covered <= record.branches_total
                {
                    report.insert(path, record);
                }
            }
        }
    }

    if !saw_structure {
        bail!("coverage report has no recognizable lcov records");
    }

    Ok(report)
}

fn parse_count(rest: &str, slot: &mut Option<u64>, corrupt: &mut bool) {
    match rest.trim().parse::<u64>() {
        Ok(n) => *slot = Some(n),
        Err(_) => *corrupt = true,
    }
}

/// Locate `lcov.info` under the project's `coverage/` directory. The Angular
/// CLI writes `coverage/<project>/lcov.info`, so prefer the deepest match.
pub fn find_lcov(project_root: &Path) -> Result<PathBuf> {
    let coverage_dir = project_root.join("coverage");
    let mut matches: Vec<PathBuf> = WalkDir::new(&coverage_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == "lcov.info")
        .map(|e| e.into_path())
        .collect();

    if matches.is_empty() {
        bail!(
            "no lcov.info found under {} (did the coverage run succeed?)",
            coverage_dir.display()
        );
    }
    matches.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    Ok(matches.remove(0))
}

/// Read and parse the project's current lcov report in one step.
pub fn load_report(project_root: &Path) -> Result<CoverageReport> {
    let lcov_path = find_lcov(project_root)?;
    let text = fs::read_to_string(&lcov_path)
        .with_context(|| format!("failed to read {}", lcov_path.display()))?;
    parse(&text).with_context(|| format!("failed to parse {}", lcov_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = "\
TN:
SF:src/app/foo.component.ts
LH:4
LF:10
BRH:1
BRF:4
end_of_record
SF:./src/app/bar.service.ts
LH:9
LF:9
end_of_record
";

    #[test]
    fn test_parse_basic_report() {
        let report = parse(SAMPLE).unwrap();
        assert_eq!(report.len(), 2);

        let foo = &report["src/app/foo.component.ts"];
        assert_eq!(foo.lines_covered, 4);
        assert_eq!(foo.lines_total, 10);
        assert!((foo.line_pct() - 40.0).abs() < 1e-9);
        assert!((foo.branch_pct() - 25.0).abs() < 1e-9);

        // Leading ./ stripped; missing BRH/BRF default to zero branches.
        let bar = &report["src/app/bar.service.ts"];
        assert_eq!(bar.branches_total, 0);
        assert!((bar.branch_pct() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_skips_malformed_record() {
        let text = "\
SF:src/app/ok.ts
LH:1
LF:2
end_of_record
SF:src/app/bad.ts
LH:not-a-number
LF:2
end_of_record
";
        let report = parse(text).unwrap();
        assert_eq!(report.len(), 1);
        assert!(report.contains_key("src/app/ok.ts"));
    }

    #[test]
    fn test_parse_skips_record_with_covered_above_total() {
        let text = "SF:src/app/odd.ts\nLH:5\nLF:2\nend_of_record\n";
        let report = parse(text).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert!(parse("").is_err());
        assert!(parse("   \n  ").is_err());
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse("this is not lcov at all\njust text\n").is_err());
    }

    #[test]
    fn test_zero_lines_total_reads_fully_covered() {
        let record = CoverageRecord::default();
        assert!((record.line_pct() - 100.0).abs() < 1e-9);
        assert!(record.meets(90.0));
    }

    #[test]
    fn test_aggregate_sums_records() {
        let report = parse(SAMPLE).unwrap();
        let agg = AggregateCoverage::from_report(&report);
        assert_eq!(agg.lines_covered, 13);
        assert_eq!(agg.lines_total, 19);
        assert_eq!(agg.branches_total, 4);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src/app/a.ts"), "src/app/a.ts");
        assert_eq!(normalize_path("src\\app\\a.ts"), "src/app/a.ts");
        assert_eq!(normalize_path("  src/a.ts  "), "src/a.ts");
    }

    #[test]
    fn test_find_lcov_prefers_deepest() {
        let dir = tempfile::tempdir().unwrap();
        let shallow = dir.path().join("coverage");
        let deep = shallow.join("demo-app");
        fs::create_dir_all(&deep).unwrap();
        fs::write(shallow.join("lcov.info"), SAMPLE).unwrap();
        fs::write(deep.join("lcov.info"), SAMPLE).unwrap();

        let found = find_lcov(dir.path()).unwrap();
        assert!(found.ends_with("coverage/demo-app/lcov.info"));
    }

    #[test]
    fn test_find_lcov_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_lcov(dir.path()).is_err());
    }
}
