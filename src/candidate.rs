//! Candidate post-processing
//!
//! Deterministic textual cleanup applied to raw model output before it is
//! treated as a spec file. Pure functions over text; nothing here executes
//! or touches disk. A candidate that fails the structural sanity gate is
//! rejected so the run loop can retry without wasting a toolchain run.

use regex::Regex;
use std::sync::OnceLock;

/// Lines that plausibly begin TypeScript rather than chat prose.
fn looks_like_code(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("import ")
        || trimmed.starts_with("describe(")
        || trimmed.starts_with("//")
        || trimmed.starts_with("/*")
        || trimmed.starts_with("const ")
        || trimmed.starts_with("let ")
        || trimmed.starts_with("@")
        || trimmed.starts_with("export ")
}

/// Extract the fenced code block when the model wrapped its answer in
/// markdown, otherwise return the input unchanged.
fn extract_code_block(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    // Skip the fence line itself (``` or ```typescript).
    let after_open = &trimmed[open + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    match body.rfind("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Drop chat preamble lines ("Sure, here's the updated spec:") that appear
/// before the first code-looking line.
fn strip_leading_prose(text: &str) -> String {
    let mut lines = text.lines().peekable();
    let mut skipped: Vec<&str> = Vec::new();
    while let Some(line) = lines.peek() {
        if line.trim().is_empty() || !looks_like_code(line) {
            skipped.push(lines.next().unwrap_or_default());
        } else {
            break;
        }
    }
    let rest: Vec<&str> = lines.collect();
    if rest.is_empty() {
        // Nothing looked like code; leave the text alone and let the sanity
        // gate decide.
        return skipped.join("\n");
    }
    rest.join("\n")
}

/// Drop trailing chat sign-off lines ("Let me know if you need more tests").
/// A trailing line with no statement punctuation and no comment marker is
/// prose, not TypeScript.
fn strip_trailing_prose(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while let Some(last) = lines.last() {
        let trimmed = last.trim();
        let is_code = trimmed.is_empty()
            || trimmed.starts_with("//")
            || trimmed.contains(';')
            || trimmed.contains('{')
            || trimmed.contains('}');
        if is_code && !trimmed.is_empty() {
            break;
        }
        if trimmed.is_empty() {
            lines.pop();
            continue;
        }
        lines.pop();
    }
    lines.join("\n")
}

/// Insert the TestBed import when the spec references TestBed without
/// importing it, which small models forget regularly.
fn ensure_testbed_import(text: &str) -> String {
    if !text.contains("TestBed") {
        return text.to_string();
    }
    let already_imported = text
        .lines()
        .any(|l| l.trim_start().starts_with("import ") && l.contains("TestBed"));
    if already_imported {
        return text.to_string();
    }
    format!("import {{ TestBed }} from '@angular/core/testing';\n{}", text)
}

fn declarations_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bdeclarations\s*:").expect("static regex"))
}

/// Standalone components are configured via `imports:`, not `declarations:`.
/// Rewrite only when the module config has no imports key already, so a
/// mixed NgModule-style spec is left untouched.
fn prefer_standalone_imports(text: &str) -> String {
    if text.contains("imports:") || text.contains("imports :") {
        return text.to_string();
    }
    declarations_re().replace_all(text, "imports:").into_owned()
}

/// Clean a raw model response into a writable spec candidate.
///
/// Returns the malformed-candidate reason on failure; the caller treats
/// that as a retryable outcome and skips the validator entirely.
pub fn clean(raw: &str) -> Result<String, String> {
    if raw.trim().is_empty() {
        return Err("model returned empty output".to_string());
    }

    let block = extract_code_block(raw);
    let stripped = strip_trailing_prose(&strip_leading_prose(block));

    // Guardrail inherited from the shell-script era: anything that is not
    // recognizably a Jasmine spec gets bounced before it can touch disk.
    if !stripped.contains("describe(") || !stripped.contains("it(") {
        return Err("output does not look like a Jasmine spec (missing describe/it)".to_string());
    }

    let with_import = ensure_testbed_import(&stripped);
    let finished = prefer_standalone_imports(&with_import);
    Ok(format!("{}\n", finished.trim_end()))
}
