//! Prompt assembly for spec generation
//!
//! Pure text construction: no file or network I/O happens here. The retry
//! feedback section is what differentiates attempt N from attempt N-1 — the
//! model sees the previous failure verbatim instead of repeating it.

use std::fmt::Write as _;

pub const SPEC_SYSTEM: &str = r#"You are a senior Angular engineer writing unit tests.

RULES:
- Output ONLY TypeScript code. No markdown fences, no commentary, no explanations.
- Return the COMPLETE spec file, ready to save as-is.
- Do NOT delete existing tests; only add or minimally adjust tests to raise coverage.
- Use Angular TestBed. For standalone components prefer imports: [Component] over declarations.
- Add at least one DOM assertion when the component has a template.
- Cover error paths and branch conditions, not just the happy path.
- Keep changes small and focused."#;

/// Everything the builder needs for one generation request.
#[derive(Debug, Clone)]
pub struct PromptRequest<'a> {
    pub source_path: &'a str,
    pub source_text: &'a str,
    pub spec_path: &'a str,
    /// Current spec contents, empty when no spec exists yet.
    pub spec_text: &'a str,
    pub min_pct: f64,
    pub line_pct: f64,
    pub branch_pct: f64,
    pub attempt: u32,
    /// Diagnostic from the previous attempt, empty on the first attempt.
    pub feedback: &'a str,
}

/// Build the full user prompt for one synthesis attempt.
pub fn build_prompt(req: &PromptRequest) -> String {
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "CONTEXT:\nWe enforce >= {:.0}% line AND branch coverage per file.\n\
         Current: lines={:.2}%, branches={:.2}%.",
        req.min_pct, req.line_pct, req.branch_pct
    );

    if !req.feedback.is_empty() {
        let _ = writeln!(
            prompt,
            "\nPREVIOUS ATTEMPT FAILED (attempt {} of this file):\n\
             The spec you produced last time did not work. Fix the problem below\n\
             and return a corrected complete spec file.\n\
             ---\n{}\n---",
            req.attempt.saturating_sub(1),
            req.feedback
        );
    }

    let _ = writeln!(
        prompt,
        "\nSOURCE FILE ({}):\n{}",
        req.source_path, req.source_text
    );

    if req.spec_text.is_empty() {
        let _ = writeln!(prompt, "\nCURRENT SPEC ({}):\n(none yet)", req.spec_path);
    } else {
        let _ = writeln!(
            prompt,
            "\nCURRENT SPEC ({}):\n{}",
            req.spec_path, req.spec_text
        );
    }

    let _ = write!(
        prompt,
        "\nTASK:\nReturn the COMPLETE updated spec file for {}.",
        spec_file_name(req.spec_path)
    );

    prompt
}

fn spec_file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
