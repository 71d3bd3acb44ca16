//! Post-processing: deterministic cleanup of model output.
//!
//! Even with a response schema, models occasionally wrap JSON in
//! ` ```json ` fences, prepend a sentence, sprinkle zero-width characters,
//! or fall back to `$…$` math delimiters the instructions forbid. These
//! rules repair such quirks without touching content.
//!
//! Two entry points, applied in this order by the extractor:
//!
//! 1. [`clean_json_response`] — raw response body → JSON text
//! 2. [`normalise_result`]    — decoded tree → one math delimiter convention

use crate::model::{AnalysisResult, ProblemUnit};
use once_cell::sync::Lazy;
use regex::Regex;

/// Turn a raw response body into something `serde_json` can parse.
///
/// Rules (applied in order):
/// 1. Strip invisible Unicode (BOM, zero-width spaces, soft hyphens)
/// 2. Strip outer code fences (` ```json `, ` ``` `)
/// 3. Drop prose before the first `{` / `[` and after the matching last `}` / `]`
pub fn clean_json_response(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = strip_code_fences(&s);
    trim_to_json(&s).to_string()
}

/// Normalise every unit of a decoded result in place.
pub fn normalise_result(result: &mut AnalysisResult) {
    for set in &mut result.problems {
        normalise_unit(&mut set.original);
        for v in &mut set.variations {
            normalise_unit(v);
        }
    }
}

/// Normalise one unit: math delimiters, line endings, blank directives.
pub fn normalise_unit(unit: &mut ProblemUnit) {
    unit.text = normalise_math_delimiters(&normalise_line_endings(unit.text.trim()));
    unit.answer = normalise_math_delimiters(&normalise_line_endings(unit.answer.trim()));
    unit.image_directive = unit
        .image_directive
        .take()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
}

// ── Rule: Strip invisible Unicode ────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule: Strip outer code fences ────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

// ── Rule: Trim surrounding prose ─────────────────────────────────────────────

// Prose may carry brackets of its own ("Result [JSON]:"). The first
// `{` and the first `[` are both tried; the earliest one that parses wins,
// and the object candidate is the fallback for the decoder to report on.

fn trim_to_json(input: &str) -> &str {
    let mut candidates: Vec<(usize, &str)> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| {
            let start = input.find(open)?;
            let slice = match input.rfind(close) {
                Some(end) if end > start => &input[start..=end],
                _ => &input[start..],
            };
            Some((start, slice))
        })
        .collect();
    candidates.sort_by_key(|&(start, _)| start);

    let parses = |c: &&(usize, &str)| serde_json::from_str::<serde_json::Value>(c.1).is_ok();
    let is_object = |c: &&(usize, &str)| c.1.starts_with('{');
    candidates
        .iter()
        .find(parses)
        .or_else(|| candidates.iter().find(is_object))
        .or_else(|| candidates.first())
        .map_or_else(|| input.trim(), |&(_, slice)| slice)
}

// ── Rule: Normalise line endings ─────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule: One math delimiter convention ──────────────────────────────────────
//
// Inline math is `\( … \)`, display math `\[ … \]`. A `$` only opens math
// when the next character is not whitespace and only closes it when the
// previous one is not, which leaves prices like "$5 and $6" alone.

static RE_DISPLAY_DOLLARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\$\$(.+?)\$\$").unwrap());

static RE_INLINE_DOLLARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([^\s$](?:[^$\n]*?[^\s$])?)\$").unwrap());

/// Rewrite `$$…$$` to `\[…\]` and `$…$` to `\(…\)`.
pub fn normalise_math_delimiters(input: &str) -> String {
    if !input.contains('$') {
        return input.to_string();
    }
    let s = RE_DISPLAY_DOLLARS.replace_all(input, r"\[$1\]");
    RE_INLINE_DOLLARS.replace_all(&s, r"\($1\)").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────
