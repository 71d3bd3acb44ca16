//! Semantic checks on extracted data.
//!
//! The response schema fixes the *shape* of the answer; it cannot say that
//! a variation must use new numbers or that two figures must differ. These
//! checks catch the cheap-to-detect violations of the generation rules:
//!
//! - empty statements or answers
//! - a variation that reuses the original's numbers
//! - two variations with the same numbers
//! - a figure problem whose variations lack a directive
//! - two variations sharing one directive
//! - duplicate identifiers, sets without variations
//!
//! Domain rules that need real mathematics (triangle inequality, valid
//! logarithm arguments) stay in the instructions; recognising the problem
//! type from free text is not reliable enough to reject on.

use crate::model::{AnalysisResult, ProblemSet, ProblemUnit};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

/// One broken generation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    DuplicateId { id: i64 },
    NoVariations { set_id: i64 },
    EmptyText { set_id: i64, unit: UnitLabel },
    EmptyAnswer { set_id: i64, unit: UnitLabel },
    SameNumbersAsOriginal { set_id: i64, variation: usize },
    SameNumbersAsVariation { set_id: i64, a: usize, b: usize },
    MissingDirective { set_id: i64, variation: usize },
    SharedDirective { set_id: i64, a: usize, b: usize },
}

/// Which unit of a set a violation refers to. Variations are 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitLabel {
    Original,
    Variation(usize),
}

impl fmt::Display for UnitLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitLabel::Original => write!(f, "original"),
            UnitLabel::Variation(n) => write!(f, "variation {n}"),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::DuplicateId { id } => write!(f, "problem id {id} is used more than once"),
            Violation::NoVariations { set_id } => write!(f, "problem {set_id} has no variations"),
            Violation::EmptyText { set_id, unit } => {
                write!(f, "problem {set_id} {unit} has no text")
            }
            Violation::EmptyAnswer { set_id, unit } => {
                write!(f, "problem {set_id} {unit} has no answer")
            }
            Violation::SameNumbersAsOriginal { set_id, variation } => write!(
                f,
                "problem {set_id} variation {variation} reuses the original's numbers"
            ),
            Violation::SameNumbersAsVariation { set_id, a, b } => write!(
                f,
                "problem {set_id} variations {a} and {b} use the same numbers"
            ),
            Violation::MissingDirective { set_id, variation } => write!(
                f,
                "problem {set_id} has a figure but variation {variation} has no image directive"
            ),
            Violation::SharedDirective { set_id, a, b } => write!(
                f,
                "problem {set_id} variations {a} and {b} share the same image directive"
            ),
        }
    }
}

/// Run every check over `result`.
pub fn validate(result: &AnalysisResult) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut seen_ids = HashSet::new();

    for set in &result.problems {
        if !seen_ids.insert(set.id) {
            violations.push(Violation::DuplicateId { id: set.id });
        }
        check_set(set, &mut violations);
    }

    violations
}

fn check_set(set: &ProblemSet, out: &mut Vec<Violation>) {
    let set_id = set.id;

    check_unit(set_id, UnitLabel::Original, &set.original, out);
    if set.variations.is_empty() {
        out.push(Violation::NoVariations { set_id });
        return;
    }
    for (i, v) in set.variations.iter().enumerate() {
        check_unit(set_id, UnitLabel::Variation(i + 1), v, out);
    }

    // Numeric distinctness. Units without any numbers (purely symbolic
    // problems) are not compared.
    let original = numbers(&set.original.text);
    let variations: Vec<Vec<String>> = set.variations.iter().map(|v| numbers(&v.text)).collect();

    for (i, nums) in variations.iter().enumerate() {
        if !nums.is_empty() && *nums == original {
            out.push(Violation::SameNumbersAsOriginal {
                set_id,
                variation: i + 1,
            });
        }
    }
    for (i, a) in variations.iter().enumerate() {
        for (j, b) in variations.iter().enumerate().skip(i + 1) {
            if !a.is_empty() && a == b {
                out.push(Violation::SameNumbersAsVariation {
                    set_id,
                    a: i + 1,
                    b: j + 1,
                });
            }
        }
    }

    if !set.has_figure {
        return;
    }

    for (i, v) in set.variations.iter().enumerate() {
        if v.directive().is_none() {
            out.push(Violation::MissingDirective {
                set_id,
                variation: i + 1,
            });
        }
    }
    let directives: Vec<Option<String>> = set
        .variations
        .iter()
        .map(|v| v.directive().map(str::to_lowercase))
        .collect();
    for (i, a) in directives.iter().enumerate() {
        for (j, b) in directives.iter().enumerate().skip(i + 1) {
            if a.is_some() && a == b {
                out.push(Violation::SharedDirective {
                    set_id,
                    a: i + 1,
                    b: j + 1,
                });
            }
        }
    }
}

fn check_unit(set_id: i64, unit: UnitLabel, u: &ProblemUnit, out: &mut Vec<Violation>) {
    if u.text.trim().is_empty() {
        out.push(Violation::EmptyText { set_id, unit });
    }
    if u.answer.trim().is_empty() {
        out.push(Violation::EmptyAnswer { set_id, unit });
    }
}

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

/// Sorted multiset of the numeric literals in `text`.
fn numbers(text: &str) -> Vec<String> {
    let mut nums: Vec<String> = RE_NUMBER
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    nums.sort_unstable();
    nums
}
