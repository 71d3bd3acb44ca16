//! Markdown export: a printable worksheet followed by its answer key.
//!
//! Math stays in `\( … \)` / `\[ … \]` markup, which Markdown renderers with
//! KaTeX or MathJax support pick up unchanged. Diagrams are embedded as
//! `data:` URIs so the sheet is a single self-contained file.

use crate::model::{AnalysisResult, ProblemSet, ProblemUnit};
use std::fmt::Write as _;

/// What goes into the rendered sheet.
#[derive(Debug, Clone)]
pub struct SheetOptions {
    pub title: String,
    /// Repeat each original problem above its variations.
    pub include_originals: bool,
    /// Embed generated diagrams.
    pub include_images: bool,
    /// Append the answer key.
    pub include_answers: bool,
}

impl Default for SheetOptions {
    fn default() -> Self {
        Self {
            title: "Practice Worksheet".to_string(),
            include_originals: true,
            include_images: true,
            include_answers: true,
        }
    }
}

const ANSWER_NOTE: &str =
    "_Answers were computed automatically. Double-check them before handing the sheet out._";

/// Render the worksheet, and the answer key if requested.
pub fn worksheet(result: &AnalysisResult, options: &SheetOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", options.title);

    if result.is_empty() {
        out.push_str("_No problems were found in this image._\n");
        return out;
    }

    for (n, set) in result.problems.iter().enumerate() {
        write_set(&mut out, n + 1, set, options);
    }

    if options.include_answers {
        out.push_str("---\n\n");
        out.push_str(&answer_key(result));
    }
    out
}

/// Render only the answer key.
pub fn answer_key(result: &AnalysisResult) -> String {
    let mut out = String::from("# Answer Key\n\n");
    for (n, set) in result.problems.iter().enumerate() {
        let _ = writeln!(out, "## Problem {}\n", n + 1);
        let _ = writeln!(out, "- Original: {}", one_line(&set.original.answer));
        for (i, v) in set.variations.iter().enumerate() {
            let _ = writeln!(out, "- Variation {}: {}", i + 1, one_line(&v.answer));
        }
        out.push('\n');
    }
    out.push_str(ANSWER_NOTE);
    out.push('\n');
    out
}

fn write_set(out: &mut String, n: usize, set: &ProblemSet, options: &SheetOptions) {
    let _ = writeln!(out, "## Problem {n}\n");

    if options.include_originals {
        let _ = writeln!(out, "**Original.** {}\n", set.original.text);
    }
    for (i, v) in set.variations.iter().enumerate() {
        let _ = writeln!(out, "**Variation {}.**\n", i + 1);
        if options.include_images {
            write_image(out, n, i + 1, v);
        }
        let _ = writeln!(out, "{}\n", v.text);
    }
}

fn write_image(out: &mut String, n: usize, variation: usize, unit: &ProblemUnit) {
    if let Some(ref asset) = unit.image_asset {
        let _ = writeln!(
            out,
            "![Figure for problem {n}, variation {variation}]({})\n",
            asset.data_uri()
        );
    }
}

/// Answers go into list items; keep each on one line.
fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageAsset;

    fn sample() -> AnalysisResult {
        let mut with_image = ProblemUnit::new(r"Circle with \(r = 5\)", r"\(25\pi\)")
            .with_directive("circle r=5");
        with_image.image_asset = Some(ImageAsset::new("AAAA", "image/png"));
        AnalysisResult {
            problems: vec![ProblemSet {
                id: 7,
                has_figure: true,
                original: ProblemUnit::new(r"Circle with \(r = 3\)", r"\(9\pi\)"),
                variations: vec![
                    with_image,
                    ProblemUnit::new(r"Circle with \(r = 4\)", "\\(16\\pi\\)\n"),
                ],
            }],
        }
    }

    #[test]
    fn worksheet_lists_problems_then_answers() {
        let md = worksheet(&sample(), &SheetOptions::default());
        assert!(md.starts_with("# Practice Worksheet\n"));
        assert!(md.contains(r"**Original.** Circle with \(r = 3\)"));
        assert!(md.contains("![Figure for problem 1, variation 1](data:image/png;base64,AAAA)"));
        assert!(!md.contains("variation 2]("));
        let key_at = md.find("# Answer Key").unwrap();
        assert!(md.find("**Variation 2.**").unwrap() < key_at);
        assert!(md.contains(r"- Variation 2: \(16\pi\)"));
    }

    #[test]
    fn options_drop_sections() {
        let options = SheetOptions {
            include_originals: false,
            include_images: false,
            include_answers: false,
            ..SheetOptions::default()
        };
        let md = worksheet(&sample(), &options);
        assert!(!md.contains("**Original.**"));
        assert!(!md.contains("data:image"));
        assert!(!md.contains("Answer Key"));
    }

    #[test]
    fn empty_result_says_so() {
        let md = worksheet(&AnalysisResult::default(), &SheetOptions::default());
        assert!(md.contains("No problems were found"));
    }

    #[test]
    fn answer_key_alone() {
        let key = answer_key(&sample());
        assert!(key.starts_with("# Answer Key"));
        assert!(key.contains(r"- Original: \(9\pi\)"));
        assert!(key.trim_end().ends_with(ANSWER_NOTE));
    }
}
