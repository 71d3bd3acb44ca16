//! Instruction text for the extraction and diagram stages.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing a generation rule (e.g. a new
//!    domain-validity check) requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without
//!    spinning up a real model, making prompt regressions easy to catch.
//!
//! Callers can override the extraction instructions via
//! [`crate::config::PipelineConfig::system_prompt`] and the diagram style via
//! [`crate::config::PipelineConfig::style_preamble`].

/// Default style preamble prepended to every diagram directive.
///
/// Keeps every generated figure looking like it came from the same exam
/// paper, whatever the directive describes.
pub const DIAGRAM_STYLE_PREAMBLE: &str = "Professional mathematical diagram for a school exam, \
black and white ink style, high contrast, clean white background, sharp lines, \
clear text labels. Diagram description: ";

/// Build the extraction instructions.
///
/// `variations` is the number of variations requested per problem and
/// `language` the output language (`None` keeps the language of the photo).
pub fn extraction_prompt(variations: usize, language: Option<&str>) -> String {
    let language_rule = match language {
        Some(lang) => format!("Write all problem text and answers in {lang}."),
        None => "Write all problem text and answers in the same language as the photographed problems."
            .to_string(),
    };

    format!(
        r#"You are an expert mathematics teacher. Analyse the photographed math problems and follow these rules precisely:

1. PROBLEM IDENTIFICATION
   - Transcribe every problem in the image exactly, with all of its given values.
   - Check how each algebraic symbol (x, y, a, b, ...) is used and what it means in the problem.
   - Give every problem an integer "id" that is unique within your answer.

2. VARIATIONS
   - Produce exactly {variations} variations for every problem.
   - Every known numeric value in a variation must differ from the original, and the variations must not reuse each other's values or stay close to them.
   - A variation may rename the free variable (for example y, z or a instead of x) to broaden practice.
   - Keep every variation mathematically valid:
     - triangle side lengths must satisfy the strict triangle inequality;
     - denominators must never be zero;
     - logarithm and root arguments must lie inside their domain;
     - final answers must be clean integers, fractions or radicals, never unbounded non-repeating decimals.

3. FIGURES
   - Set "hasFigure" to true only when the meaning of the original problem depends on a diagram: a geometric figure, a coordinate plot or a statistical chart.
   - When "hasFigure" is true, give every variation an "imageDirective": a detailed English description of that variation's own figure. Include the shape type, every labelled point (A, B, C, ...), the variation's specific lengths and angles as they should be annotated, and which lines are solid or dashed.
   - Directives must not be interchangeable: a circle of radius 5 in one variation is described as "a circle with radius 5 marked r=5", never with another variation's values.
   - The original problem never gets an imageDirective.

4. FORMAT
   - Wrap every mathematical expression, including a single variable like \(x\), in \( ... \) for inline math or \[ ... \] for display math. Never use $ delimiters.
   - {language_rule}
   - Answer with JSON only, matching the response schema. No commentary and no code fences."#
    )
}

/// Wrap a variation's directive with the diagram style preamble.
pub fn diagram_prompt(preamble: &str, directive: &str) -> String {
    format!("{}{}", preamble, directive.trim())
}

/// Render the schema into the instruction text for backends that cannot
/// take a response schema natively.
pub fn schema_context(schema: &serde_json::Value) -> String {
    let rendered = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!("Your answer must be a single JSON document conforming to this JSON schema:\n\n{rendered}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_embeds_variation_count() {
        let p = extraction_prompt(5, None);
        assert!(p.contains("exactly 5 variations"));
        assert!(p.contains("same language as the photographed"));
    }

    #[test]
    fn extraction_prompt_honours_language() {
        let p = extraction_prompt(3, Some("Traditional Chinese"));
        assert!(p.contains("in Traditional Chinese."));
    }

    #[test]
    fn extraction_prompt_names_domain_rules() {
        let p = extraction_prompt(3, None);
        assert!(p.contains("triangle inequality"));
        assert!(p.contains("denominators must never be zero"));
        assert!(p.contains("\\( ... \\)"));
    }

    #[test]
    fn diagram_prompt_trims_directive() {
        let p = diagram_prompt(DIAGRAM_STYLE_PREAMBLE, "  a square with side 4  ");
        assert!(p.starts_with("Professional mathematical diagram"));
        assert!(p.ends_with("Diagram description: a square with side 4"));
    }

    #[test]
    fn schema_context_contains_schema() {
        let schema = serde_json::json!({"type": "object"});
        assert!(schema_context(&schema).contains("\"type\": \"object\""));
    }
}
