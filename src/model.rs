//! The problem tree produced by the pipeline.
//!
//! ```text
//! AnalysisResult
//!  └─ ProblemSet            (one per problem found in the photo)
//!      ├─ original: ProblemUnit       never carries a directive
//!      └─ variations: [ProblemUnit]   display order, fixed at extraction
//!          ├─ image_directive  Option  written by the extractor
//!          └─ image_asset      Option  written by the fan-out, once
//! ```
//!
//! An absent `image_asset` is always a valid terminal state: the unit had
//! no directive, its set has no figure, or synthesis failed.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// One problem statement with its answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemUnit {
    /// Problem statement, math marked up with `\( … \)` / `\[ … \]`.
    pub text: String,
    /// Final answer, same markup convention as `text`.
    pub answer: String,
    /// Natural-language diagram description for this unit's own values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_directive: Option<String>,
    /// Generated diagram, present only after successful synthesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_asset: Option<ImageAsset>,
}

impl ProblemUnit {
    pub fn new(text: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            answer: answer.into(),
            image_directive: None,
            image_asset: None,
        }
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.image_directive = Some(directive.into());
        self
    }

    /// The directive, if present and not blank.
    pub fn directive(&self) -> Option<&str> {
        self.image_directive
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// One original problem plus its generated variations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSet {
    /// Identifier assigned by the extractor. Unique, not necessarily contiguous.
    pub id: i64,
    /// True iff the source problem depends on a figure.
    pub has_figure: bool,
    pub original: ProblemUnit,
    pub variations: Vec<ProblemUnit>,
}

/// The sole output of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub problems: Vec<ProblemSet>,
}

impl AnalysisResult {
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Positions of every variation that should receive a diagram.
    ///
    /// Only sets with `has_figure` contribute, and only variations with a
    /// non-blank directive. Slots are returned in display order.
    pub fn directive_slots(&self) -> Vec<UnitSlot> {
        self.problems
            .iter()
            .enumerate()
            .filter(|(_, set)| set.has_figure)
            .flat_map(|(set_idx, set)| {
                set.variations
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.directive().is_some())
                    .map(move |(variation, _)| UnitSlot {
                        set: set_idx,
                        variation,
                    })
            })
            .collect()
    }

    /// Whether any set needs the imaging phase.
    pub fn needs_images(&self) -> bool {
        self.problems.iter().any(|s| s.has_figure)
    }

    pub fn variation(&self, slot: UnitSlot) -> Option<&ProblemUnit> {
        self.problems.get(slot.set)?.variations.get(slot.variation)
    }

    pub fn variation_mut(&mut self, slot: UnitSlot) -> Option<&mut ProblemUnit> {
        self.problems
            .get_mut(slot.set)?
            .variations
            .get_mut(slot.variation)
    }

    /// Number of variations that carry a generated image.
    pub fn image_count(&self) -> usize {
        self.problems
            .iter()
            .flat_map(|s| s.variations.iter())
            .filter(|v| v.image_asset.is_some())
            .count()
    }
}

/// Position of a variation inside an [`AnalysisResult`].
///
/// Results of concurrent work are written back through this address, never
/// by completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitSlot {
    /// Index into `AnalysisResult::problems`.
    pub set: usize,
    /// Index into `ProblemSet::variations`.
    pub variation: usize,
}

impl std::fmt::Display for UnitSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "set {} / variation {}", self.set + 1, self.variation + 1)
    }
}

/// A generated diagram, base64-encoded for inline embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAsset {
    pub mime_type: String,
    /// Base64 (standard alphabet) image bytes.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl ImageAsset {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
            width: None,
            height: None,
        }
    }

    /// `data:` URI suitable for an `<img src>` or a Markdown image link.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Decode the payload back to raw bytes.
    pub fn bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.data)
    }
}

/// The photographed problem as handed over by the intake collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub mime_type: String,
    /// Base64 (standard alphabet) image bytes.
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(id: i64, has_figure: bool, directives: &[Option<&str>]) -> ProblemSet {
        ProblemSet {
            id,
            has_figure,
            original: ProblemUnit::new("o", "a"),
            variations: directives
                .iter()
                .map(|d| {
                    let u = ProblemUnit::new("v", "a");
                    match d {
                        Some(d) => u.with_directive(*d),
                        None => u,
                    }
                })
                .collect(),
        }
    }

    #[test]
    fn directive_slots_skip_figureless_sets_and_blank_directives() {
        let result = AnalysisResult {
            problems: vec![
                set(1, false, &[Some("circle r=2")]),
                set(7, true, &[Some("triangle"), None, Some("   "), Some("square")]),
            ],
        };
        assert_eq!(
            result.directive_slots(),
            vec![
                UnitSlot { set: 1, variation: 0 },
                UnitSlot { set: 1, variation: 3 },
            ]
        );
    }

    #[test]
    fn variation_mut_out_of_range_is_none() {
        let mut result = AnalysisResult {
            problems: vec![set(1, true, &[None])],
        };
        assert!(result.variation_mut(UnitSlot { set: 0, variation: 5 }).is_none());
        assert!(result.variation_mut(UnitSlot { set: 3, variation: 0 }).is_none());
        assert!(result.variation_mut(UnitSlot { set: 0, variation: 0 }).is_some());
    }

    #[test]
    fn data_uri_prefix() {
        let asset = ImageAsset::new("aGVsbG8=", "image/png");
        assert_eq!(asset.data_uri(), "data:image/png;base64,aGVsbG8=");
        assert_eq!(asset.bytes().unwrap(), b"hello");
    }

    #[test]
    fn serialises_camel_case_and_omits_absent_fields() {
        let unit = ProblemUnit::new("\\(x+1=2\\)", "\\(x=1\\)");
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["text"], "\\(x+1=2\\)");
        assert!(json.get("imageDirective").is_none());
        assert!(json.get("imageAsset").is_none());

        let s = set(3, true, &[Some("d")]);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["hasFigure"], true);
        assert_eq!(json["variations"][0]["imageDirective"], "d");
    }

    #[test]
    fn slot_display_is_one_indexed() {
        assert_eq!(
            UnitSlot { set: 0, variation: 2 }.to_string(),
            "set 1 / variation 3"
        );
    }
}
