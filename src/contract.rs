//! The extraction contract: the output shape the model must return.
//!
//! The schema is handed to the backend as a hard constraint. Client-side
//! the only enforcement is deserialisation into the wire types below; any
//! mismatch becomes [`ExtractionError::Malformed`]. Semantic checks live in
//! [`crate::pipeline::validate`].
//!
//! The wire types are deliberately separate from [`crate::model`]: the
//! original unit has no directive field at all, and no wire type can carry
//! an image asset, so a conforming response can never pre-populate either.

use crate::error::ExtractionError;
use crate::model::{AnalysisResult, ProblemSet, ProblemUnit};
use serde::Deserialize;
use serde_json::{json, Value};

/// Build the response schema for `variations` variations per problem.
///
/// The field descriptions double as instructions: structured-output
/// backends surface them to the model alongside the prompt.
pub fn extraction_schema(variations: usize) -> Value {
    json!({
        "type": "object",
        "properties": {
            "problems": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer" },
                        "hasFigure": {
                            "type": "boolean",
                            "description": "True when the problem depends on a geometric figure, a function graph, a coordinate plot or a statistical chart."
                        },
                        "original": {
                            "type": "object",
                            "properties": {
                                "text": {
                                    "type": "string",
                                    "description": "The original problem text. Wrap all math in \\( ... \\)."
                                },
                                "answer": {
                                    "type": "string",
                                    "description": "The correct answer. Wrap all math in \\( ... \\)."
                                }
                            },
                            "required": ["text", "answer"]
                        },
                        "variations": {
                            "type": "array",
                            "minItems": variations,
                            "maxItems": variations,
                            "items": {
                                "type": "object",
                                "properties": {
                                    "text": {
                                        "type": "string",
                                        "description": "Variation text. Its numbers must differ from the original and from the other variations, and the problem must stay well-posed."
                                    },
                                    "answer": {
                                        "type": "string",
                                        "description": "The answer to this variation."
                                    },
                                    "imageDirective": {
                                        "type": "string",
                                        "description": "Detailed English drawing instructions for this variation's own figure, including its specific numeric labels."
                                    }
                                },
                                "required": ["text", "answer"]
                            }
                        }
                    },
                    "required": ["id", "hasFigure", "original", "variations"]
                }
            }
        },
        "required": ["problems"]
    })
}

// ── Wire types ───────────────────────────────────────────────────────────

/// Models occasionally drop the wrapper object and return the array itself.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Wrapped { problems: Vec<WireProblemSet> },
    Bare(Vec<WireProblemSet>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProblemSet {
    #[serde(alias = "identifier")]
    id: i64,
    has_figure: bool,
    original: WireOriginal,
    variations: Vec<WireVariation>,
}

#[derive(Debug, Deserialize)]
struct WireOriginal {
    text: String,
    answer: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVariation {
    text: String,
    answer: String,
    #[serde(default, alias = "imagePrompt")]
    image_directive: Option<String>,
}

impl From<WireProblemSet> for ProblemSet {
    fn from(w: WireProblemSet) -> Self {
        ProblemSet {
            id: w.id,
            has_figure: w.has_figure,
            original: ProblemUnit::new(w.original.text, w.original.answer),
            variations: w
                .variations
                .into_iter()
                .map(|v| ProblemUnit {
                    text: v.text,
                    answer: v.answer,
                    image_directive: v.image_directive,
                    image_asset: None,
                })
                .collect(),
        }
    }
}

/// Decode a (fence-stripped) model response into the data model.
///
/// # Errors
/// * [`ExtractionError::EmptyResponse`] — blank body or zero problem sets
/// * [`ExtractionError::Malformed`] — not JSON, or not the contract's shape
pub fn decode_response(body: &str) -> Result<AnalysisResult, ExtractionError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }

    let wire: WireResponse =
        serde_json::from_str(body).map_err(|e| ExtractionError::Malformed {
            detail: e.to_string(),
        })?;

    let sets = match wire {
        WireResponse::Wrapped { problems } => problems,
        WireResponse::Bare(problems) => problems,
    };
    if sets.is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }

    Ok(AnalysisResult {
        problems: sets.into_iter().map(ProblemSet::from).collect(),
    })
}
