// ============================================================
// Layer 3 - Prompt/Response Record
// ============================================================
// A single supervised example as it appears in a dataset file.
// The model is trained to continue `prompt` with `response`;
// only the response tokens contribute to the loss.

use serde::{Deserialize, Serialize};

/// Label value for positions excluded from the loss
/// (prompt tokens and padding).
pub const IGNORE_INDEX: i64 = -100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptResponse {
    /// Text the model conditions on
    pub prompt: String,

    /// Text the model must learn to produce
    pub response: String,
}

impl PromptResponse {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt:   prompt.into(),
            response: response.into(),
        }
    }
}

/// One decoded validation example, as written to the per-epoch
/// output file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Prediction {
    pub input:  String,
    pub label:  String,
    pub result: String,
}
