//! Prediction results returned to inference callers

use serde::{Deserialize, Serialize};

/// Thresholded no-show decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "Likely no-show")]
    LikelyNoShow,
    #[serde(rename = "Likely show")]
    LikelyShow,
}

impl Decision {
    /// Ties go to no-show.
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        if probability >= threshold {
            Decision::LikelyNoShow
        } else {
            Decision::LikelyShow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::LikelyNoShow => "Likely no-show",
            Decision::LikelyShow => "Likely show",
        }
    }
}

/// Successful reply to one prediction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Probability of a no-show, rounded to 4 decimals for presentation
    pub no_show_probability: f64,
    pub prediction: Decision,
    /// Identifier of the model that produced the probability
    pub model_used: String,
}

/// Coarse error class shown to inference callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself is wrong; resubmitting it unchanged will fail again
    MalformedInput,
    /// The server or model failed on a well-formed request
    ModelError,
}

/// Error reply to one prediction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorKind,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
        }
    }
}
