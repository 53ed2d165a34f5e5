//! Single-record prediction: features, schema alignment, model, decision

use crate::feature_builder::FeatureBuilder;
use crate::models::{Model, ModelError, ModelInputError};
use crate::types::{
    AppointmentRecord, Decision, ErrorKind, FeatureRow, FeatureValue, Mode, PredictionResult,
    SchemaError,
};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Probabilities at or above this are a likely no-show.
pub const DECISION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    ModelInput(#[from] ModelInputError),
    #[error(transparent)]
    Model(ModelError),
    #[error("feature builder produced no row for the request")]
    NoFeatureRow,
}

impl From<ModelError> for PredictionError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Input(input) => PredictionError::ModelInput(input),
            other => PredictionError::Model(other),
        }
    }
}

impl PredictionError {
    /// Whether the caller or the server is at fault.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PredictionError::Schema(_) => ErrorKind::MalformedInput,
            PredictionError::ModelInput(_)
            | PredictionError::Model(_)
            | PredictionError::NoFeatureRow => ErrorKind::ModelError,
        }
    }
}

/// Turns one raw record into a thresholded prediction.
///
/// Stateless; the model is passed in on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredictionPipeline {
    builder: FeatureBuilder,
}

impl PredictionPipeline {
    pub fn new() -> Self {
        Self {
            builder: FeatureBuilder::new(),
        }
    }

    /// Validate a JSON request and predict.
    pub fn predict_json(
        &self,
        payload: Value,
        model: &dyn Model,
    ) -> Result<PredictionResult, PredictionError> {
        let record = AppointmentRecord::from_json(payload)?;
        self.predict(&record, model)
    }

    /// Predict a no-show for one record.
    pub fn predict(
        &self,
        record: &AppointmentRecord,
        model: &dyn Model,
    ) -> Result<PredictionResult, PredictionError> {
        let mut table = self
            .builder
            .build(std::slice::from_ref(record), Mode::Inference);

        // Inference tables never carry a target; drop one anyway rather
        // than let it reach the model.
        if table.drop_target().is_some() {
            warn!("Inference feature table carried a target column; dropped");
        }

        let row = table.row(0).ok_or(PredictionError::NoFeatureRow)?;
        let aligned = Self::align(&row, model.feature_names())?;

        let probability = model.predict_probability(&aligned)?;
        let prediction = Decision::from_probability(probability, DECISION_THRESHOLD);

        debug!(
            model = %model.name(),
            probability,
            prediction = prediction.as_str(),
            parse_issues = table.parse_issues.len(),
            "Prediction complete"
        );

        Ok(PredictionResult {
            no_show_probability: round_probability(probability),
            prediction,
            model_used: model.name().to_string(),
        })
    }

    /// Reorder `row` to `schema`.
    ///
    /// The column sets must be equal: a column the model expects but the
    /// row lacks, or a row column the model was not fitted on, is a
    /// [`ModelInputError`]. A target column in the row counts as unexpected.
    pub fn align(row: &FeatureRow, schema: &[String]) -> Result<FeatureRow, ModelInputError> {
        let missing: Vec<String> = schema
            .iter()
            .filter(|c| !row.contains(c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ModelInputError::MissingColumns(missing));
        }

        let expected: HashSet<&str> = schema.iter().map(String::as_str).collect();
        let unexpected: Vec<String> = row
            .columns()
            .iter()
            .filter(|c| !expected.contains(c.as_str()))
            .cloned()
            .collect();
        if !unexpected.is_empty() {
            return Err(ModelInputError::UnexpectedColumns(unexpected));
        }

        let values: Vec<FeatureValue> = schema
            .iter()
            .filter_map(|c| row.get(c).cloned())
            .collect();
        Ok(FeatureRow::new(schema.to_vec(), values))
    }
}

/// Presentation rounding to 4 decimals. Decisions use the raw value.
pub fn round_probability(p: f64) -> f64 {
    (p * 10_000.0).round() / 10_000.0
}
