//! ONNX Runtime adapter for the externally trained gradient boosting model.
//!
//! The export is expected to take one float tensor `[1, n]` encoded by the
//! same [`Preprocessor`] the training run wrote, and to emit class
//! probabilities as a tensor (`[1, 2]`, `[2]` or a single positive-class
//! value).

use super::preprocess::Preprocessor;
use super::store::StoreError;
use super::{checked_probability, Model, ModelError};
use crate::types::FeatureRow;
use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Default identifier of the exported gradient boosting model.
pub const GRADIENT_BOOSTING_MODEL_NAME: &str = "gradient_boosting";

/// Loaded ONNX model with its input encoding.
pub struct OnnxModel {
    name: String,
    feature_names: Vec<String>,
    preprocessor: Preprocessor,
    /// Running a session needs exclusive access
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxModel {
    /// Load an ONNX file and pair it with its preprocessor.
    pub fn load<P: AsRef<Path>>(
        path: P,
        name: &str,
        preprocessor: Preprocessor,
        onnx_threads: usize,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        info!(model = %name, path = %path.display(), threads = onnx_threads, "Loading ONNX model");

        let session = open_session(path, onnx_threads)
            .map_err(|e| StoreError::Backend(format!("{e:#}")))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "probabilities".to_string());

        info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            encoded_width = preprocessor.output_width(),
            "ONNX model loaded"
        );

        Ok(Self {
            name: name.to_string(),
            feature_names: preprocessor.input_columns(),
            preprocessor,
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }

    fn run(&self, features: Vec<f32>) -> Result<f64> {
        // Shape [1, num_features]
        let shape = vec![1_i64, features.len() as i64];
        let input_tensor =
            Tensor::from_array((shape, features)).context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let outputs = session.run(ort::inputs![&self.input_name => input_tensor])?;

        let probability = extract_probability(&outputs, &self.output_name)
            .with_context(|| format!("No probability output from model {}", self.name))?;
        Ok(probability)
    }
}

fn open_session(path: &Path, onnx_threads: usize) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(onnx_threads)?
        .commit_from_file(path)
        .context(format!("Failed to load model from {:?}", path))?;
    Ok(session)
}

/// Read the positive-class probability, preferring the named output and
/// skipping label outputs otherwise.
fn extract_probability(outputs: &ort::session::SessionOutputs, output_name: &str) -> Result<f64> {
    if let Some(output) = outputs.get(output_name) {
        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            if let Some(p) = positive_class_probability(&dims, data) {
                return Ok(p);
            }
        }
    }

    for (name, output) in outputs.iter() {
        if name.contains("label") {
            continue;
        }
        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            if let Some(p) = positive_class_probability(&dims, data) {
                debug!(output = %name, "Probability read from fallback output");
                return Ok(p);
            }
        }
    }

    anyhow::bail!("no float probability tensor among model outputs")
}

/// Positive class of a `[batch, classes]` or `[classes]` tensor; a single
/// class column is taken as the positive-class probability itself.
fn positive_class_probability(dims: &[i64], data: &[f32]) -> Option<f64> {
    let classes = *dims.last()?;
    match classes {
        c if c >= 2 => data.get(1).map(|&p| f64::from(p)),
        1 => data.first().map(|&p| f64::from(p)),
        _ => None,
    }
}

impl Model for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_probability(&self, row: &FeatureRow) -> Result<f64, ModelError> {
        let features: Vec<f32> = self
            .preprocessor
            .transform(row)?
            .into_iter()
            .map(|x| x as f32)
            .collect();

        let probability = self
            .run(features)
            .map_err(|e| ModelError::Backend(format!("{e:#}")))?;
        debug!(model = %self.name, probability, "ONNX inference complete");

        checked_probability(probability)
    }
}
