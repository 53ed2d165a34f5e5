//! Model capability and its implementations

pub mod handle;
pub mod logistic;
pub mod onnx;
pub mod preprocess;
pub mod store;

pub use handle::ModelHandle;
pub use logistic::{LinearModel, LogisticRegression, LogisticRegressionConfig};
pub use onnx::OnnxModel;
pub use preprocess::Preprocessor;
pub use store::{ModelDirectory, ModelManifest, ModelStore, StoreError};

use crate::types::{FeatureRow, FeatureTable};
use thiserror::Error;

/// A feature row does not have the shape a model was fitted on.
///
/// This is how train/serve skew shows up at prediction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelInputError {
    #[error("feature row is missing columns expected by the model: {0:?}")]
    MissingColumns(Vec<String>),
    #[error("feature row has columns the model was not fitted on: {0:?}")]
    UnexpectedColumns(Vec<String>),
    #[error("column `{column}` should be {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
    },
}

/// Failures of a model capability.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Input(#[from] ModelInputError),
    #[error("model backend failed: {0}")]
    Backend(String),
    #[error("model returned {0}, expected a probability in [0, 1]")]
    InvalidOutput(f64),
}

/// A fitted model scoring one aligned feature row at a time.
///
/// Implementations are immutable once loaded and shared read-only between
/// callers.
pub trait Model: Send + Sync {
    /// Identifier reported to callers as `model_used`.
    fn name(&self) -> &str;

    /// Columns, in order, the model was fitted on.
    fn feature_names(&self) -> &[String];

    /// Probability of a no-show for one row aligned to [`Model::feature_names`].
    fn predict_probability(&self, row: &FeatureRow) -> Result<f64, ModelError>;
}

/// Fits a model from a feature table and its target vector.
pub trait Trainer {
    type Output: Model;

    fn fit(&self, table: &FeatureTable, target: &[bool]) -> Result<Self::Output, TrainError>;
}

/// Reasons a fit cannot proceed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainError {
    #[error("cannot fit on an empty feature table")]
    EmptyTable,
    #[error("target has {target} values for {rows} rows")]
    TargetLength { rows: usize, target: usize },
    #[error("target has a single class; both outcomes are needed to fit")]
    SingleClass,
    #[error(transparent)]
    Input(#[from] ModelInputError),
}

/// Validate a probability coming out of a model backend.
pub(crate) fn checked_probability(p: f64) -> Result<f64, ModelError> {
    if p.is_finite() && (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(ModelError::InvalidOutput(p))
    }
}
