//! Type definitions for the no-show prediction pipeline

pub mod appointment;
pub mod features;
pub mod prediction;

pub use appointment::{AppointmentRecord, SchemaError};
pub use features::{
    DataQualityDrop, DropCounts, FeatureRow, FeatureTable, FeatureValue, FeatureVector, Mode,
    ParseIssue, FEATURE_COLUMNS, TARGET_COLUMN,
};
pub use prediction::{Decision, ErrorKind, ErrorResponse, PredictionResult};
