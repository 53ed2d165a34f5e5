//! Appointment No-Show Prediction Library
//!
//! One feature transformation shared by training and inference, a
//! swappable model capability, and a NATS request/reply service that
//! scores single appointments.

pub mod config;
pub mod consumer;
pub mod data_source;
pub mod feature_builder;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod training;
pub mod types;

pub use config::AppConfig;
pub use consumer::AppointmentConsumer;
pub use data_source::{CsvDataSource, DataSource, InMemorySource};
pub use feature_builder::FeatureBuilder;
pub use models::{Model, ModelDirectory, ModelHandle, ModelStore};
pub use pipeline::{PredictionError, PredictionPipeline, DECISION_THRESHOLD};
pub use producer::{Reply, ResponsePublisher};
pub use training::{TrainingError, TrainingReport, TrainingRun};
pub use types::{AppointmentRecord, FeatureTable, Mode, PredictionResult};
