//! Configuration management for the no-show prediction service and training runs

use crate::models::logistic::{LogisticRegressionConfig, LOGISTIC_MODEL_NAME};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable overriding the configuration file path.
pub const CONFIG_PATH_ENV: &str = "NO_SHOW_CONFIG";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub models: ModelsConfig,
    pub training: TrainingConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming prediction requests
    pub predict_subject: String,
    /// Subject that triggers a model reload
    #[serde(default = "default_reload_subject")]
    pub reload_subject: String,
}

fn default_reload_subject() -> String {
    "appointments.model.reload".to_string()
}

/// Model store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory containing model manifests
    pub models_dir: String,
    /// Manifest name served by the inference service
    #[serde(default = "default_active_model")]
    pub active_model: String,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_active_model() -> String {
    LOGISTIC_MODEL_NAME.to_string()
}

fn default_onnx_threads() -> usize {
    1
}

/// Training run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    /// CSV file with labelled appointments
    pub data_path: String,
    /// Name the fitted model is saved under
    #[serde(default = "default_model_name")]
    pub model_name: String,
    /// Fraction of rows held out for evaluation
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    /// Seed for the holdout split
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub logistic: LogisticRegressionConfig,
}

fn default_model_name() -> String {
    LOGISTIC_MODEL_NAME.to_string()
}

fn default_test_size() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum concurrently processed requests
    pub workers: usize,
    /// Seconds between metrics summaries
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from `$NO_SHOW_CONFIG` or the default path
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path, with `NO_SHOW__SECTION__KEY`
    /// environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("NO_SHOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                predict_subject: "appointments.predict".to_string(),
                reload_subject: default_reload_subject(),
            },
            models: ModelsConfig {
                models_dir: "models".to_string(),
                active_model: default_active_model(),
                onnx_threads: 1,
            },
            training: TrainingConfig {
                data_path: "data/appointments.csv".to_string(),
                model_name: default_model_name(),
                test_size: default_test_size(),
                seed: default_seed(),
                logistic: LogisticRegressionConfig::default(),
            },
            pipeline: PipelineConfig {
                workers: 4,
                metrics_interval_secs: default_metrics_interval(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.nats.predict_subject, "appointments.predict");
        assert_eq!(config.models.active_model, "logistic_regression");
        assert_eq!(config.training.test_size, 0.2);
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.training.logistic.c, 1.0);
    }

    #[test]
    fn test_load_from_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[nats]
url = "nats://broker:4222"
predict_subject = "clinic.predict"

[models]
models_dir = "/srv/models"

[training]
data_path = "data/appointments.csv"

[training.logistic]
c = 0.5
max_iter = 200
learning_rate = 0.1
tolerance = 0.0001

[pipeline]
workers = 8

[logging]
level = "debug"
format = "pretty"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.nats.url, "nats://broker:4222");
        assert_eq!(config.nats.reload_subject, "appointments.model.reload");
        assert_eq!(config.models.active_model, "logistic_regression");
        assert_eq!(config.models.onnx_threads, 1);
        assert_eq!(config.training.model_name, "logistic_regression");
        assert_eq!(config.training.logistic.max_iter, 200);
        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.pipeline.metrics_interval_secs, 30);
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = AppConfig::load_from_path(path).unwrap();
        assert_eq!(config.pipeline.workers, AppConfig::default().pipeline.workers);
        // `train` then `no-show-service` works without further setup
        assert_eq!(config.models.active_model, config.training.model_name);
    }

    #[test]
    fn test_default_serves_what_train_writes() {
        let config = AppConfig::default();
        assert_eq!(config.models.active_model, config.training.model_name);
    }
}
