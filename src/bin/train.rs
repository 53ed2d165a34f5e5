//! Training entry point
//!
//! Fits the logistic regression on the configured CSV, saves its manifest
//! and the fitted preprocessor to the models directory. With `--onnx`, also
//! registers a gradient boosting export trained behind that preprocessor.
//!
//! Usage: train [data_path] [--onnx <file.onnx>]

use anyhow::{Context, Result};
use no_show_pipeline::{
    config::AppConfig, data_source::CsvDataSource, logging, models::ModelDirectory,
    models::onnx::GRADIENT_BOOSTING_MODEL_NAME, training::TrainingRun,
};
use tracing::info;

fn main() -> Result<()> {
    let config = AppConfig::load()?;
    logging::init(&config.logging)?;

    let mut data_path = config.training.data_path.clone();
    let mut onnx_file = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--onnx" => onnx_file = Some(args.next().context("--onnx needs a file")?),
            _ => data_path = arg,
        }
    }
    let source = CsvDataSource::new(&data_path);
    let store = ModelDirectory::from_config(&config.models);

    info!(
        data = %data_path,
        models_dir = %store.root().display(),
        model = %config.training.model_name,
        "Starting training"
    );

    let trained = TrainingRun::from_config(&config.training)
        .execute(&source, &store)
        .with_context(|| format!("Training on {} failed", data_path))?;

    let preprocessor_path = store
        .save_preprocessor(trained.model.preprocessor())
        .context("Failed to save preprocessor")?;
    info!(path = %preprocessor_path.display(), "Preprocessor saved");

    if let Some(file) = onnx_file {
        let manifest = store
            .register_onnx(GRADIENT_BOOSTING_MODEL_NAME, &file, trained.model.preprocessor())
            .with_context(|| format!("Failed to register ONNX export {}", file))?;
        info!(path = %manifest.display(), export = %file, "ONNX export registered");
    }

    let report = serde_json::to_string_pretty(&trained.report)?;
    info!("Training report:\n{}", report);

    if store.active_model() != config.training.model_name {
        info!(
            active_model = %store.active_model(),
            "The service keeps serving the active model; set models.active_model to serve this one"
        );
    }

    Ok(())
}
