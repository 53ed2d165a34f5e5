//! No-Show Prediction Service - Main Entry Point
//!
//! Answers appointment prediction requests over NATS request/reply and
//! reloads the serving model on demand.

use anyhow::{Context, Result};
use futures::StreamExt;
use no_show_pipeline::{
    config::AppConfig,
    consumer::{decode_request, AppointmentConsumer},
    logging,
    metrics::{MetricsReporter, PipelineMetrics},
    models::{ModelDirectory, ModelHandle, ModelStore},
    pipeline::{PredictionError, PredictionPipeline},
    producer::{Reply, ResponsePublisher},
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    logging::init(&config.logging)?;

    info!("Starting No-Show Prediction Service");

    // Load the serving model
    let store: Arc<dyn ModelStore> = Arc::new(ModelDirectory::from_config(&config.models));
    let handle = Arc::new(
        ModelHandle::load(store.as_ref()).context("Failed to load the active model")?,
    );
    let pipeline = PredictionPipeline::new();
    info!(
        model = %handle.current().name(),
        features = handle.current().feature_names().len(),
        "Serving model ready"
    );

    let metrics = Arc::new(PipelineMetrics::new());

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = AppointmentConsumer::new(client.clone(), &config.nats);
    let publisher = ResponsePublisher::new(client.clone());

    // Model reloads
    let mut reloads = consumer.subscribe_reloads().await?;
    {
        let handle = handle.clone();
        let store = store.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            while reloads.next().await.is_some() {
                let store = store.clone();
                let handle_for_load = handle.clone();
                let reloaded = tokio::task::spawn_blocking(move || {
                    handle_for_load.reload(store.as_ref())
                })
                .await;
                match reloaded {
                    Ok(Ok(())) => {
                        metrics.record_reload();
                        info!(model = %handle.current().name(), "Model reloaded");
                    }
                    Ok(Err(e)) => error!(error = %e, "Model reload failed; keeping current model"),
                    Err(e) => error!(error = %e, "Model reload task panicked"),
                }
            }
        });
    }

    // Periodic metrics summary
    {
        let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
        tokio::spawn(reporter.start());
    }

    let num_workers = config.pipeline.workers.max(1);
    info!(
        workers = num_workers,
        subject = %consumer.predict_subject(),
        "Starting prediction loop"
    );

    // Semaphore to limit concurrent processing
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    let mut requests = consumer.subscribe_predictions().await?;

    while let Some(message) = requests.next().await {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Worker semaphore closed")?;

        let handle = handle.clone();
        let publisher = publisher.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            let start_time = Instant::now();

            // Hold one model for the whole request, even across a reload
            let model = handle.current();
            let outcome = decode_request(&message.payload)
                .map_err(PredictionError::from)
                .and_then(|payload| pipeline.predict_json(payload, model.as_ref()));
            let latency = start_time.elapsed();

            match &outcome {
                Ok(result) => {
                    metrics.record_prediction(latency, result.no_show_probability);
                    debug!(
                        probability = result.no_show_probability,
                        prediction = result.prediction.as_str(),
                        model = %result.model_used,
                        latency_us = latency.as_micros(),
                        "Prediction served"
                    );
                }
                Err(e) => {
                    metrics.record_error(e.kind(), latency);
                    warn!(error = %e, kind = ?e.kind(), "Prediction request failed");
                }
            }

            let reply = Reply::from_outcome(&outcome);
            match message.reply {
                Some(reply_to) => {
                    if let Err(e) = publisher.publish(reply_to, &reply).await {
                        error!(error = %e, "Failed to publish reply");
                    }
                }
                None => debug!("Request had no reply subject; result not sent"),
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                let latency = metrics.latency_stats();
                info!(
                    processed = count,
                    throughput = format!("{:.1} req/s", metrics.throughput()),
                    avg_latency_us = latency.mean_us,
                    "Processing milestone"
                );
            }

            drop(permit);
        });
    }

    info!("Prediction service shutting down...");
    metrics.log_summary();

    Ok(())
}
