//! Serving metrics for the no-show prediction service.

use crate::pipeline::DECISION_THRESHOLD;
use crate::types::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Latency samples kept before the oldest half is discarded.
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Metrics collector for the prediction service
pub struct PipelineMetrics {
    /// Predictions answered successfully
    pub predictions_served: AtomicU64,
    /// Predictions at or above the decision threshold
    pub likely_no_shows: AtomicU64,
    /// Requests rejected as malformed
    pub rejected_inputs: AtomicU64,
    /// Requests that failed inside the model
    pub model_errors: AtomicU64,
    /// Successful model reloads
    pub model_reloads: AtomicU64,
    /// Request latencies (in microseconds)
    latencies: RwLock<Vec<u64>>,
    /// Probability distribution in tenths
    probability_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            predictions_served: AtomicU64::new(0),
            likely_no_shows: AtomicU64::new(0),
            rejected_inputs: AtomicU64::new(0),
            model_errors: AtomicU64::new(0),
            model_reloads: AtomicU64::new(0),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            probability_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a served prediction
    pub fn record_prediction(&self, latency: Duration, probability: f64) {
        self.predictions_served.fetch_add(1, Ordering::Relaxed);
        if probability >= DECISION_THRESHOLD {
            self.likely_no_shows.fetch_add(1, Ordering::Relaxed);
        }

        self.record_latency(latency);

        let bucket = (probability.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        if let Ok(mut buckets) = self.probability_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    /// Record a failed request
    pub fn record_error(&self, kind: ErrorKind, latency: Duration) {
        match kind {
            ErrorKind::MalformedInput => self.rejected_inputs.fetch_add(1, Ordering::Relaxed),
            ErrorKind::ModelError => self.model_errors.fetch_add(1, Ordering::Relaxed),
        };
        self.record_latency(latency);
    }

    pub fn record_reload(&self) {
        self.model_reloads.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency: Duration) {
        if let Ok(mut times) = self.latencies.write() {
            times.push(latency.as_micros() as u64);
            if times.len() > MAX_LATENCY_SAMPLES {
                times.drain(0..MAX_LATENCY_SAMPLES / 2);
            }
        }
    }

    /// Latency statistics over the retained samples
    pub fn latency_stats(&self) -> LatencyStats {
        let times = self
            .latencies
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if times.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let percentile = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: percentile(0.50),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Served predictions per second since start
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions_served.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn probability_distribution(&self) -> [u64; 10] {
        *self
            .probability_buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Log summary statistics
    pub fn log_summary(&self) {
        let served = self.predictions_served.load(Ordering::Relaxed);
        let no_shows = self.likely_no_shows.load(Ordering::Relaxed);
        let no_show_rate = if served > 0 {
            no_shows as f64 / served as f64 * 100.0
        } else {
            0.0
        };
        let latency = self.latency_stats();

        info!(
            served,
            likely_no_shows = no_shows,
            no_show_rate = format!("{:.1}%", no_show_rate),
            rejected_inputs = self.rejected_inputs.load(Ordering::Relaxed),
            model_errors = self.model_errors.load(Ordering::Relaxed),
            model_reloads = self.model_reloads.load(Ordering::Relaxed),
            throughput = format!("{:.1} req/s", self.throughput()),
            "Prediction service summary"
        );
        info!(
            mean_us = latency.mean_us,
            p50_us = latency.p50_us,
            p95_us = latency.p95_us,
            p99_us = latency.p99_us,
            max_us = latency.max_us,
            "Request latency"
        );

        let distribution = self.probability_distribution();
        let total: u64 = distribution.iter().sum();
        for (i, &count) in distribution.iter().enumerate() {
            let pct = if total > 0 {
                count as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            let bar = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "  {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Request latency statistics
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Logs a metrics summary on a fixed interval
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Run until the task is dropped
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.log_summary();
        }
    }
}
