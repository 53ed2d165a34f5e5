//! Appointment Request Generator
//!
//! Sends random appointment prediction requests to the service over NATS
//! request/reply and logs the replies.
//!
//! Usage: appointment_requester [nats_url] [subject] [count] [malformed_rate] [delay_ms]

use chrono::{Duration as ChronoDuration, Utc};
use no_show_pipeline::types::AppointmentRecord;
use rand::Rng;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

const NEIGHBOURHOODS: &[&str] = &[
    "JARDIM DA PENHA",
    "CENTRO",
    "MARIA ORTIZ",
    "RESISTÊNCIA",
    "ITARARÉ",
    "JARDIM CAMBURI",
    "TABUAZEIRO",
];

/// Appointment request generator
struct AppointmentGenerator {
    rng: rand::rngs::ThreadRng,
    counter: u64,
}

impl AppointmentGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            counter: 0,
        }
    }

    /// A random well-formed request
    fn generate(&mut self) -> AppointmentRecord {
        self.counter += 1;

        let scheduled = Utc::now()
            - ChronoDuration::days(self.rng.gen_range(0..60))
            - ChronoDuration::minutes(self.rng.gen_range(0..600));
        let lead_days = self.rng.gen_range(0..45);
        let appointment = (scheduled + ChronoDuration::days(lead_days)).date_naive();

        let mut record = AppointmentRecord::new(
            &scheduled.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            &format!("{}T00:00:00Z", appointment),
            self.rng.gen_range(0..95),
        );
        record.gender = self.random_choice(&["F", "M"]).to_string();
        record.neighbourhood = self.random_choice(NEIGHBOURHOODS).to_string();
        record.welfare_benefits = u8::from(self.rng.gen_bool(0.1));
        record.hypertension = u8::from(self.rng.gen_bool(0.2));
        record.diabetes = u8::from(self.rng.gen_bool(0.07));
        record.alcoholism = u8::from(self.rng.gen_bool(0.03));
        record.disability_level = if self.rng.gen_bool(0.02) {
            self.rng.gen_range(1..=4)
        } else {
            0
        };
        record.sms_received = u8::from(self.rng.gen_bool(0.3));
        record
    }

    /// A request missing a required field
    fn generate_malformed(&mut self) -> anyhow::Result<Value> {
        let mut payload = serde_json::to_value(self.generate())?;
        if let Some(object) = payload.as_object_mut() {
            object.remove("age");
        }
        Ok(payload)
    }

    fn payload(&mut self, malformed_rate: f64) -> anyhow::Result<Value> {
        if self.rng.gen_bool(malformed_rate) {
            self.generate_malformed()
        } else {
            Ok(serde_json::to_value(self.generate())?)
        }
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("appointment_requester=info".parse()?),
        )
        .init();

    info!("Starting Appointment Request Generator");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args
        .get(2)
        .map(|s| s.as_str())
        .unwrap_or("appointments.predict");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let malformed_rate: f64 = args
        .get(4)
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.05)
        .clamp(0.0, 1.0);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        malformed_rate = malformed_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, malformed_rate, delay_ms).await;
        }
    };

    let mut generator = AppointmentGenerator::new();
    let mut predictions = 0;
    let mut likely_no_shows = 0;
    let mut errors = 0;
    let mut failed_requests = 0;

    info!("Sending {} prediction requests...", count);

    for i in 0..count {
        let payload = serde_json::to_vec(&generator.payload(malformed_rate)?)?;

        match client.request(subject.to_string(), payload.into()).await {
            Ok(reply) => {
                let body: Value = serde_json::from_slice(&reply.payload)?;
                if body.get("error").is_some() {
                    errors += 1;
                    warn!(reply = %body, "Service returned an error");
                } else {
                    predictions += 1;
                    if body["prediction"] == "Likely no-show" {
                        likely_no_shows += 1;
                    }
                    if (i + 1) % 10 == 0 || i == 0 {
                        info!(reply = %body, "Sample reply {}", i + 1);
                    }
                }
            }
            Err(e) => {
                failed_requests += 1;
                warn!(error = %e, "Request failed");
            }
        }

        if (i + 1) % 10 == 0 {
            info!(
                "Sent {}/{} requests ({} predictions, {} likely no-show, {} errors)",
                i + 1,
                count,
                predictions,
                likely_no_shows,
                errors
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! {} requests: {} predictions ({} likely no-show), {} error replies, {} failed",
        count, predictions, likely_no_shows, errors, failed_requests
    );

    Ok(())
}

async fn run_dry_mode(count: u64, malformed_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = AppointmentGenerator::new();

    for i in 0..count {
        let json = serde_json::to_string_pretty(&generator.payload(malformed_rate)?)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample request {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
