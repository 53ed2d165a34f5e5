//! NATS subscriptions for prediction requests and model reloads

use crate::config::NatsConfig;
use crate::types::SchemaError;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use serde_json::Value;
use tracing::info;

/// Subscribes the service to its request subjects
pub struct AppointmentConsumer {
    client: Client,
    predict_subject: String,
    reload_subject: String,
}

impl AppointmentConsumer {
    pub fn new(client: Client, config: &NatsConfig) -> Self {
        Self {
            client,
            predict_subject: config.predict_subject.clone(),
            reload_subject: config.reload_subject.clone(),
        }
    }

    /// Subscribe to prediction requests
    pub async fn subscribe_predictions(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.predict_subject.clone()).await?;
        info!(subject = %self.predict_subject, "Subscribed to prediction subject");
        Ok(subscriber)
    }

    /// Subscribe to model reload triggers
    pub async fn subscribe_reloads(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.reload_subject.clone()).await?;
        info!(subject = %self.reload_subject, "Subscribed to model reload subject");
        Ok(subscriber)
    }

    pub fn predict_subject(&self) -> &str {
        &self.predict_subject
    }

    pub fn reload_subject(&self) -> &str {
        &self.reload_subject
    }
}

/// Parse a request payload as JSON. Undecodable bytes are a schema error,
/// reported to the caller as malformed input.
pub fn decode_request(payload: &[u8]) -> Result<Value, SchemaError> {
    serde_json::from_slice(payload)
        .map_err(|e| SchemaError::InvalidField(format!("payload is not valid JSON: {}", e)))
}
