//! Replies to prediction requests over NATS

use crate::pipeline::PredictionError;
use crate::types::{ErrorResponse, PredictionResult};
use anyhow::Result;
use async_nats::{Client, Subject};
use serde::Serialize;
use tracing::debug;

/// Body of a reply: the prediction, or an error payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Prediction(PredictionResult),
    Error(ErrorResponse),
}

impl Reply {
    pub fn from_outcome(outcome: &Result<PredictionResult, PredictionError>) -> Self {
        match outcome {
            Ok(result) => Reply::Prediction(result.clone()),
            Err(err) => Reply::Error(ErrorResponse::new(err.kind(), err.to_string())),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

/// Publishes replies to the requester's inbox
#[derive(Clone)]
pub struct ResponsePublisher {
    client: Client,
}

impl ResponsePublisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Publish `reply` to the reply subject of a request
    pub async fn publish(&self, reply_to: Subject, reply: &Reply) -> Result<()> {
        let payload = serde_json::to_vec(reply)?;

        self.client
            .publish(reply_to.clone(), payload.into())
            .await?;

        debug!(
            reply_to = %reply_to,
            error = reply.is_error(),
            "Published reply"
        );

        Ok(())
    }
}
