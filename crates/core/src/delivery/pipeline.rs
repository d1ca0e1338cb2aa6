use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::delivery::{DeliveryChannel, OutboundMessage};

pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryFailure {
    #[error("message has no recipient")]
    MissingRecipient,
    #[error("no delivery channels are configured")]
    NoChannels,
    #[error("every delivery channel failed; last error: {last_error}")]
    AllChannelsFailed { last_error: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeliveryResult {
    Success { channel: String },
    Failure(DeliveryFailure),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub channel: String,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub result: DeliveryResult,
    pub attempts: Vec<DeliveryAttempt>,
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        matches!(self.result, DeliveryResult::Success { .. })
    }

    fn failed(failure: DeliveryFailure, attempts: Vec<DeliveryAttempt>) -> Self {
        Self { result: DeliveryResult::Failure(failure), attempts }
    }
}

struct ChannelRoute {
    channel: Arc<dyn DeliveryChannel>,
    timeout: Duration,
}

/// Ordered fallback over delivery channels. Each channel is tried at most once per message.
#[derive(Default)]
pub struct DeliveryPipeline {
    routes: Vec<ChannelRoute>,
}

impl DeliveryPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: Arc<dyn DeliveryChannel>, timeout: Duration) -> Self {
        self.routes.push(ChannelRoute { channel, timeout });
        self
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.routes.iter().map(|route| route.channel.name().to_string()).collect()
    }

    pub async fn deliver(&self, message: &OutboundMessage) -> DeliveryReport {
        if message.recipient.trim().is_empty() {
            warn!(
                event_name = "delivery.missing_recipient",
                po_id = message.po_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown"),
                subject = %message.subject,
                "message has no recipient; no channel attempted"
            );
            return DeliveryReport::failed(DeliveryFailure::MissingRecipient, Vec::new());
        }
        if self.routes.is_empty() {
            return DeliveryReport::failed(DeliveryFailure::NoChannels, Vec::new());
        }

        let mut attempts = Vec::with_capacity(self.routes.len());
        let mut last_error = String::new();

        for route in &self.routes {
            let channel = route.channel.name().to_string();
            let started_at = Utc::now();
            let started = Instant::now();
            let outcome = match tokio::time::timeout(route.timeout, route.channel.send(message)).await
            {
                Ok(Ok(())) => AttemptOutcome::Success,
                Ok(Err(error)) => AttemptOutcome::Failure(error.to_string()),
                Err(_) => AttemptOutcome::Failure(format!(
                    "timed out after {}ms",
                    route.timeout.as_millis()
                )),
            };
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match &outcome {
                AttemptOutcome::Success => info!(
                    event_name = "delivery.attempt",
                    channel = %channel,
                    duration_ms,
                    outcome = "success",
                    recipient = %message.recipient,
                    "delivery attempt succeeded"
                ),
                AttemptOutcome::Failure(detail) => {
                    warn!(
                        event_name = "delivery.attempt",
                        channel = %channel,
                        duration_ms,
                        outcome = "failure",
                        error = %detail,
                        "delivery attempt failed"
                    );
                    last_error = detail.clone();
                }
            }

            let succeeded = outcome == AttemptOutcome::Success;
            attempts.push(DeliveryAttempt {
                channel: channel.clone(),
                started_at,
                outcome,
                duration_ms,
            });
            if succeeded {
                return DeliveryReport { result: DeliveryResult::Success { channel }, attempts };
            }
        }

        DeliveryReport::failed(DeliveryFailure::AllChannelsFailed { last_error }, attempts)
    }
}
