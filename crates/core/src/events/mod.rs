//! In-process event bus with per-type throttling.

pub mod bus;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use crate::config::EventSettings;

pub use bus::EventBus;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    OrderSubmitted,
    OrderApproved,
    OrderRejected,
    OrderCompleted,
    DeliverySucceeded,
    DeliveryFailed,
    ArtifactCacheWarning,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::OrderSubmitted => "order_submitted",
            Self::OrderApproved => "order_approved",
            Self::OrderRejected => "order_rejected",
            Self::OrderCompleted => "order_completed",
            Self::DeliverySucceeded => "delivery_succeeded",
            Self::DeliveryFailed => "delivery_failed",
            Self::ArtifactCacheWarning => "artifact_cache_warning",
            Self::Custom(name) => name,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "order_submitted" => Self::OrderSubmitted,
            "order_approved" => Self::OrderApproved,
            "order_rejected" => Self::OrderRejected,
            "order_completed" => Self::OrderCompleted,
            "delivery_succeeded" => Self::DeliverySucceeded,
            "delivery_failed" => Self::DeliveryFailed,
            "artifact_cache_warning" => Self::ArtifactCacheWarning,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            Self::DeliveryFailed | Self::ArtifactCacheWarning => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub id: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl BusEvent {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            severity: event_type.default_severity(),
            event_type,
            payload,
            published_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubscriberError {
    #[error("subscriber failed: {0}")]
    Failed(String),
}

pub trait EventSubscriber: Send + Sync {
    fn handle(&self, event: &BusEvent) -> Result<(), SubscriberError>;
}

/// Minimum spacing between two emissions of the same event type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub custom_interval: Duration,
    pub overrides: HashMap<EventType, Duration>,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self { custom_interval: Duration::from_secs(5), overrides: HashMap::new() }
    }
}

impl ThrottlePolicy {
    pub fn from_settings(settings: &EventSettings) -> Self {
        Self {
            custom_interval: Duration::from_secs(settings.default_throttle_secs),
            overrides: settings
                .throttle_overrides
                .iter()
                .map(|(name, secs)| (EventType::parse(name), Duration::from_secs(*secs)))
                .collect(),
        }
    }

    pub fn with_override(mut self, event_type: EventType, interval: Duration) -> Self {
        self.overrides.insert(event_type, interval);
        self
    }

    pub fn interval_for(&self, event_type: &EventType) -> Duration {
        if let Some(interval) = self.overrides.get(event_type) {
            return *interval;
        }
        match event_type {
            EventType::OrderSubmitted
            | EventType::OrderApproved
            | EventType::OrderRejected
            | EventType::OrderCompleted => Duration::from_secs(5),
            EventType::DeliverySucceeded
            | EventType::DeliveryFailed
            | EventType::ArtifactCacheWarning => Duration::from_secs(10),
            EventType::Custom(_) => self.custom_interval,
        }
    }
}
