// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Event bus integration.
//!
//! Publishes work lifecycle and field-update (audit) events to a Redis
//! Pub/Sub channel consumed by the audit-log and indexing services:
//! - FIELD_UPDATE: one changed field of a work, with the audit record as detail
//! - WORK_CREATE / WORK_PUBLISH / WORK_UNPUBLISH / WORK_DELETE: lifecycle
//!
//! In dev mode events are logged instead of published.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditPublisher};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    FieldUpdate,
    WorkCreate,
    WorkPublish,
    WorkUnpublish,
    WorkDelete,
}

/// Envelope sent on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    pub event_name: EventName,
    pub source: String,
    pub namespace: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Event bus configuration
#[derive(Clone)]
pub struct EventBusConfig {
    pub redis_url: Option<String>,
    pub channel: String,
    pub source: String,
    pub dev_mode: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            channel: "librabus:events".to_string(),
            source: "libra-works".to_string(),
            dev_mode: true,
        }
    }
}

/// Trait for bus transports
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, channel: &str, payload: String) -> Result<(), AppError>;
}

/// Redis Pub/Sub transport
pub struct RedisTransport {
    client: redis::Client,
}

impl RedisTransport {
    pub fn new(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create Redis client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl EventTransport for RedisTransport {
    async fn send(&self, channel: &str, payload: String) -> Result<(), AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to connect to Redis: {}", e)))?;

        let receivers: i64 = conn.publish(channel, payload).await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to publish event: {}", e)))?;

        tracing::debug!(channel, receivers, "event published");
        Ok(())
    }
}

/// Dev-mode transport that only logs
pub struct LogTransport;

#[async_trait]
impl EventTransport for LogTransport {
    async fn send(&self, channel: &str, payload: String) -> Result<(), AppError> {
        tracing::info!(channel, payload, "dev mode: event not sent to bus");
        Ok(())
    }
}

/// Publisher for work events
#[derive(Clone)]
pub struct EventBus {
    transport: Arc<dyn EventTransport>,
    channel: String,
    source: String,
}

impl EventBus {
    pub fn new(transport: impl EventTransport + 'static, channel: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            transport: Arc::new(transport),
            channel: channel.into(),
            source: source.into(),
        }
    }

    /// Build a bus from configuration; dev mode or a missing Redis URL logs only.
    pub fn from_config(config: &EventBusConfig) -> Result<Self, AppError> {
        match (&config.redis_url, config.dev_mode) {
            (Some(url), false) => {
                tracing::info!(channel = %config.channel, source = %config.source, "Event bus configured");
                Ok(Self::new(RedisTransport::new(url)?, &config.channel, &config.source))
            }
            (None, false) => {
                tracing::warn!("no Redis URL for the event bus; events will only be logged");
                Ok(Self::new(LogTransport, &config.channel, &config.source))
            }
            (_, true) => Ok(Self::new(LogTransport, &config.channel, &config.source)),
        }
    }

    pub async fn publish_event(&self, event: &BusEvent) -> Result<(), AppError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize event: {}", e)))?;
        self.transport.send(&self.channel, payload).await
    }

    fn envelope(&self, event_name: EventName, namespace: &str, identifier: &str) -> BusEvent {
        BusEvent {
            event_name,
            source: self.source.clone(),
            namespace: namespace.to_string(),
            identifier: identifier.to_string(),
            detail: None,
        }
    }

    /// Lifecycle notification; failures are logged.
    pub async fn notify(&self, event_name: EventName, namespace: &str, identifier: &str) {
        tracing::info!(?event_name, namespace, identifier, "publish work event");
        let event = self.envelope(event_name, namespace, identifier);
        if let Err(error) = self.publish_event(&event).await {
            tracing::error!(%error, ?event_name, identifier, "unable to publish work event");
        }
    }
}

#[async_trait]
impl AuditPublisher for EventBus {
    async fn publish(&self, audit: &AuditEvent) -> Result<(), AppError> {
        let detail = serde_json::to_value(audit)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize audit event: {}", e)))?;
        let mut event = self.envelope(EventName::FieldUpdate, &audit.namespace, &audit.work_id);
        event.detail = Some(detail);
        self.publish_event(&event).await
    }
}
