//! Durable, partition-by-`doc_id` topic log for pipeline lifecycle events.
//!
//! Producer publishes are best-effort from the pipeline's point of view:
//! the Metadata Store is the system of record, the bus is a side-channel
//! for observability and downstream fan-out (see [`BusError`]).

use crate::config::Config;
use crate::error::BusError;
use crate::metrics::Metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

pub const TOPIC_DISCOVERED: &str = "court.documents.discovered";
pub const TOPIC_FETCHED: &str = "court.documents.fetched";
pub const TOPIC_PARSED: &str = "court.documents.parsed";
pub const TOPIC_FAILED: &str = "court.documents.failed";

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredEvent {
    pub doc_id: Uuid,
    pub case_id: Option<Uuid>,
    pub url: String,
    pub discovered_at: DateTime<Utc>,
    pub hash_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchedEvent {
    pub doc_id: Uuid,
    pub storage_path: String,
    pub sha256: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParsedEvent {
    pub doc_id: Uuid,
    pub version_id: Uuid,
    pub law_refs: Vec<String>,
    pub parsed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedEvent {
    pub doc_id: Uuid,
    pub stage: String,
    pub error: String,
    pub error_details: Option<String>,
    pub failed_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish_discovered(&self, event: &DiscoveredEvent) -> Result<(), BusError>;
    async fn publish_fetched(&self, event: &FetchedEvent) -> Result<(), BusError>;
    async fn publish_parsed(&self, event: &ParsedEvent) -> Result<(), BusError>;
    async fn publish_failed(&self, event: &FailedEvent) -> Result<(), BusError>;
}

/// Kafka-backed bus: idempotent producer, `doc_id` as partition key.
pub struct KafkaEventBus {
    producer: FutureProducer,
    metrics: Arc<Metrics>,
}

impl KafkaEventBus {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let bootstrap = config
            .kafka_bootstrap_servers
            .clone()
            .ok_or_else(|| anyhow::anyhow!("kafka_bootstrap_servers is required when kafka_enabled=true"))?;
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "1")
            .set("message.timeout.ms", "10000")
            .create()?;
        Ok(Self { producer, metrics })
    }

    async fn publish<T: Serialize + ?Sized>(&self, topic: &str, key: &str, payload: &T) -> Result<(), BusError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| BusError::Unavailable(format!("serialize failed: {e}")))?;
        let record = FutureRecord::to(topic).key(key).payload(&body);
        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok(_) => {
                self.metrics.bus_events_published_total.with_label_values(&[topic, "success"]).inc();
                Ok(())
            }
            Err((e, _)) => {
                self.metrics.bus_events_published_total.with_label_values(&[topic, "failed"]).inc();
                self.metrics.bus_events_failed_total.with_label_values(&[topic, "send_error"]).inc();
                warn!(topic, error = %e, "event bus publish failed");
                Err(BusError::Unavailable(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish_discovered(&self, event: &DiscoveredEvent) -> Result<(), BusError> {
        self.publish(TOPIC_DISCOVERED, &event.doc_id.to_string(), event).await
    }
    async fn publish_fetched(&self, event: &FetchedEvent) -> Result<(), BusError> {
        self.publish(TOPIC_FETCHED, &event.doc_id.to_string(), event).await
    }
    async fn publish_parsed(&self, event: &ParsedEvent) -> Result<(), BusError> {
        self.publish(TOPIC_PARSED, &event.doc_id.to_string(), event).await
    }
    async fn publish_failed(&self, event: &FailedEvent) -> Result<(), BusError> {
        self.publish(TOPIC_FAILED, &event.doc_id.to_string(), event).await
    }
}

/// No-op bus used when `kafka_enabled = false`. Still counts publish
/// attempts so dashboards read consistently whether or not a bus is wired.
pub struct NullEventBus {
    metrics: Arc<Metrics>,
}

impl NullEventBus {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }

    fn count(&self, topic: &str) {
        self.metrics.bus_events_published_total.with_label_values(&[topic, "success"]).inc();
    }
}

#[async_trait]
impl EventBus for NullEventBus {
    async fn publish_discovered(&self, _event: &DiscoveredEvent) -> Result<(), BusError> {
        self.count(TOPIC_DISCOVERED);
        Ok(())
    }
    async fn publish_fetched(&self, _event: &FetchedEvent) -> Result<(), BusError> {
        self.count(TOPIC_FETCHED);
        Ok(())
    }
    async fn publish_parsed(&self, _event: &ParsedEvent) -> Result<(), BusError> {
        self.count(TOPIC_PARSED);
        Ok(())
    }
    async fn publish_failed(&self, _event: &FailedEvent) -> Result<(), BusError> {
        self.count(TOPIC_FAILED);
        Ok(())
    }
}

pub fn build_event_bus(config: &Config, metrics: Arc<Metrics>) -> anyhow::Result<Arc<dyn EventBus>> {
    if config.kafka_enabled {
        Ok(Arc::new(KafkaEventBus::new(config, metrics)?))
    } else {
        Ok(Arc::new(NullEventBus::new(metrics)))
    }
}
