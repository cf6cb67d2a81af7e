//! Prometheus-style metrics for the pipeline.
//!
//! Names and label sets mirror the original service's metrics module
//! (`documents_discovered_total`, `documents_fetched_total{status}`, ...)
//! so existing dashboards would read consistently against this port.
//!
//! Each [`Metrics`] instance owns its own `Registry` rather than the
//! crate-global default one, so a process (or a test binary that builds
//! more than one `Metrics`) never hits a duplicate-registration panic.

use prometheus::{Counter, CounterVec, GaugeVec, HistogramVec, Opts, Registry};

pub struct Metrics {
    pub registry: Registry,
    pub documents_discovered_total: Counter,
    pub documents_fetched_total: CounterVec,
    pub documents_parsed_total: CounterVec,
    pub embeddings_generated_total: Counter,
    pub bus_events_published_total: CounterVec,
    pub bus_events_failed_total: CounterVec,
    pub document_processing_duration_seconds: HistogramVec,
    pub embedding_generation_duration_seconds: HistogramVec,
    pub active_document_processing: GaugeVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let documents_discovered_total =
            Counter::with_opts(Opts::new("documents_discovered_total", "Total documents surfaced by a discovery cycle"))?;
        let documents_fetched_total = CounterVec::new(
            Opts::new("documents_fetched_total", "Total fetch attempts by outcome"),
            &["status"],
        )?;
        let documents_parsed_total = CounterVec::new(
            Opts::new("documents_parsed_total", "Total parse attempts by outcome"),
            &["status"],
        )?;
        let embeddings_generated_total =
            Counter::with_opts(Opts::new("embeddings_generated_total", "Total embedding vectors produced"))?;
        let bus_events_published_total = CounterVec::new(
            Opts::new("bus_events_published_total", "Total events published by topic and status"),
            &["topic", "status"],
        )?;
        let bus_events_failed_total = CounterVec::new(
            Opts::new("bus_events_failed_total", "Total publish failures by topic and error type"),
            &["topic", "error_type"],
        )?;
        let document_processing_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("document_processing_duration_seconds", "Per-stage processing duration"),
            &["stage"],
        )?;
        let embedding_generation_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("embedding_generation_duration_seconds", "Embedding provider call duration"),
            &["model"],
        )?;
        let active_document_processing = GaugeVec::new(
            Opts::new("active_document_processing", "Documents currently in-flight per stage"),
            &["stage"],
        )?;

        registry.register(Box::new(documents_discovered_total.clone()))?;
        registry.register(Box::new(documents_fetched_total.clone()))?;
        registry.register(Box::new(documents_parsed_total.clone()))?;
        registry.register(Box::new(embeddings_generated_total.clone()))?;
        registry.register(Box::new(bus_events_published_total.clone()))?;
        registry.register(Box::new(bus_events_failed_total.clone()))?;
        registry.register(Box::new(document_processing_duration_seconds.clone()))?;
        registry.register(Box::new(embedding_generation_duration_seconds.clone()))?;
        registry.register(Box::new(active_document_processing.clone()))?;

        Ok(Self {
            registry,
            documents_discovered_total,
            documents_fetched_total,
            documents_parsed_total,
            embeddings_generated_total,
            bus_events_published_total,
            bus_events_failed_total,
            document_processing_duration_seconds,
            embedding_generation_duration_seconds,
            active_document_processing,
        })
    }
}

/// RAII guard incrementing/decrementing an in-flight gauge across a stage.
pub struct InFlightGuard<'a> {
    gauge: &'a GaugeVec,
    stage: &'static str,
}

impl<'a> InFlightGuard<'a> {
    pub fn enter(gauge: &'a GaugeVec, stage: &'static str) -> Self {
        gauge.with_label_values(&[stage]).inc();
        Self { gauge, stage }
    }
}

impl<'a> Drop for InFlightGuard<'a> {
    fn drop(&mut self) {
        self.gauge.with_label_values(&[self.stage]).dec();
    }
}
