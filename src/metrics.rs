use std::sync::Arc;

use axum::{http::StatusCode, routing::get, Router};
use opentelemetry::metrics::{Counter, Gauge, Histogram, MeterProvider};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,
    pub contract: String,

    // Event processing metrics
    pub events_processed: Counter<u64>,
    pub events_failed: Counter<u64>,
    pub decode_failures: Counter<u64>,
    pub event_processing_time: Histogram<f64>,

    // Subscription metrics
    pub reconnects: Counter<u64>,

    // Retry queue metrics
    pub retry_queue_depth: Gauge<u64>,
    pub dead_lettered: Counter<u64>,
}

impl Metrics {
    pub fn new(contract: String) -> Result<Self, MetricError> {
        // Create a new prometheus registry
        let registry = prometheus::Registry::new();

        // Configure OpenTelemetry to use this registry
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        // Set up a meter to create instruments
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("listener_metrics");

        let events_processed = meter
            .u64_counter("listener_events_processed")
            .with_description("Total number of events persisted")
            .build();

        let events_failed = meter
            .u64_counter("listener_events_failed")
            .with_description("Total number of failed decode or persist attempts")
            .build();

        let decode_failures = meter
            .u64_counter("listener_decode_failures")
            .with_description("Number of logs dropped as undecodable")
            .build();

        let event_processing_time = meter
            .f64_histogram("listener_event_processing")
            .with_description("Time spent decoding and persisting a single event")
            .with_boundaries(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ])
            .with_unit("s")
            .build();

        let reconnects = meter
            .u64_counter("listener_reconnects")
            .with_description("Number of subscription restarts")
            .build();

        let retry_queue_depth = meter
            .u64_gauge("listener_retry_queue_depth")
            .with_description("Events waiting in the retry queue")
            .build();

        let dead_lettered = meter
            .u64_counter("listener_dead_lettered")
            .with_description("Events evicted from the retry queue")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            contract,
            events_processed,
            events_failed,
            decode_failures,
            event_processing_time,
            reconnects,
            retry_queue_depth,
            dead_lettered,
        })
    }

    pub fn labels(&self) -> [KeyValue; 1] {
        [KeyValue::new("contract", self.contract.clone())]
    }

    /// Prometheus scrape endpoint, merged into the control server's router.
    pub fn router(&self) -> Router {
        let registry = self.registry.clone();
        Router::new().route("/metrics", get(move || metrics_handler(registry.clone())))
    }
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> (StatusCode, String) {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    match String::from_utf8(buffer) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
