//! Prometheus metrics for the querier service

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};

pub static INGESTER_CLIENTS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "cinder_querier_ingester_clients",
        "The current number of ingester clients"
    )
    .unwrap()
});

pub static FANOUT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cinder_querier_fanout_requests_total",
        "Per-ingester fan-out calls by outcome",
        &["status"]
    )
    .unwrap()
});

pub static QUERY_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "cinder_querier_query_duration_seconds",
        "Query latency",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
