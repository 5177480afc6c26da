use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    // Product cache lookups
    pub static ref CACHE_REQUESTS: CounterVec = register_counter_vec!(
        "commerce_cache_requests_total",
        "Total number of product cache lookups",
        &["status"]
    )
    .expect("metric cannot be created");

    // Search index writes and queries
    pub static ref SEARCH_INDEX_OPERATIONS: CounterVec = register_counter_vec!(
        "commerce_search_index_operations_total",
        "Total number of search index operations",
        &["operation", "status"]
    )
    .expect("metric cannot be created");

    // Order events handed to the broker
    pub static ref EVENTS_PUBLISHED: CounterVec = register_counter_vec!(
        "commerce_events_published_total",
        "Total number of order events by publish outcome",
        &["status"]
    )
    .expect("metric cannot be created");

    // Fulfillment worker deliveries
    pub static ref WORKER_DELIVERIES: CounterVec = register_counter_vec!(
        "commerce_worker_deliveries_total",
        "Total number of queue deliveries handled by the fulfillment worker",
        &["outcome"]
    )
    .expect("metric cannot be created");

    pub static ref OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "commerce_operation_duration_seconds",
        "Catalog and order operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("metric cannot be created");
}

/// Outcome label of a cache lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
    Error,
}

impl CacheLookup {
    fn as_str(&self) -> &'static str {
        match self {
            CacheLookup::Hit => "hit",
            CacheLookup::Miss => "miss",
            CacheLookup::Error => "error",
        }
    }
}

/// Get all metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_cache_lookup(lookup: CacheLookup) {
    CACHE_REQUESTS.with_label_values(&[lookup.as_str()]).inc();
}

pub fn record_search_operation(operation: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    SEARCH_INDEX_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// `status` is one of `published`, `failed`, `dropped`
pub fn record_event_publish(status: &str) {
    EVENTS_PUBLISHED.with_label_values(&[status]).inc();
}

pub fn record_worker_delivery(outcome: &str) {
    WORKER_DELIVERIES.with_label_values(&[outcome]).inc();
}

pub fn record_operation_duration(operation: &str, duration_secs: f64) {
    OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}
