//! Prometheus metrics for node access

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static! {
    /// Total node requests
    pub static ref NODE_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "node_requests_total",
        "Total requests sent to ledger nodes",
        &["node", "operation", "status"]
    )
    .unwrap();

    /// Node request duration
    pub static ref NODE_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "node_request_duration_seconds",
        "Node request duration in seconds",
        &["operation"]
    )
    .unwrap();

    /// Failovers to the next node
    pub static ref NODE_FAILOVER_TOTAL: CounterVec = register_counter_vec!(
        "node_failover_total",
        "Requests moved to the next node after a failure",
        &["operation"]
    )
    .unwrap();
}

/// Record the outcome of a single node request
pub(crate) fn record_request(node: &str, operation: &str, ok: bool, elapsed_secs: f64) {
    let status = if ok { "success" } else { "error" };
    NODE_REQUESTS_TOTAL
        .with_label_values(&[node, operation, status])
        .inc();
    NODE_REQUEST_DURATION
        .with_label_values(&[operation])
        .observe(elapsed_secs);
}
