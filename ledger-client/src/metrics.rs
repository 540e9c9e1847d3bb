//! Prometheus metrics for the client engine

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Histogram,
};

lazy_static! {
    /// Promotions and reattachments issued
    pub static ref RETRY_ACTIONS_TOTAL: CounterVec = register_counter_vec!(
        "client_retry_actions_total",
        "Promotions and reattachments issued",
        &["action"]
    )
    .unwrap();

    /// Attempts spent per confirmation loop
    pub static ref INCLUSION_ATTEMPTS: Histogram = register_histogram!(
        "client_inclusion_attempts",
        "Attempts spent before a block was included or the loop gave up",
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 40.0, 80.0]
    )
    .unwrap();

    /// Consolidation transfers confirmed
    pub static ref CONSOLIDATION_TRANSFERS_TOTAL: Counter = register_counter!(
        "client_consolidation_transfers_total",
        "Consolidation transfers confirmed"
    )
    .unwrap();
}
