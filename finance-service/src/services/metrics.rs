//! Prometheus metrics for finance-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Ledger transaction counter by kind and outcome.
pub static TRANSACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finance_transactions_total",
        "Total number of ledger transactions recorded",
        &["kind", "status"] // ok, error - not account ids to avoid cardinality explosion
    )
    .expect("Failed to register transactions_total")
});

/// Rent payment counter by method.
pub static RENT_PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finance_rent_payments_total",
        "Total number of rent payments recorded",
        &["method", "status"]
    )
    .expect("Failed to register rent_payments_total")
});

/// Invoices created by the renewal worker.
pub static INVOICES_RENEWED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finance_invoices_renewed_total",
        "Total number of invoices issued by the renewal worker",
        &["status"]
    )
    .expect("Failed to register invoices_renewed_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finance_errors_total",
        "Total number of errors by type",
        &["error_type"] // db_error, insufficient_funds, conflict, etc.
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "finance_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&TRANSACTIONS_TOTAL);
    Lazy::force(&RENT_PAYMENTS_TOTAL);
    Lazy::force(&INVOICES_RENEWED_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
