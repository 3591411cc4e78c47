//! Prometheus metrics for the bookrec collector.
//!
//! Covers:
//! - Snapshot throughput and dropped messages
//! - Worker lifecycle and reconnects
//! - Crossed books
//! - Recorder output and storage errors
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a programming error that should crash at
//! first use. These panics only occur during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_int_gauge_vec, CounterVec, Encoder, IntGaugeVec, TextEncoder,
};

/// Worker statuses tracked by [`WORKERS`].
pub const WORKER_STATUSES: [&str; 5] =
    ["connecting", "streaming", "reconnecting", "failed", "stopped"];

/// Snapshots applied to the store.
pub static SNAPSHOTS_APPLIED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookrec_snapshots_applied_total",
        "Total order-book snapshots applied to the store",
        &["exchange"]
    )
    .unwrap()
});

/// Feed messages dropped before reaching the store.
/// Labels: reason (malformed/out_of_order)
pub static MESSAGES_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookrec_messages_dropped_total",
        "Total feed messages dropped",
        &["exchange", "reason"]
    )
    .unwrap()
});

/// Worker reconnect attempts.
pub static RECONNECTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookrec_reconnects_total",
        "Total per-instrument reconnect attempts",
        &["exchange"]
    )
    .unwrap()
});

/// Workers per status.
pub static WORKERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "bookrec_workers",
        "Stream workers currently in each status",
        &["exchange", "status"]
    )
    .unwrap()
});

/// Crossed books observed.
pub static CROSSED_BOOKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookrec_crossed_books_total",
        "Total snapshots with best bid above best ask",
        &["exchange"]
    )
    .unwrap()
});

/// Callback panics caught on worker tasks.
pub static CALLBACK_PANICS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookrec_callback_panics_total",
        "Total panics caught in update/error callbacks",
        &["exchange", "callback"]
    )
    .unwrap()
});

/// Records written per output format.
pub static RECORDS_WRITTEN_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookrec_records_written_total",
        "Total snapshot records written",
        &["format"]
    )
    .unwrap()
});

/// Storage errors per output format.
pub static STORAGE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookrec_storage_errors_total",
        "Total storage write failures",
        &["format"]
    )
    .unwrap()
});

/// Buffered rows discarded without being written, per output format.
pub static RECORDS_DISCARDED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "bookrec_records_discarded_total",
        "Total buffered records discarded after repeated write failures",
        &["format"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn snapshot_applied(exchange: &str) {
        SNAPSHOTS_APPLIED_TOTAL.with_label_values(&[exchange]).inc();
    }

    pub fn message_dropped(exchange: &str, reason: &str) {
        MESSAGES_DROPPED_TOTAL
            .with_label_values(&[exchange, reason])
            .inc();
    }

    pub fn reconnect(exchange: &str) {
        RECONNECTS_TOTAL.with_label_values(&[exchange]).inc();
    }

    /// Move one worker between statuses. `from = None` for a new worker.
    pub fn worker_transition(exchange: &str, from: Option<&str>, to: &str) {
        if from == Some(to) {
            return;
        }
        if let Some(from) = from {
            WORKERS.with_label_values(&[exchange, from]).dec();
        }
        WORKERS.with_label_values(&[exchange, to]).inc();
    }

    /// Forget a worker that has been removed.
    pub fn worker_removed(exchange: &str, status: &str) {
        WORKERS.with_label_values(&[exchange, status]).dec();
    }

    pub fn crossed_book(exchange: &str) {
        CROSSED_BOOKS_TOTAL.with_label_values(&[exchange]).inc();
    }

    pub fn callback_panic(exchange: &str, callback: &str) {
        CALLBACK_PANICS_TOTAL
            .with_label_values(&[exchange, callback])
            .inc();
    }

    pub fn record_written(format: &str) {
        RECORDS_WRITTEN_TOTAL.with_label_values(&[format]).inc();
    }

    pub fn storage_error(format: &str) {
        STORAGE_ERRORS_TOTAL.with_label_values(&[format]).inc();
    }

    pub fn records_discarded(format: &str, count: usize) {
        RECORDS_DISCARDED_TOTAL
            .with_label_values(&[format])
            .inc_by(count as f64);
    }

    /// Render the default registry in the Prometheus text format.
    pub fn render() -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&prometheus::gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
