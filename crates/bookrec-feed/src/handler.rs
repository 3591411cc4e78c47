//! User callbacks.

use crate::error::FeedError;
use bookrec_core::Snapshot;
use bookrec_telemetry::Metrics;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Receives applied snapshots and terminal worker errors.
///
/// Called on worker tasks; implementations must not block. A panic in
/// either method is caught and logged and the worker keeps running.
pub trait UpdateHandler: Send + Sync {
    fn on_update(&self, _snapshot: &Snapshot) {}

    /// Called at most once per worker, when it enters `Failed`.
    fn on_error(&self, _symbol: &str, _error: &FeedError) {}
}

/// Handler that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl UpdateHandler for NoopHandler {}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Invoke `on_update`, containing panics. Returns false if it panicked.
pub(crate) fn dispatch_update(
    handler: &dyn UpdateHandler,
    exchange: &str,
    snapshot: &Snapshot,
) -> bool {
    match catch_unwind(AssertUnwindSafe(|| handler.on_update(snapshot))) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                exchange,
                symbol = %snapshot.symbol,
                panic = panic_message(payload.as_ref()),
                "on_update callback panicked"
            );
            Metrics::callback_panic(exchange, "on_update");
            false
        }
    }
}

/// Invoke `on_error`, containing panics. Returns false if it panicked.
pub(crate) fn dispatch_error(
    handler: &dyn UpdateHandler,
    exchange: &str,
    symbol: &str,
    err: &FeedError,
) -> bool {
    match catch_unwind(AssertUnwindSafe(|| handler.on_error(symbol, err))) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                exchange,
                symbol,
                panic = panic_message(payload.as_ref()),
                "on_error callback panicked"
            );
            Metrics::callback_panic(exchange, "on_error");
            false
        }
    }
}
