//! Structured logging and Prometheus metrics for bookrec.
//!
//! - `init_logging()` installs a tracing subscriber (JSON in production)
//! - `Metrics` is a static facade over lazily registered counters/gauges

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
