//! Collector error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(#[from] bookrec_registry::RegistryError),

    #[error("Feed error: {0}")]
    Feed(#[from] bookrec_feed::FeedError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] bookrec_persistence::PersistenceError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] bookrec_telemetry::TelemetryError),

    /// Unknown or wrong-kind symbols; nothing was subscribed.
    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Collector for {0} is stopped")]
    Stopped(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CollectorResult<T> = Result<T, CollectorError>;

fn describe(failures: &[(String, CollectorError)]) -> String {
    failures
        .iter()
        .map(|(exchange, e)| format!("{exchange}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Exchange {exchange}: {source}")]
    Exchange {
        exchange: String,
        #[source]
        source: CollectorError,
    },

    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    /// Every collector was asked to stop; these failed.
    #[error("{} exchange(s) failed to stop: {}", .0.len(), describe(.0))]
    Stop(Vec<(String, CollectorError)>),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
