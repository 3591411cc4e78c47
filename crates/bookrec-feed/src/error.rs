//! Feed error types.

use bookrec_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Connection-level failure; the worker reconnects.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or out-of-order message; dropped, the worker keeps streaming.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unknown or refused symbol; never retried.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Reconnect budget used up; the worker is `Failed`.
    #[error("Exhausted {attempts} reconnect attempts, last error: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    #[error("Catalog error: {0}")]
    Catalog(#[from] RegistryError),
}

impl FeedError {
    /// Short label used for drop metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Subscription(_) => "subscription",
            Self::ExhaustedRetries { .. } => "exhausted_retries",
            Self::Catalog(_) => "catalog",
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
