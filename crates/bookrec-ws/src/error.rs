//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connect timed out after {0}ms")]
    ConnectTimeout(u64),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Message parse error: {0}")]
    ParseError(String),

    #[error("Subscription rejected: {0}")]
    SubscriptionRejected(String),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Whether the exchange refused the subscription itself.
    ///
    /// Rejections are not retried; every other variant is a transport
    /// failure that the caller may reconnect from.
    pub fn is_subscription_rejection(&self) -> bool {
        matches!(self, Self::SubscriptionRejected(_))
    }
}

pub type WsResult<T> = Result<T, WsError>;
