//! WebSocket feed transport for bookrec.
//!
//! Provides per-instrument order-book connections with:
//! - A dyn-compatible connector trait so workers can be driven by any transport
//! - A tokio-tungstenite implementation speaking Deribit-style JSON-RPC
//! - Exponential (capped) or fixed reconnect backoff
//! - Optional exchange heartbeats answered transparently

pub mod backoff;
pub mod connection;
pub mod error;
pub mod message;

pub use backoff::{BackoffConfig, BackoffKind};
pub use connection::{
    BoxFuture, ConnectionConfig, FeedConnector, FeedEvent, FeedStream, WsFeedConnector,
};
pub use error::{WsError, WsResult};
pub use message::{BookData, RpcError, WsMessage, WsRequest};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
