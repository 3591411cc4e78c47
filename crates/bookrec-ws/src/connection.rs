//! Per-instrument feed connections.
//!
//! A [`FeedConnector`] opens one subscribed stream per instrument. The
//! returned [`FeedStream`] yields book events until the transport fails;
//! reconnecting is the caller's job, this module never retries.

use crate::error::{WsError, WsResult};
use crate::message::{subscription_accepted, BookData, WsMessage, WsRequest};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};

/// Boxed future used to keep the connector traits object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Channel name pattern; `{instrument}` and `{depth}` are substituted.
    #[serde(default = "default_channel_template")]
    pub channel_template: String,
    /// Number of levels per side requested from the exchange.
    #[serde(default = "default_depth")]
    pub depth: u32,
    /// Ask the exchange for heartbeats at this interval.
    #[serde(default)]
    pub heartbeat_interval_secs: Option<u64>,
}

fn default_channel_template() -> String {
    "book.{instrument}.none.{depth}.100ms".to_string()
}

fn default_depth() -> u32 {
    20
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            channel_template: default_channel_template(),
            depth: default_depth(),
            heartbeat_interval_secs: None,
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Channel name for an instrument.
    pub fn channel_for(&self, instrument: &str) -> String {
        self.channel_template
            .replace("{instrument}", instrument)
            .replace("{depth}", &self.depth.to_string())
    }
}

/// Event produced by a feed stream.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Full leveled book for the subscribed instrument.
    Book(BookData),
    /// Message on our channel that could not be decoded.
    Malformed(String),
}

/// An open, subscribed feed for one instrument.
pub trait FeedStream: Send {
    /// Next book event. Any error means the transport is gone.
    fn next_event(&mut self) -> BoxFuture<'_, WsResult<FeedEvent>>;

    /// Close the underlying connection. Idempotent.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Opens subscribed feed streams.
pub trait FeedConnector: Send + Sync {
    /// Connect and subscribe to `instrument`.
    ///
    /// Returns once the exchange has acknowledged the subscription.
    /// A refused subscription is [`WsError::SubscriptionRejected`].
    fn connect<'a>(
        &'a self,
        instrument: &'a str,
    ) -> BoxFuture<'a, WsResult<Box<dyn FeedStream>>>;
}

// ============================================================================
// tokio-tungstenite implementation
// ============================================================================

/// WebSocket connector speaking JSON-RPC subscriptions.
#[derive(Debug, Clone)]
pub struct WsFeedConnector {
    config: ConnectionConfig,
}

impl WsFeedConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn open(&self, instrument: &str) -> WsResult<Box<dyn FeedStream>> {
        let channel = self.config.channel_for(instrument);
        debug!(url = %self.config.url, %channel, "Connecting to WebSocket");

        // TCP_NODELAY for lower latency
        let (ws, _response) =
            connect_async_tls_with_config(&self.config.url, None, true, None).await?;

        let mut stream = WsFeedStream {
            ws,
            channel,
            pending: VecDeque::new(),
            next_id: 1,
            closed: false,
        };

        if let Some(interval) = self.config.heartbeat_interval_secs {
            let id = stream.next_request_id();
            stream.send(&WsRequest::set_heartbeat(id, interval)).await?;
        }

        let sub_id = stream.next_request_id();
        let channels = vec![stream.channel.clone()];
        stream.send(&WsRequest::subscribe(sub_id, &channels)).await?;

        if let Err(e) = stream.await_ack(sub_id).await {
            stream.shutdown().await;
            return Err(e);
        }

        info!(channel = %stream.channel, "Subscribed");
        Ok(Box::new(stream))
    }
}

impl FeedConnector for WsFeedConnector {
    fn connect<'a>(
        &'a self,
        instrument: &'a str,
    ) -> BoxFuture<'a, WsResult<Box<dyn FeedStream>>> {
        Box::pin(self.open(instrument))
    }
}

/// Subscribed WebSocket stream for one channel.
pub struct WsFeedStream {
    ws: WsStream,
    channel: String,
    /// Book events received before the subscription ack.
    pending: VecDeque<FeedEvent>,
    next_id: u64,
    closed: bool,
}

impl WsFeedStream {
    fn next_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn send(&mut self, request: &WsRequest) -> WsResult<()> {
        let text = serde_json::to_string(request)?;
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))
    }

    /// Wait for the response to the subscribe request.
    async fn await_ack(&mut self, sub_id: u64) -> WsResult<()> {
        loop {
            let text = match self.read_text().await? {
                Some(text) => text,
                None => continue,
            };
            let msg: WsMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(error = %e, "Unparseable message before subscription ack");
                    continue;
                }
            };
            if let WsMessage::Response(resp) = &msg {
                if resp.id == sub_id {
                    return subscription_accepted(resp, &self.channel)
                        .map_err(WsError::SubscriptionRejected);
                }
            }
            if let Some(event) = self.handle_message(msg).await? {
                self.pending.push_back(event);
            }
        }
    }

    /// Read one frame. `Ok(None)` for control frames that were handled.
    async fn read_text(&mut self) -> WsResult<Option<String>> {
        match self.ws.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(text)),
            Some(Ok(Message::Ping(data))) => {
                trace!("Received ping, sending pong");
                self.ws.send(Message::Pong(data)).await?;
                Ok(None)
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (f.code.into(), f.reason.to_string()))
                    .unwrap_or((1000, "Normal close".to_string()));
                warn!(channel = %self.channel, code, %reason, "WebSocket closed by server");
                self.closed = true;
                Err(WsError::ConnectionClosed { code, reason })
            }
            Some(Ok(_)) => Ok(None),
            Some(Err(e)) => Err(e.into()),
            None => {
                self.closed = true;
                Err(WsError::ConnectionClosed {
                    code: 1006,
                    reason: "Stream ended".to_string(),
                })
            }
        }
    }

    /// Turn a decoded message into an event, answering heartbeats inline.
    async fn handle_message(&mut self, msg: WsMessage) -> WsResult<Option<FeedEvent>> {
        if msg.is_test_request() {
            let id = self.next_request_id();
            self.send(&WsRequest::test(id)).await?;
            return Ok(None);
        }

        match msg.channel() {
            Some(channel) if channel == self.channel => {}
            Some(other) => {
                trace!(channel = %other, "Ignoring message for foreign channel");
                return Ok(None);
            }
            None => return Ok(None),
        }

        let event = match msg.channel_data().map(BookData::from_value) {
            Some(Ok(book)) => FeedEvent::Book(book),
            Some(Err(e)) => FeedEvent::Malformed(e.to_string()),
            None => FeedEvent::Malformed("subscription notification without data".to_string()),
        };
        Ok(Some(event))
    }

    async fn recv(&mut self) -> WsResult<FeedEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        loop {
            let text = match self.read_text().await? {
                Some(text) => text,
                None => continue,
            };
            match serde_json::from_str::<WsMessage>(&text) {
                Ok(msg) => {
                    if let Some(event) = self.handle_message(msg).await? {
                        return Ok(event);
                    }
                }
                Err(e) => return Ok(FeedEvent::Malformed(e.to_string())),
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let id = self.next_request_id();
        let channels = vec![self.channel.clone()];
        if let Err(e) = self.send(&WsRequest::unsubscribe(id, &channels)).await {
            debug!(error = %e, "Unsubscribe before close failed");
        }
        if let Err(e) = self.ws.close(None).await {
            debug!(error = %e, "Close handshake failed");
        }
    }
}

impl FeedStream for WsFeedStream {
    fn next_event(&mut self) -> BoxFuture<'_, WsResult<FeedEvent>> {
        Box::pin(self.recv())
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(self.shutdown())
    }
}
