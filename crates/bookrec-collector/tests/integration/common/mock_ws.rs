//! Mock WebSocket server for integration tests.
//!
//! Speaks just enough JSON-RPC to drive a book subscription:
//! - Answers `public/subscribe` with the accepted channel list, or an
//!   error for rejected instruments
//! - Pushes the configured books on the subscribed channel
//! - Optionally drops the connection after the last book
//! - Records every text frame it receives

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// One book pushed after the subscription ack.
#[derive(Debug, Clone)]
pub struct BookFrame {
    pub timestamp: i64,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

impl BookFrame {
    pub fn top(timestamp: i64, bid: f64, ask: f64) -> Self {
        Self {
            timestamp,
            bids: vec![(bid, 1.0)],
            asks: vec![(ask, 1.0)],
        }
    }
}

/// What the server does for each connection.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub books: Vec<BookFrame>,
    /// Instruments whose subscription is refused with an RPC error.
    pub reject: HashSet<String>,
    /// Close the socket right after the last book.
    pub close_after_books: bool,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockWsServer {
    /// Start a server that acks subscriptions and sends nothing else.
    pub async fn start() -> Self {
        Self::start_with(MockBehavior::default()).await
    }

    /// Start a new mock WebSocket server on an available port.
    pub async fn start_with(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let behavior = Arc::new(behavior);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let messages = messages_clone.clone();
                        let connections = connections_clone.clone();
                        tokio::spawn(handle_connection(stream, behavior.clone(), messages, connections));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            messages,
            connections,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Get the number of connections received.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Get all received messages.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// Received requests with the given JSON-RPC method.
    pub async fn requests(&self, method: &str) -> Vec<Value> {
        self.received_messages()
            .await
            .iter()
            .filter_map(|m| serde_json::from_str::<Value>(m).ok())
            .filter(|v| v.get("method").and_then(Value::as_str) == Some(method))
            .collect()
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// `book.BTC-PERPETUAL.none.20.100ms` -> `BTC-PERPETUAL`.
fn instrument_of(channel: &str) -> &str {
    channel.split('.').nth(1).unwrap_or(channel)
}

fn book_notification(channel: &str, frame: &BookFrame) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "subscription",
        "params": {
            "channel": channel,
            "data": {
                "timestamp": frame.timestamp,
                "instrument_name": instrument_of(channel),
                "bids": frame.bids.iter().map(|(p, s)| json!([p, s])).collect::<Vec<_>>(),
                "asks": frame.asks.iter().map(|(p, s)| json!([p, s])).collect::<Vec<_>>(),
            }
        }
    })
}

async fn handle_connection(
    stream: TcpStream,
    behavior: Arc<MockBehavior>,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
) {
    // Increment connection count
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                // Record the message
                {
                    let mut msgs = messages.lock().await;
                    msgs.push_back(text.clone());
                }

                let Ok(request) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let id = request.get("id").cloned().unwrap_or(Value::Null);
                let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
                let channels: Vec<String> = request["params"]["channels"]
                    .as_array()
                    .map(|a| a.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();

                if method != "public/subscribe" {
                    let ack = json!({ "jsonrpc": "2.0", "id": id, "result": channels });
                    let _ = write.send(Message::Text(ack.to_string())).await;
                    continue;
                }

                if channels
                    .iter()
                    .any(|c| behavior.reject.contains(instrument_of(c)))
                {
                    let err = json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": 10020, "message": "instrument_not_found" }
                    });
                    let _ = write.send(Message::Text(err.to_string())).await;
                    continue;
                }

                let ack = json!({ "jsonrpc": "2.0", "id": id, "result": channels });
                let _ = write.send(Message::Text(ack.to_string())).await;

                for channel in &channels {
                    for frame in &behavior.books {
                        let note = book_notification(channel, frame);
                        let _ = write.send(Message::Text(note.to_string())).await;
                    }
                }
                if behavior.close_after_books {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockWsServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }

    #[test]
    fn test_instrument_of_channel() {
        assert_eq!(instrument_of("book.BTC-PERPETUAL.none.20.100ms"), "BTC-PERPETUAL");
    }
}
