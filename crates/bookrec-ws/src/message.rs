//! WebSocket message types.
//!
//! The feed speaks JSON-RPC 2.0: requests carry an `id` and receive a
//! response with the same `id`; channel data arrives as `subscription`
//! notifications without an `id`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Outgoing
// ============================================================================

/// Outgoing JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl WsRequest {
    fn new(id: u64, method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    /// Subscribe to public channels.
    pub fn subscribe(id: u64, channels: &[String]) -> Self {
        Self::new(
            id,
            "public/subscribe",
            serde_json::json!({ "channels": channels }),
        )
    }

    /// Unsubscribe from public channels.
    pub fn unsubscribe(id: u64, channels: &[String]) -> Self {
        Self::new(
            id,
            "public/unsubscribe",
            serde_json::json!({ "channels": channels }),
        )
    }

    /// Ask the server to send heartbeats every `interval_secs`.
    pub fn set_heartbeat(id: u64, interval_secs: u64) -> Self {
        Self::new(
            id,
            "public/set_heartbeat",
            serde_json::json!({ "interval": interval_secs }),
        )
    }

    /// Answer to a server `test_request` heartbeat.
    pub fn test(id: u64) -> Self {
        Self::new(id, "public/test", serde_json::json!({}))
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Server notification (channel data or heartbeat).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Response to one of our requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// Incoming WebSocket message.
///
/// Notifications are tried first since they never carry an `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsMessage {
    Notification(Notification),
    Response(Response),
}

impl WsMessage {
    /// Channel name if this is a subscription notification.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Notification(n) if n.method == "subscription" => {
                n.params.get("channel").and_then(|v| v.as_str())
            }
            _ => None,
        }
    }

    /// Channel payload if this is a subscription notification.
    pub fn channel_data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Notification(n) if n.method == "subscription" => n.params.get("data"),
            _ => None,
        }
    }

    /// Whether the server expects a `public/test` reply.
    pub fn is_test_request(&self) -> bool {
        match self {
            Self::Notification(n) => {
                n.method == "heartbeat"
                    && n.params.get("type").and_then(|v| v.as_str()) == Some("test_request")
            }
            Self::Response(_) => false,
        }
    }

    pub fn response_id(&self) -> Option<u64> {
        match self {
            Self::Response(r) => Some(r.id),
            Self::Notification(_) => None,
        }
    }
}

/// Leveled book payload of a `book.*` channel.
///
/// Levels are `[price, amount]` pairs; the whole top-N is sent each time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookData {
    /// Exchange timestamp in Unix milliseconds.
    pub timestamp: i64,
    pub instrument_name: String,
    #[serde(default)]
    pub change_id: Option<u64>,
    #[serde(default)]
    pub bids: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    pub asks: Vec<(Decimal, Decimal)>,
}

impl BookData {
    /// Parse a channel payload.
    pub fn from_value(data: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(data.clone())
    }
}

/// Does a subscribe response confirm `channel`?
///
/// The exchange answers with the list of channels it accepted; an error
/// object or a list without the channel is a rejection.
pub fn subscription_accepted(response: &Response, channel: &str) -> Result<(), String> {
    if let Some(err) = &response.error {
        return Err(format!("{} (code {})", err.message, err.code));
    }
    let accepted = response
        .result
        .as_ref()
        .and_then(|r| r.as_array())
        .map(|channels| channels.iter().any(|c| c.as_str() == Some(channel)))
        .unwrap_or(false);
    if accepted {
        Ok(())
    } else {
        Err(format!("channel {channel} not acknowledged"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_subscribe_request_serialization() {
        let req = WsRequest::subscribe(7, &["book.BTC-PERPETUAL.none.20.100ms".to_string()]);
        let v: serde_json::Value = serde_json::to_value(&req).unwrap();

        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], 7);
        assert_eq!(v["method"], "public/subscribe");
        assert_eq!(v["params"]["channels"][0], "book.BTC-PERPETUAL.none.20.100ms");
    }

    #[test]
    fn test_parse_book_notification() {
        let raw = r#"{
            "jsonrpc": "2.0",
            "method": "subscription",
            "params": {
                "channel": "book.BTC-PERPETUAL.none.20.100ms",
                "data": {
                    "timestamp": 1700000000123,
                    "instrument_name": "BTC-PERPETUAL",
                    "change_id": 42,
                    "bids": [[100.0, 1.5], [99.5, 2]],
                    "asks": [[101, 1]]
                }
            }
        }"#;

        let msg: WsMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.channel(), Some("book.BTC-PERPETUAL.none.20.100ms"));

        let book = BookData::from_value(msg.channel_data().unwrap()).unwrap();
        assert_eq!(book.instrument_name, "BTC-PERPETUAL");
        assert_eq!(book.timestamp, 1700000000123);
        assert_eq!(book.change_id, Some(42));
        assert_eq!(book.bids[0], (dec!(100), dec!(1.5)));
        assert_eq!(book.asks.len(), 1);
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{"jsonrpc":"2.0","id":3,"result":["book.ETH-PERPETUAL.none.20.100ms"]}"#;
        let msg: WsMessage = serde_json::from_str(raw).unwrap();

        assert_eq!(msg.response_id(), Some(3));
        assert!(msg.channel().is_none());
    }

    #[test]
    fn test_heartbeat_test_request() {
        let raw = r#"{"jsonrpc":"2.0","method":"heartbeat","params":{"type":"test_request"}}"#;
        let msg: WsMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.is_test_request());

        let raw = r#"{"jsonrpc":"2.0","method":"heartbeat","params":{"type":"heartbeat"}}"#;
        let msg: WsMessage = serde_json::from_str(raw).unwrap();
        assert!(!msg.is_test_request());
    }

    #[test]
    fn test_subscription_accepted() {
        let ok = Response {
            id: 1,
            result: Some(json!(["book.X.none.20.100ms"])),
            error: None,
        };
        assert!(subscription_accepted(&ok, "book.X.none.20.100ms").is_ok());

        let empty = Response {
            id: 1,
            result: Some(json!([])),
            error: None,
        };
        assert!(subscription_accepted(&empty, "book.X.none.20.100ms").is_err());

        let err = Response {
            id: 1,
            result: None,
            error: Some(RpcError {
                code: -32602,
                message: "Invalid params".to_string(),
                data: None,
            }),
        };
        let msg = subscription_accepted(&err, "book.X.none.20.100ms").unwrap_err();
        assert!(msg.contains("Invalid params"));
    }

    #[test]
    fn test_malformed_book_payload() {
        let data = json!({ "instrument_name": "X", "bids": "nope" });
        assert!(BookData::from_value(&data).is_err());
    }
}
