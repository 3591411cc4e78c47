//! Integration tests for bookrec-collector.
//!
//! These tests drive real WebSocket connections against a local mock
//! exchange:
//! - Subscription handshake and rejection
//! - Streaming into the store and recorder
//! - Reconnection after the server drops the socket

pub mod common;
