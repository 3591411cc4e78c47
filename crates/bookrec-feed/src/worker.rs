//! Per-symbol stream worker.
//!
//! State machine:
//! ```text
//! Connecting -> Streaming -> Reconnecting -> Streaming | Failed
//! any -> Stopped (cancellation only)
//! ```
//!
//! One worker owns one symbol's connection, normalizer, and store slot.
//! The connection is closed on every exit path before `run` returns.

use crate::error::FeedError;
use crate::handler::{dispatch_error, dispatch_update, NoopHandler, UpdateHandler};
use crate::normalizer::BookNormalizer;
use crate::store::SnapshotStore;
use bookrec_core::{InstrumentKind, Snapshot};
use bookrec_persistence::RecorderHandle;
use bookrec_telemetry::Metrics;
use bookrec_ws::{BackoffConfig, FeedConnector, FeedEvent, FeedStream, WsError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Waiting for a slot, connecting, or subscribed but no valid message yet.
    Connecting,
    Streaming,
    /// Transport lost; backing off or reconnecting.
    Reconnecting,
    /// Gave up. Terminal until the symbol is subscribed again.
    Failed,
    /// Cancelled.
    Stopped,
}

impl WorkerStatus {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Whether a worker in this status still holds its symbol.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionState {
    pub symbol: String,
    pub kind: InstrumentKind,
    pub status: WorkerStatus,
    /// Consecutive transport failures since the last valid message.
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub messages_applied: u64,
    pub messages_dropped: u64,
    pub crossed_books: u64,
    /// Timestamp of the last applied snapshot.
    pub last_update: Option<DateTime<Utc>>,
}

impl SubscriptionState {
    pub fn new(symbol: impl Into<String>, kind: InstrumentKind) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
            status: WorkerStatus::Connecting,
            reconnect_attempts: 0,
            last_error: None,
            messages_applied: 0,
            messages_dropped: 0,
            crossed_books: 0,
            last_update: None,
        }
    }
}

pub type SharedState = Arc<RwLock<SubscriptionState>>;

/// Reconnect and timeout policy shared by all workers of a collector.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Exchange id used for snapshots, logs, and metric labels.
    pub exchange: String,
    pub connect_timeout: Duration,
    /// No message for this long is a transport failure. `None` disables.
    pub stale_timeout: Option<Duration>,
    /// Consecutive failures before `Failed`. 0 = unlimited.
    pub max_reconnect_attempts: u32,
    pub backoff: BackoffConfig,
}

impl WorkerConfig {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            connect_timeout: Duration::from_secs(10),
            stale_timeout: None,
            max_reconnect_attempts: 10,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Everything a worker shares with its manager.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<WorkerConfig>,
    pub connector: Arc<dyn FeedConnector>,
    pub store: Arc<SnapshotStore>,
    pub handler: Arc<dyn UpdateHandler>,
    pub recorder: Option<RecorderHandle>,
    /// Caps concurrently connected workers when set.
    pub slots: Option<Arc<Semaphore>>,
}

impl WorkerContext {
    pub fn new(
        config: WorkerConfig,
        connector: Arc<dyn FeedConnector>,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            store,
            handler: Arc::new(NoopHandler),
            recorder: None,
            slots: None,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn UpdateHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_recorder(mut self, recorder: RecorderHandle) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Cap concurrently connected workers. 0 = no cap.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.slots = (max > 0).then(|| Arc::new(Semaphore::new(max)));
        self
    }
}

/// How one connection ended.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    Transport(String),
    Rejected(String),
}

pub struct StreamWorker {
    ctx: WorkerContext,
    symbol: String,
    state: SharedState,
    normalizer: BookNormalizer,
    cancel: CancellationToken,
}

impl StreamWorker {
    pub fn new(
        ctx: WorkerContext,
        symbol: impl Into<String>,
        state: SharedState,
        cancel: CancellationToken,
    ) -> Self {
        let symbol = symbol.into();
        let normalizer = BookNormalizer::new(symbol.clone(), ctx.config.exchange.clone());
        Self {
            ctx,
            symbol,
            state,
            normalizer,
            cancel,
        }
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    fn exchange(&self) -> &str {
        &self.ctx.config.exchange
    }

    fn set_status(&self, to: WorkerStatus) {
        let from = std::mem::replace(&mut self.state.write().status, to);
        if from != to {
            Metrics::worker_transition(self.exchange(), Some(from.as_str()), to.as_str());
            debug!(symbol = %self.symbol, %from, %to, "Worker status changed");
        }
    }

    /// Run until cancelled or failed.
    pub async fn run(mut self) {
        let _permit = match self.ctx.slots.clone() {
            Some(slots) => {
                trace!(symbol = %self.symbol, "Waiting for worker slot");
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        self.set_status(WorkerStatus::Stopped);
                        return;
                    }
                    permit = slots.acquire_owned() => permit.ok(),
                }
            }
            None => None,
        };

        info!(symbol = %self.symbol, exchange = %self.exchange(), "Worker started");

        loop {
            match self.session().await {
                SessionEnd::Cancelled => break,
                SessionEnd::Rejected(reason) => {
                    self.fail(FeedError::Subscription(reason));
                    return;
                }
                SessionEnd::Transport(reason) => {
                    let attempts = {
                        let mut state = self.state.write();
                        state.reconnect_attempts += 1;
                        state.last_error = Some(reason.clone());
                        state.reconnect_attempts
                    };
                    Metrics::reconnect(self.exchange());

                    let max = self.ctx.config.max_reconnect_attempts;
                    if max > 0 && attempts >= max {
                        self.fail(FeedError::ExhaustedRetries {
                            attempts,
                            last_error: reason,
                        });
                        return;
                    }

                    self.set_status(WorkerStatus::Reconnecting);
                    let delay = self.ctx.config.backoff.delay_for(attempts);
                    warn!(
                        symbol = %self.symbol,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Reconnecting"
                    );

                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.cancel.cancelled() => break,
                    }
                }
            }
        }

        self.set_status(WorkerStatus::Stopped);
        info!(symbol = %self.symbol, "Worker stopped");
    }

    fn fail(&self, err: FeedError) {
        {
            let mut state = self.state.write();
            state.last_error = Some(err.to_string());
        }
        self.set_status(WorkerStatus::Failed);
        error!(symbol = %self.symbol, error = %err, "Worker failed");
        dispatch_error(self.ctx.handler.as_ref(), self.exchange(), &self.symbol, &err);
    }

    /// One connection: connect, stream, close.
    async fn session(&mut self) -> SessionEnd {
        let timeout = self.ctx.config.connect_timeout;
        let connect = tokio::time::timeout(timeout, self.ctx.connector.connect(&self.symbol));

        let mut stream = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return SessionEnd::Cancelled,
            result = connect => match result {
                Err(_) => {
                    let err = WsError::ConnectTimeout(timeout.as_millis() as u64);
                    return SessionEnd::Transport(err.to_string());
                }
                Ok(Err(e)) if e.is_subscription_rejection() => {
                    return SessionEnd::Rejected(e.to_string());
                }
                Ok(Err(e)) => return SessionEnd::Transport(e.to_string()),
                Ok(Ok(stream)) => stream,
            },
        };

        debug!(symbol = %self.symbol, "Feed subscribed");
        let end = self.stream_loop(stream.as_mut()).await;
        stream.close().await;
        end
    }

    async fn stream_loop(&mut self, stream: &mut dyn FeedStream) -> SessionEnd {
        loop {
            let event = {
                let next = stream.next_event();
                match self.ctx.config.stale_timeout {
                    Some(limit) => tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return SessionEnd::Cancelled,
                        result = tokio::time::timeout(limit, next) => match result {
                            Ok(event) => event,
                            Err(_) => {
                                return SessionEnd::Transport(format!(
                                    "no message for {}ms",
                                    limit.as_millis()
                                ));
                            }
                        },
                    },
                    None => tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return SessionEnd::Cancelled,
                        event = next => event,
                    },
                }
            };

            match event {
                Err(e) => return SessionEnd::Transport(e.to_string()),
                Ok(FeedEvent::Malformed(reason)) => self.drop_message("malformed", &reason),
                Ok(FeedEvent::Book(book)) => match self.normalizer.normalize(&book) {
                    Ok(snapshot) => self.apply(snapshot).await,
                    Err(rejection) => {
                        self.drop_message(rejection.reason(), &rejection.to_string())
                    }
                },
            }
        }
    }

    fn drop_message(&self, reason: &'static str, detail: &str) {
        self.state.write().messages_dropped += 1;
        Metrics::message_dropped(self.exchange(), reason);
        debug!(symbol = %self.symbol, reason, detail, "Dropped message");
    }

    async fn apply(&mut self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        let crossed = snapshot.is_crossed();
        if crossed {
            Metrics::crossed_book(self.exchange());
            debug!(
                symbol = %self.symbol,
                best_bid = ?snapshot.best_bid(),
                best_ask = ?snapshot.best_ask(),
                "Crossed book"
            );
        }

        self.ctx.store.apply(snapshot.clone());

        let was = {
            let mut state = self.state.write();
            state.messages_applied += 1;
            if crossed {
                state.crossed_books += 1;
            }
            state.last_update = Some(snapshot.timestamp);
            state.reconnect_attempts = 0;
            state.status
        };
        if was != WorkerStatus::Streaming {
            self.set_status(WorkerStatus::Streaming);
            info!(symbol = %self.symbol, "Streaming");
        }
        Metrics::snapshot_applied(self.exchange());

        dispatch_update(self.ctx.handler.as_ref(), self.exchange(), &snapshot);

        if let Some(recorder) = &self.ctx.recorder {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {}
                result = recorder.record(snapshot) => {
                    if let Err(e) = result {
                        warn!(symbol = %self.symbol, error = %e, "Snapshot not recorded");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::HistoryConfig;
    use crate::testing::{book, ScriptedConnector, Step};
    use rust_decimal_macros::dec;

    fn context(connector: ScriptedConnector, max_attempts: u32) -> WorkerContext {
        let mut config = WorkerConfig::new("test");
        config.connect_timeout = Duration::from_millis(200);
        config.max_reconnect_attempts = max_attempts;
        config.backoff = BackoffConfig::fixed(1);
        WorkerContext::new(
            config,
            Arc::new(connector),
            Arc::new(SnapshotStore::new(HistoryConfig::default())),
        )
    }

    fn shared(symbol: &str) -> SharedState {
        Arc::new(RwLock::new(SubscriptionState::new(symbol, InstrumentKind::Future)))
    }

    #[tokio::test]
    async fn test_out_of_order_and_malformed_are_dropped() {
        let connector = ScriptedConnector::new(vec![vec![
            Step::Event(book("X-PERP", 2_000, dec!(100), dec!(101))),
            Step::Event(book("X-PERP", 1_000, dec!(100), dec!(101))),
            Step::Event(FeedEvent::Malformed("garbage".into())),
            Step::Event(book("X-PERP", 2_000, dec!(100.5), dec!(101))),
            Step::Hang,
        ]]);
        let ctx = context(connector, 3);
        let store = ctx.store.clone();
        let state = shared("X-PERP");
        let cancel = CancellationToken::new();
        let worker = StreamWorker::new(ctx, "X-PERP", state.clone(), cancel.clone());
        let handle = tokio::spawn(worker.run());

        crate::testing::wait_for(|| state.read().messages_applied == 2).await;
        {
            let s = state.read();
            assert_eq!(s.status, WorkerStatus::Streaming);
            assert_eq!(s.messages_dropped, 2);
        }
        let latest = store.get_latest("X-PERP").unwrap();
        assert_eq!(latest.best_bid().unwrap().inner(), dec!(100.5));

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(state.read().status, WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_valid_message_resets_attempts() {
        let connector = ScriptedConnector::new(vec![
            vec![Step::Fail("reset by peer".into())],
            vec![
                Step::Event(book("X-PERP", 1_000, dec!(100), dec!(101))),
                Step::Hang,
            ],
        ]);
        let ctx = context(connector, 5);
        let state = shared("X-PERP");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            StreamWorker::new(ctx, "X-PERP", state.clone(), cancel.clone()).run(),
        );

        crate::testing::wait_for(|| state.read().messages_applied == 1).await;
        {
            let s = state.read();
            assert_eq!(s.reconnect_attempts, 0);
            assert_eq!(s.status, WorkerStatus::Streaming);
            assert!(s.last_error.as_deref().unwrap().contains("reset by peer"));
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let connector = ScriptedConnector::new(vec![vec![Step::Fail("down".into())]]);
        let mut ctx = context(connector.clone(), 0);
        Arc::make_mut(&mut ctx.config).backoff = BackoffConfig::fixed(60_000);
        let state = shared("X-PERP");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            StreamWorker::new(ctx, "X-PERP", state.clone(), cancel.clone()).run(),
        );

        crate::testing::wait_for(|| state.read().status == WorkerStatus::Reconnecting).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly")
            .unwrap();
        assert_eq!(state.read().status, WorkerStatus::Stopped);
        assert_eq!(connector.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_stale_feed_is_transport_failure() {
        let connector = ScriptedConnector::new(vec![vec![
            Step::Event(book("X-PERP", 1_000, dec!(100), dec!(101))),
            Step::Hang,
        ]]);
        let mut ctx = context(connector.clone(), 1);
        Arc::make_mut(&mut ctx.config).stale_timeout = Some(Duration::from_millis(50));
        let state = shared("X-PERP");
        let cancel = CancellationToken::new();

        StreamWorker::new(ctx, "X-PERP", state.clone(), cancel).run().await;

        let s = state.read();
        assert_eq!(s.status, WorkerStatus::Failed);
        assert!(s.last_error.as_deref().unwrap().contains("no message"));
        assert_eq!(connector.open_streams(), 0);
    }
}
