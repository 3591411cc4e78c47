//! Scripted in-process feed for worker and manager tests.

use bookrec_ws::{BookData, BoxFuture, FeedConnector, FeedEvent, FeedStream, WsError, WsResult};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted step of a connection.
#[derive(Debug, Clone)]
pub enum Step {
    /// Connect fails with a transport error. Only meaningful first.
    Refuse(String),
    /// Exchange refuses the subscription. Only meaningful first.
    Reject(String),
    Event(FeedEvent),
    /// Stream read fails.
    Fail(String),
    /// Stream never yields again.
    Hang,
}

pub fn book(symbol: &str, ts_ms: i64, bid: Decimal, ask: Decimal) -> FeedEvent {
    FeedEvent::Book(BookData {
        timestamp: ts_ms,
        instrument_name: symbol.to_string(),
        change_id: None,
        bids: vec![(bid, dec!(1))],
        asks: vec![(ask, dec!(1))],
    })
}

type Fallback = Arc<dyn Fn(&str) -> Vec<Step> + Send + Sync>;

#[derive(Default)]
struct Scripts {
    shared: VecDeque<Vec<Step>>,
    per_symbol: HashMap<String, VecDeque<Vec<Step>>>,
}

/// Connector replaying one script per connection attempt.
#[derive(Clone)]
pub struct ScriptedConnector {
    scripts: Arc<Mutex<Scripts>>,
    fallback: Option<Fallback>,
    open: Arc<AtomicUsize>,
    peak_open: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
    close_delay: Duration,
}

impl ScriptedConnector {
    /// Scripts consumed in order by any symbol.
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(Scripts {
                shared: scripts.into(),
                per_symbol: HashMap::new(),
            })),
            fallback: None,
            open: Arc::new(AtomicUsize::new(0)),
            peak_open: Arc::new(AtomicUsize::new(0)),
            connects: Arc::new(AtomicUsize::new(0)),
            close_delay: Duration::ZERO,
        }
    }

    /// Every connection streams one valid book and then stays open.
    pub fn live() -> Self {
        let mut connector = Self::new(Vec::new());
        connector.fallback = Some(Arc::new(|symbol: &str| {
            vec![Step::Event(book(symbol, 1_000, dec!(100), dec!(101))), Step::Hang]
        }));
        connector
    }

    /// Scripts used only for `symbol`, ahead of the shared ones.
    pub fn with_symbol(self, symbol: &str, scripts: Vec<Vec<Step>>) -> Self {
        self.scripts
            .lock()
            .per_symbol
            .insert(symbol.to_string(), scripts.into());
        self
    }

    /// Every `close()` takes `delay` before the stream counts as closed.
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    /// Most streams ever open at the same time.
    pub fn peak_open_streams(&self) -> usize {
        self.peak_open.load(Ordering::SeqCst)
    }

    /// Streams connected and not yet closed.
    pub fn open_streams(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn next_script(&self, symbol: &str) -> Option<Vec<Step>> {
        let mut scripts = self.scripts.lock();
        if let Some(script) = scripts.per_symbol.get_mut(symbol).and_then(VecDeque::pop_front) {
            return Some(script);
        }
        if let Some(script) = scripts.shared.pop_front() {
            return Some(script);
        }
        drop(scripts);
        self.fallback.as_ref().map(|f| f(symbol))
    }
}

impl FeedConnector for ScriptedConnector {
    fn connect<'a>(&'a self, instrument: &'a str) -> BoxFuture<'a, WsResult<Box<dyn FeedStream>>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let steps: VecDeque<Step> = self
                .next_script(instrument)
                .ok_or_else(|| WsError::ConnectionFailed("no script left".to_string()))?
                .into();
            match steps.front() {
                Some(Step::Refuse(reason)) => {
                    return Err(WsError::ConnectionFailed(reason.clone()));
                }
                Some(Step::Reject(reason)) => {
                    return Err(WsError::SubscriptionRejected(reason.clone()));
                }
                _ => {}
            }
            // Let a concurrent cancel or unsubscribe observe the connect.
            tokio::time::sleep(Duration::from_millis(1)).await;
            let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_open.fetch_max(now_open, Ordering::SeqCst);
            let stream: Box<dyn FeedStream> = Box::new(ScriptedStream {
                steps,
                open: self.open.clone(),
                close_delay: self.close_delay,
                closed: false,
            });
            Ok(stream)
        })
    }
}

struct ScriptedStream {
    steps: VecDeque<Step>,
    open: Arc<AtomicUsize>,
    close_delay: Duration,
    closed: bool,
}

impl FeedStream for ScriptedStream {
    fn next_event(&mut self) -> BoxFuture<'_, WsResult<FeedEvent>> {
        Box::pin(async move {
            match self.steps.pop_front() {
                Some(Step::Event(event)) => Ok(event),
                Some(Step::Fail(reason)) => Err(WsError::ConnectionFailed(reason)),
                Some(Step::Hang) => {
                    self.steps.push_front(Step::Hang);
                    std::future::pending().await
                }
                Some(Step::Refuse(_) | Step::Reject(_)) | None => Err(WsError::ConnectionClosed {
                    code: 1000,
                    reason: "script finished".to_string(),
                }),
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed {
                self.closed = true;
                if !self.close_delay.is_zero() {
                    tokio::time::sleep(self.close_delay).await;
                }
                self.open.fetch_sub(1, Ordering::SeqCst);
            }
        })
    }
}

/// Poll `cond` until it holds; panics after two seconds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
