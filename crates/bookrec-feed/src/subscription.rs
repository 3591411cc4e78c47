//! Subscription manager: at most one live worker per symbol.

use crate::error::FeedResult;
use crate::worker::{SharedState, StreamWorker, SubscriptionState, WorkerContext};
use bookrec_core::{InstrumentKind, OptionRight};
use bookrec_registry::{InstrumentCatalog, InstrumentFilter};
use bookrec_telemetry::Metrics;
use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct WorkerEntry {
    id: u64,
    state: SharedState,
    cancel: CancellationToken,
    /// Cancelled once the worker task has returned or unwound.
    done: CancellationToken,
    handle: JoinHandle<()>,
    /// Set by `unsubscribe`; the entry stays until the task is joined.
    retiring: bool,
}

impl WorkerEntry {
    fn is_live(&self) -> bool {
        !self.retiring && self.state.read().status.is_live() && !self.handle.is_finished()
    }
}

/// Spawns, tracks, and cancels stream workers for one exchange.
pub struct SubscriptionManager {
    ctx: WorkerContext,
    /// Parent of every worker token; cancelled when the manager is dropped.
    root: CancellationToken,
    workers: Mutex<HashMap<String, WorkerEntry>>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            root: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    fn exchange(&self) -> &str {
        &self.ctx.config.exchange
    }

    /// Spawn a worker. With a `predecessor`, the new task waits for the
    /// old one to finish and then starts from an empty store slot.
    fn spawn_worker(
        &self,
        symbol: &str,
        kind: InstrumentKind,
        predecessor: Option<CancellationToken>,
    ) -> WorkerEntry {
        let state = Arc::new(RwLock::new(SubscriptionState::new(symbol, kind)));
        let cancel = self.root.child_token();
        let done = CancellationToken::new();
        Metrics::worker_transition(self.exchange(), None, state.read().status.as_str());

        let worker = StreamWorker::new(self.ctx.clone(), symbol, state.clone(), cancel.clone());
        let store = self.ctx.store.clone();
        let owned_symbol = symbol.to_string();
        let guard = done.clone().drop_guard();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            if let Some(previous) = predecessor {
                previous.cancelled().await;
                store.remove(&owned_symbol);
            }
            worker.run().await;
        });
        WorkerEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            state,
            cancel,
            done,
            handle,
            retiring: false,
        }
    }

    /// Start a worker for every symbol that has no live one.
    ///
    /// Returns the symbols that got a new worker. A `Failed` worker is
    /// replaced. A worker still being unsubscribed is replaced too, but
    /// its successor connects only after the old connection is closed.
    /// Must be called inside a tokio runtime.
    pub fn subscribe(&self, symbols: &[String], kind: InstrumentKind) -> Vec<String> {
        let mut workers = self.workers.lock();
        let mut spawned = Vec::new();

        for symbol in symbols {
            let mut predecessor = None;
            if let Some(existing) = workers.get(symbol) {
                if existing.is_live() {
                    debug!(symbol = %symbol, "Already subscribed");
                    continue;
                }
                let status = existing.state.read().status;
                info!(symbol = %symbol, %status, retiring = existing.retiring, "Replacing worker");
                Metrics::worker_removed(self.exchange(), status.as_str());
                predecessor = workers.remove(symbol).map(|old| old.done);
            }

            let entry = self.spawn_worker(symbol, kind, predecessor);
            workers.insert(symbol.clone(), entry);
            spawned.push(symbol.clone());
        }

        if !spawned.is_empty() {
            info!(
                exchange = %self.exchange(),
                %kind,
                count = spawned.len(),
                "Subscribed"
            );
        }
        spawned
    }

    /// Stop a symbol's worker and forget it.
    ///
    /// Returns once the worker task has finished and its connection is
    /// closed. Returns false if the symbol was not subscribed. The store
    /// slot and recorder files are released only if no newer worker took
    /// the symbol over in the meantime.
    pub async fn unsubscribe(&self, symbol: &str) -> bool {
        let (id, done) = {
            let mut workers = self.workers.lock();
            let Some(entry) = workers.get_mut(symbol) else {
                debug!(symbol, "Unsubscribe for unknown symbol");
                return false;
            };
            entry.retiring = true;
            entry.cancel.cancel();
            (entry.id, entry.done.clone())
        };
        done.cancelled().await;

        let released = {
            let mut workers = self.workers.lock();
            if workers.get(symbol).is_some_and(|e| e.id == id) {
                workers.remove(symbol)
            } else {
                None
            }
        };
        let Some(entry) = released else {
            debug!(symbol, "Unsubscribed, entry already released or replaced");
            return true;
        };
        self.release(symbol, entry).await;

        if let Some(recorder) = &self.ctx.recorder {
            if let Err(e) = recorder.flush(Some(symbol)).await {
                warn!(symbol, error = %e, "Recorder flush failed on unsubscribe");
            }
        }
        info!(symbol, "Unsubscribed");
        true
    }

    /// Join a cancelled worker and drop its store slot.
    async fn release(&self, symbol: &str, entry: WorkerEntry) {
        if let Err(e) = entry.handle.await {
            warn!(symbol, error = %e, "Worker task ended abnormally");
        }
        let status = entry.state.read().status;
        Metrics::worker_removed(self.exchange(), status.as_str());
        self.ctx.store.remove(symbol);
    }

    /// Stop every worker, then flush the recorder.
    pub async fn stop(&self) {
        let entries: Vec<(String, WorkerEntry)> = self.workers.lock().drain().collect();
        for (_, entry) in &entries {
            entry.cancel.cancel();
        }
        let count = entries.len();
        for (symbol, entry) in entries {
            self.release(&symbol, entry).await;
        }

        if let Some(recorder) = &self.ctx.recorder {
            if let Err(e) = recorder.flush(None).await {
                warn!(error = %e, "Recorder flush failed on stop");
            }
        }
        info!(exchange = %self.exchange(), workers = count, "Subscription manager stopped");
    }

    /// Subscribe every catalog instrument matching `filter`, each with its
    /// own kind.
    pub async fn subscribe_matching(
        &self,
        catalog: &InstrumentCatalog,
        filter: &InstrumentFilter,
    ) -> FeedResult<Vec<String>> {
        let instruments = catalog.list(filter).await?;
        let mut spawned = Vec::new();
        for kind in [InstrumentKind::Future, InstrumentKind::Option] {
            let symbols: Vec<String> = instruments
                .iter()
                .filter(|i| i.kind == kind)
                .map(|i| i.symbol.clone())
                .collect();
            if !symbols.is_empty() {
                spawned.extend(self.subscribe(&symbols, kind));
            }
        }
        spawned.sort();
        Ok(spawned)
    }

    /// Futures and perpetuals, optionally of one currency.
    pub async fn subscribe_all_futures(
        &self,
        catalog: &InstrumentCatalog,
        currency: Option<&str>,
    ) -> FeedResult<Vec<String>> {
        let mut filter = InstrumentFilter::new().kind(InstrumentKind::Future);
        if let Some(currency) = currency {
            filter = filter.currency(currency);
        }
        self.subscribe_matching(catalog, &filter).await
    }

    pub async fn subscribe_all_options(
        &self,
        catalog: &InstrumentCatalog,
        currency: Option<&str>,
        right: Option<OptionRight>,
        expiry: Option<NaiveDate>,
    ) -> FeedResult<Vec<String>> {
        let mut filter = InstrumentFilter::new().kind(InstrumentKind::Option);
        if let Some(currency) = currency {
            filter = filter.currency(currency);
        }
        if let Some(right) = right {
            filter = filter.option_right(right);
        }
        if let Some(expiry) = expiry {
            filter = filter.expiry(expiry);
        }
        self.subscribe_matching(catalog, &filter).await
    }

    pub fn state(&self, symbol: &str) -> Option<SubscriptionState> {
        self.workers
            .lock()
            .get(symbol)
            .map(|e| e.state.read().clone())
    }

    /// All tracked subscriptions, sorted by symbol.
    pub fn states(&self) -> Vec<SubscriptionState> {
        let mut states: Vec<_> = self
            .workers
            .lock()
            .values()
            .map(|e| e.state.read().clone())
            .collect();
        states.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        states
    }

    /// Symbols with a live worker, sorted.
    pub fn active_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<_> = self
            .workers
            .lock()
            .iter()
            .filter(|(_, e)| e.is_live())
            .map(|(s, _)| s.clone())
            .collect();
        symbols.sort();
        symbols
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.workers
            .lock()
            .get(symbol)
            .is_some_and(WorkerEntry::is_live)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
