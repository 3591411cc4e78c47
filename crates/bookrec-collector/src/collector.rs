//! Order-book collector for one exchange.
//!
//! Owns the instrument catalog, snapshot store, subscription manager, and
//! (when persistence is enabled) the recorder actor. Nothing is global:
//! two collectors in one process share no state.

use crate::config::{CollectorConfig, SubscriptionPlan};
use crate::error::{CollectorError, CollectorResult};
use bookrec_core::{Instrument, InstrumentKind, OptionRight, Snapshot};
use bookrec_feed::{
    NoopHandler, SnapshotStore, SubscriptionManager, SubscriptionState, UpdateHandler,
    WorkerContext,
};
use bookrec_persistence::{
    cleanup_old_files, spawn_recorder, RecorderHandle, RecorderStats, SnapshotRecorder,
};
use bookrec_registry::{DeribitMetaClient, InstrumentCatalog, InstrumentFilter, MetadataSource};
use bookrec_ws::{FeedConnector, WsFeedConnector};
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Collector {
    config: CollectorConfig,
    catalog: Arc<InstrumentCatalog>,
    store: Arc<SnapshotStore>,
    manager: SubscriptionManager,
    recorder: Option<RecorderHandle>,
    recorder_task: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Collector {
    /// Collector talking to the configured exchange endpoints.
    ///
    /// Must be called inside a tokio runtime when persistence is enabled.
    pub fn new(config: CollectorConfig) -> CollectorResult<Self> {
        Self::with_handler(config, Arc::new(NoopHandler))
    }

    pub fn with_handler(
        config: CollectorConfig,
        handler: Arc<dyn UpdateHandler>,
    ) -> CollectorResult<Self> {
        let source = DeribitMetaClient::new(config.metadata_url.clone(), config.exchange_id.clone())?;
        let connector = WsFeedConnector::new(config.connection_config());
        Self::with_parts(config, Arc::new(source), Arc::new(connector), handler)
    }

    /// Collector over arbitrary metadata and feed sources.
    pub fn with_parts(
        config: CollectorConfig,
        source: Arc<dyn MetadataSource>,
        connector: Arc<dyn FeedConnector>,
        handler: Arc<dyn UpdateHandler>,
    ) -> CollectorResult<Self> {
        config.validate()?;
        if source.exchange_id() != config.exchange_id {
            return Err(CollectorError::Config(format!(
                "metadata source serves {}, collector is {}",
                source.exchange_id(),
                config.exchange_id
            )));
        }

        let store = Arc::new(SnapshotStore::new(config.history_config()));
        let mut ctx = WorkerContext::new(config.worker_config(), connector, store.clone())
            .with_handler(handler)
            .with_max_workers(config.max_concurrent_workers);

        let mut recorder_task = None;
        let recorder = if config.persistence.enabled {
            let recorder = SnapshotRecorder::new(config.persistence.recorder_config(&config.exchange_id));
            let (handle, task) = spawn_recorder(recorder, config.persistence.channel_capacity);
            ctx = ctx.with_recorder(handle.clone());
            recorder_task = Some(task);
            Some(handle)
        } else {
            None
        };

        info!(
            exchange = %config.exchange_id,
            ws_url = %config.ws_url,
            persistence = config.persistence.enabled,
            "Collector created"
        );

        Ok(Self {
            catalog: Arc::new(InstrumentCatalog::new(source)),
            store,
            manager: SubscriptionManager::new(ctx),
            recorder,
            recorder_task: Mutex::new(recorder_task),
            stopped: AtomicBool::new(false),
            config,
        })
    }

    pub fn exchange_id(&self) -> &str {
        &self.config.exchange_id
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn catalog(&self) -> &InstrumentCatalog {
        &self.catalog
    }

    /// Recorder actor handle, if persistence is enabled.
    pub fn recorder(&self) -> Option<&RecorderHandle> {
        self.recorder.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> CollectorResult<()> {
        if self.is_stopped() {
            return Err(CollectorError::Stopped(self.config.exchange_id.clone()));
        }
        Ok(())
    }

    /// Load the instrument catalog and apply file retention.
    ///
    /// An unreachable metadata endpoint is fatal. Calling again after a
    /// failure retries the load.
    pub async fn start(&self) -> CollectorResult<()> {
        self.ensure_running()?;
        self.catalog.load().await?;

        if let Some(max_age) = self.config.persistence.retention() {
            let root = self
                .config
                .persistence
                .recorder_config(&self.config.exchange_id)
                .root_dir;
            match tokio::task::spawn_blocking(move || cleanup_old_files(&root, max_age)).await {
                Ok(Ok(removed)) if removed > 0 => info!(removed, "Removed expired snapshot files"),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "Snapshot file cleanup failed"),
                Err(e) => warn!(error = %e, "Snapshot file cleanup task failed"),
            }
        }

        info!(
            exchange = %self.config.exchange_id,
            instruments = self.catalog.len(),
            "Collector started"
        );
        Ok(())
    }

    /// Catalog instruments matching `filter`, sorted by symbol.
    pub async fn list_instruments(&self, filter: &InstrumentFilter) -> CollectorResult<Vec<Instrument>> {
        Ok(self.catalog.list(filter).await?)
    }

    /// Subscribe explicit symbols of one kind.
    ///
    /// Every symbol must be in the catalog with the given kind; otherwise
    /// nothing is subscribed. Returns the symbols that got a new worker.
    pub async fn subscribe(
        &self,
        symbols: &[String],
        kind: InstrumentKind,
    ) -> CollectorResult<Vec<String>> {
        self.ensure_running()?;

        let mut problems = Vec::new();
        for symbol in symbols {
            match self.catalog.get(symbol).await? {
                None => problems.push(format!("{symbol}: unknown instrument")),
                Some(inst) if inst.kind != kind => {
                    problems.push(format!("{symbol}: kind is {}, expected {kind}", inst.kind));
                }
                Some(_) => {}
            }
        }
        if !problems.is_empty() {
            warn!(exchange = %self.config.exchange_id, ?problems, "Subscription refused");
            return Err(CollectorError::Subscription(problems.join("; ")));
        }

        Ok(self.manager.subscribe(symbols, kind))
    }

    /// Subscribe every catalog instrument matching `filter`.
    pub async fn subscribe_matching(&self, filter: &InstrumentFilter) -> CollectorResult<Vec<String>> {
        self.ensure_running()?;
        Ok(self.manager.subscribe_matching(&self.catalog, filter).await?)
    }

    pub async fn subscribe_all_futures(&self, currency: Option<&str>) -> CollectorResult<Vec<String>> {
        self.ensure_running()?;
        Ok(self
            .manager
            .subscribe_all_futures(&self.catalog, currency)
            .await?)
    }

    pub async fn subscribe_all_options(
        &self,
        currency: Option<&str>,
        right: Option<OptionRight>,
        expiry: Option<NaiveDate>,
    ) -> CollectorResult<Vec<String>> {
        self.ensure_running()?;
        Ok(self
            .manager
            .subscribe_all_options(&self.catalog, currency, right, expiry)
            .await?)
    }

    /// Explicit symbols (default kind future) or a catalog filter.
    pub async fn apply_plan(&self, plan: &SubscriptionPlan) -> CollectorResult<Vec<String>> {
        if plan.symbols.is_empty() {
            self.subscribe_matching(&plan.filter()).await
        } else {
            let kind = plan.kind.unwrap_or(InstrumentKind::Future);
            self.subscribe(&plan.symbols, kind).await
        }
    }

    /// Stop the symbol's worker and drop its stored snapshots.
    pub async fn unsubscribe(&self, symbol: &str) -> bool {
        self.manager.unsubscribe(symbol).await
    }

    pub fn get_latest(&self, symbol: &str) -> Option<Arc<Snapshot>> {
        self.store.get_latest(symbol)
    }

    /// Stored history, oldest first.
    pub fn get_history(&self, symbol: &str) -> Vec<Arc<Snapshot>> {
        self.store.get_history(symbol)
    }

    /// The newest `limit` stored snapshots, oldest first.
    pub fn get_history_limit(&self, symbol: &str, limit: usize) -> Vec<Arc<Snapshot>> {
        self.store.get_history_limit(symbol, limit)
    }

    pub fn all_latest(&self) -> Vec<Arc<Snapshot>> {
        self.store.all_latest()
    }

    pub fn subscription_state(&self, symbol: &str) -> Option<SubscriptionState> {
        self.manager.state(symbol)
    }

    pub fn subscription_states(&self) -> Vec<SubscriptionState> {
        self.manager.states()
    }

    pub fn active_symbols(&self) -> Vec<String> {
        self.manager.active_symbols()
    }

    /// `None` when persistence is disabled.
    pub async fn recorder_stats(&self) -> CollectorResult<Option<RecorderStats>> {
        match &self.recorder {
            Some(recorder) => Ok(Some(recorder.stats().await?)),
            None => Ok(None),
        }
    }

    /// Stop every worker, then flush and close the recorder.
    ///
    /// Idempotent; later calls return `Ok(())` immediately.
    pub async fn stop(&self) -> CollectorResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(exchange = %self.config.exchange_id, "Stopping collector");
        self.manager.stop().await;

        let mut result = Ok(());
        if let Some(recorder) = &self.recorder {
            result = recorder.shutdown().await.map_err(CollectorError::from);
        }
        let task = self.recorder_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Recorder task ended abnormally");
            }
        }

        info!(exchange = %self.config.exchange_id, "Collector stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceSettings;
    use bookrec_core::Price;
    use bookrec_feed::WorkerStatus;
    use bookrec_persistence::{list_files, read_jsonl, OutputFormat};
    use bookrec_registry::StaticSource;
    use bookrec_ws::{BookData, BoxFuture, FeedEvent, FeedStream, WsResult};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Every connection yields one book and stays open.
    struct OneBookConnector;

    struct OneBookStream {
        symbol: String,
        sent: bool,
    }

    impl FeedConnector for OneBookConnector {
        fn connect<'a>(
            &'a self,
            instrument: &'a str,
        ) -> BoxFuture<'a, WsResult<Box<dyn FeedStream>>> {
            Box::pin(async move {
                let stream: Box<dyn FeedStream> = Box::new(OneBookStream {
                    symbol: instrument.to_string(),
                    sent: false,
                });
                Ok(stream)
            })
        }
    }

    impl FeedStream for OneBookStream {
        fn next_event(&mut self) -> BoxFuture<'_, WsResult<FeedEvent>> {
            Box::pin(async move {
                if self.sent {
                    std::future::pending::<()>().await;
                }
                self.sent = true;
                Ok(FeedEvent::Book(BookData {
                    timestamp: 1_700_000_000_000,
                    instrument_name: self.symbol.clone(),
                    change_id: None,
                    bids: vec![(dec!(100), dec!(1))],
                    asks: vec![(dec!(101), dec!(1))],
                }))
            })
        }

        fn close(&mut self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    fn instruments() -> Vec<Instrument> {
        let expiry = NaiveDate::from_ymd_opt(2024, 12, 27).unwrap();
        vec![
            Instrument::future("BTC-PERPETUAL", "deribit", "BTC", None),
            Instrument::future("ETH-PERPETUAL", "deribit", "ETH", None),
            Instrument::option(
                "BTC-27DEC24-50000-C",
                "deribit",
                "BTC",
                expiry,
                dec!(50000),
                OptionRight::Call,
            ),
        ]
    }

    fn collector(config: CollectorConfig) -> Collector {
        Collector::with_parts(
            config,
            Arc::new(StaticSource::new("deribit", instruments())),
            Arc::new(OneBookConnector),
            Arc::new(NoopHandler),
        )
        .unwrap()
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_read_latest() {
        let c = collector(CollectorConfig::default());
        c.start().await.unwrap();

        let spawned = c
            .subscribe(&["BTC-PERPETUAL".to_string()], InstrumentKind::Future)
            .await
            .unwrap();
        assert_eq!(spawned, vec!["BTC-PERPETUAL"]);

        wait_for(|| c.get_latest("BTC-PERPETUAL").is_some()).await;
        let snap = c.get_latest("BTC-PERPETUAL").unwrap();
        assert_eq!(snap.mid(), Some(Price(dec!(100.5))));
        assert_eq!(snap.exchange, "deribit");
        assert_eq!(c.get_history("BTC-PERPETUAL").len(), 1);
        assert_eq!(
            c.subscription_state("BTC-PERPETUAL").unwrap().status,
            WorkerStatus::Streaming
        );

        c.stop().await.unwrap();
        assert!(c.active_symbols().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_rejects_unknown_and_wrong_kind() {
        let c = collector(CollectorConfig::default());
        c.start().await.unwrap();

        let err = c
            .subscribe(
                &["BTC-PERPETUAL".to_string(), "DOGE-PERPETUAL".to_string()],
                InstrumentKind::Future,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::Subscription(ref m) if m.contains("DOGE-PERPETUAL")));

        let err = c
            .subscribe(&["BTC-PERPETUAL".to_string()], InstrumentKind::Option)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::Subscription(_)));

        // Nothing was spawned for the valid symbol either.
        assert!(c.subscription_states().is_empty());
        c.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_plan_with_filter() {
        let c = collector(CollectorConfig::default());
        c.start().await.unwrap();

        let plan = SubscriptionPlan {
            exchange: "deribit".to_string(),
            kind: Some(InstrumentKind::Future),
            currency: Some("ETH".to_string()),
            ..Default::default()
        };
        assert_eq!(c.apply_plan(&plan).await.unwrap(), vec!["ETH-PERPETUAL"]);

        let options = c
            .subscribe_all_options(Some("BTC"), Some(OptionRight::Call), None)
            .await
            .unwrap();
        assert_eq!(options, vec!["BTC-27DEC24-50000-C"]);
        c.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_final() {
        let c = collector(CollectorConfig::default());
        c.start().await.unwrap();
        c.stop().await.unwrap();
        c.stop().await.unwrap();

        let err = c
            .subscribe(&["BTC-PERPETUAL".to_string()], InstrumentKind::Future)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::Stopped(_)));
    }

    #[tokio::test]
    async fn test_unsubscribe_clears_store() {
        let c = collector(CollectorConfig::default());
        c.start().await.unwrap();
        c.subscribe_all_futures(None).await.unwrap();
        wait_for(|| c.all_latest().len() == 2).await;

        assert!(c.unsubscribe("ETH-PERPETUAL").await);
        assert!(c.get_latest("ETH-PERPETUAL").is_none());
        assert!(!c.unsubscribe("ETH-PERPETUAL").await);
        assert_eq!(c.active_symbols(), vec!["BTC-PERPETUAL"]);
        c.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_persistence_written_under_exchange_dir() {
        let dir = TempDir::new().unwrap();
        let config = CollectorConfig {
            persistence: PersistenceSettings {
                enabled: true,
                root_dir: dir.path().to_path_buf(),
                formats: vec![OutputFormat::Jsonl, OutputFormat::Parquet],
                ..Default::default()
            },
            ..Default::default()
        };
        let c = collector(config);
        c.start().await.unwrap();
        c.subscribe(&["BTC-PERPETUAL".to_string()], InstrumentKind::Future)
            .await
            .unwrap();
        wait_for(|| c.get_latest("BTC-PERPETUAL").is_some()).await;

        // The store is updated before the snapshot reaches the recorder.
        let mut stats = c.recorder_stats().await.unwrap().unwrap();
        for _ in 0..200 {
            if stats.total_snapshots > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            stats = c.recorder_stats().await.unwrap().unwrap();
        }
        assert_eq!(stats.total_snapshots, 1);
        assert_eq!(stats.distinct_symbols, 1);
        c.stop().await.unwrap();

        let root = dir.path().join("deribit");
        let jsonl = list_files(&root, OutputFormat::Jsonl).unwrap();
        assert_eq!(jsonl.len(), 1);
        assert_eq!(read_jsonl(&jsonl[0]).unwrap().len(), 1);
        assert_eq!(list_files(&root, OutputFormat::Parquet).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_source_rejected() {
        let result = Collector::with_parts(
            CollectorConfig::default(),
            Arc::new(StaticSource::new("okx", Vec::new())),
            Arc::new(OneBookConnector),
            Arc::new(NoopHandler),
        );
        assert!(matches!(result, Err(CollectorError::Config(_))));
    }
}
