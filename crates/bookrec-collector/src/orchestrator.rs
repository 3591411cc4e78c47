//! Multi-exchange orchestration.

use crate::collector::Collector;
use crate::config::{AppConfig, CollectorConfig, SubscriptionPlan};
use crate::error::{CollectorError, OrchestratorError, OrchestratorResult};
use bookrec_core::Snapshot;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runs one `Collector` per exchange id.
#[derive(Default)]
pub struct ExchangeOrchestrator {
    collectors: RwLock<BTreeMap<String, Arc<Collector>>>,
}

impl ExchangeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build, start, and register a collector.
    ///
    /// A duplicate exchange id is not an error: the running collector is
    /// returned and `config` is ignored.
    pub async fn add_exchange(&self, config: CollectorConfig) -> OrchestratorResult<Arc<Collector>> {
        if let Some(existing) = self.get(&config.exchange_id) {
            warn!(exchange = %config.exchange_id, "Exchange already added, keeping existing collector");
            return Ok(existing);
        }
        let exchange = config.exchange_id.clone();
        let collector = Collector::new(config).map_err(|source| OrchestratorError::Exchange {
            exchange: exchange.clone(),
            source,
        })?;
        self.add_collector(collector).await
    }

    /// Start and register an already built collector.
    pub async fn add_collector(&self, collector: Collector) -> OrchestratorResult<Arc<Collector>> {
        let exchange = collector.exchange_id().to_string();
        if let Some(existing) = self.get(&exchange) {
            warn!(exchange = %exchange, "Exchange already added, keeping existing collector");
            return Ok(existing);
        }

        let wrap = |source: CollectorError| OrchestratorError::Exchange {
            exchange: exchange.clone(),
            source,
        };
        if let Err(e) = collector.start().await {
            // Release the recorder before reporting.
            if let Err(stop_err) = collector.stop().await {
                warn!(exchange = %exchange, error = %stop_err, "Stop after failed start");
            }
            return Err(wrap(e));
        }

        let collector = Arc::new(collector);
        let mut collectors = self.collectors.write();
        // Lost a race with a concurrent add of the same id.
        if let Some(existing) = collectors.get(&exchange) {
            warn!(exchange = %exchange, "Exchange added concurrently, keeping existing collector");
            return Ok(existing.clone());
        }
        collectors.insert(exchange.clone(), collector.clone());
        info!(exchange = %exchange, "Exchange added");
        Ok(collector)
    }

    /// Start every configured exchange, then apply its subscription plans.
    pub async fn from_config(config: &AppConfig) -> OrchestratorResult<Self> {
        let orchestrator = Self::new();
        for exchange in &config.exchanges {
            orchestrator.add_exchange(exchange.clone()).await?;
        }
        for plan in &config.subscriptions {
            let spawned = orchestrator.apply_plan(plan).await?;
            info!(exchange = %plan.exchange, count = spawned.len(), "Subscription plan applied");
        }
        Ok(orchestrator)
    }

    pub async fn apply_plan(&self, plan: &SubscriptionPlan) -> OrchestratorResult<Vec<String>> {
        let collector = self
            .get(&plan.exchange)
            .ok_or_else(|| OrchestratorError::UnknownExchange(plan.exchange.clone()))?;
        collector
            .apply_plan(plan)
            .await
            .map_err(|source| OrchestratorError::Exchange {
                exchange: plan.exchange.clone(),
                source,
            })
    }

    pub fn get(&self, exchange_id: &str) -> Option<Arc<Collector>> {
        self.collectors.read().get(exchange_id).cloned()
    }

    /// Registered exchange ids, sorted.
    pub fn exchange_ids(&self) -> Vec<String> {
        self.collectors.read().keys().cloned().collect()
    }

    fn snapshot_collectors(&self) -> Vec<(String, Arc<Collector>)> {
        self.collectors
            .read()
            .iter()
            .map(|(id, c)| (id.clone(), c.clone()))
            .collect()
    }

    /// Latest snapshot of `symbol` on every exchange that has one.
    pub fn compare(&self, symbol: &str) -> BTreeMap<String, Arc<Snapshot>> {
        self.snapshot_collectors()
            .into_iter()
            .filter_map(|(id, c)| c.get_latest(symbol).map(|s| (id, s)))
            .collect()
    }

    /// Every latest snapshot, keyed by exchange id.
    pub fn all_latest(&self) -> BTreeMap<String, Vec<Arc<Snapshot>>> {
        self.snapshot_collectors()
            .into_iter()
            .map(|(id, c)| (id, c.all_latest()))
            .collect()
    }

    /// Stop every collector, continuing past failures.
    pub async fn stop_all(&self) -> OrchestratorResult<()> {
        let collectors = self.snapshot_collectors();
        let mut failures = Vec::new();
        for (id, collector) in collectors {
            if let Err(e) = collector.stop().await {
                error!(exchange = %id, error = %e, "Collector stop failed");
                failures.push((id, e));
            }
        }

        if failures.is_empty() {
            info!("All collectors stopped");
            Ok(())
        } else {
            Err(OrchestratorError::Stop(failures))
        }
    }
}
