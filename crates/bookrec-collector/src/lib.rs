//! Multi-exchange order-book collector.
//!
//! Wires the workspace crates into a running service:
//! - `Collector`: catalog, store, subscriptions, and recorder for one exchange
//! - `ExchangeOrchestrator`: one collector per exchange id, cross-exchange views
//! - `AppConfig`: TOML configuration with subscription plans

pub mod collector;
pub mod config;
pub mod error;
pub mod orchestrator;

pub use collector::Collector;
pub use config::{AppConfig, CollectorConfig, PersistenceSettings, SubscriptionPlan};
pub use error::{CollectorError, CollectorResult, OrchestratorError, OrchestratorResult};
pub use orchestrator::ExchangeOrchestrator;
