//! Instrument discovery for bookrec.
//!
//! Loads the exchange's tradable derivatives once and serves filtered
//! views of them:
//! - `MetadataSource` abstracts where instruments come from
//! - `DeribitMetaClient` fetches futures and options over REST
//! - `StaticSource` serves a fixed list (tests, offline configs)
//! - `InstrumentCatalog` caches the first successful load

pub mod catalog;
pub mod client;
pub mod error;
pub mod source;

pub use catalog::{InstrumentCatalog, InstrumentFilter};
pub use client::DeribitMetaClient;
pub use error::{RegistryError, RegistryResult};
pub use source::{MetadataSource, StaticSource};
