//! Scenario filter and aggregation engine for electrification-planning
//! model outputs.

pub mod config;
pub mod data;
pub mod error;
pub mod ingest;
pub mod service;
pub mod store;

pub use config::EngineConfig;
pub use data::filter::{FilterRequest, RequestFilter, YearPolicy};
pub use error::{EngineError, ErrorClass, StoreError, ValidationError};
pub use ingest::{ingest_model, IngestReport};
pub use service::{countries, country, list_scenario, scenario_feature, stats};
pub use store::{MemoryStore, RecordStore, Snapshot};
