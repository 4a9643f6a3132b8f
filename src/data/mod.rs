/// Data layer: core types, loading, catalogue derivation, filtering and
/// aggregation.
///
/// Architecture:
/// ```text
///  model.json        scenario .csv / .json / .parquet
///        │                     │
///        ▼                     ▼
///   ┌──────────────────────────────┐
///   │  loader                      │  parse files → Model, FeatureRecords
///   └──────────────────────────────┘
///        │  (ingestion)
///        ▼
///   ┌──────────┐
///   │  bounds   │  min/max scans → per-scenario FilterCatalogue
///   └──────────┘
///        │  (request)
///        ▼
///   ┌──────────┐
///   │  filter   │  FilterRequest + catalogue → Predicate
///   └──────────┘
///        │
///        ▼
///   ┌───────────┐
///   │ aggregate  │  rows + sums → featureTypes, summary, summaryByType
///   └───────────┘
/// ```

pub mod aggregate;
pub mod bounds;
pub mod filter;
pub mod loader;
pub mod model;
