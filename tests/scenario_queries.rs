//! End-to-end: load files, ingest, then run listing and feature queries
//! against a pinned snapshot.

use std::path::Path;

use serde_json::json;

use elec_scenarios::data::bounds::derive_catalogue;
use elec_scenarios::data::filter::Predicate;
use elec_scenarios::data::loader::{load_model, load_scenario_file};
use elec_scenarios::data::model::{Country, FilterCatalogue, Model, RangeBounds};
use elec_scenarios::error::StoreResult;
use elec_scenarios::service::{self, list_scenario, scenario_feature};
use elec_scenarios::store::{AggregateRow, AggregateSpec, OrderBy, Projection, Row};
use elec_scenarios::{
    ingest_model, EngineConfig, EngineError, ErrorClass, FilterRequest, MemoryStore,
    RecordStore, RequestFilter, StoreError, ValidationError,
};

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

const MODEL: &str = r#"{
    "id": "MW-1",
    "name": "Malawi",
    "type": "onsset",
    "timesteps": [2020, 2025, 2030],
    "filters": [
        { "id": "1", "key": "GridDist", "type": "range", "timestep": true },
        { "id": "2", "key": "Region", "type": "options" },
        { "id": "3", "key": "Unused", "type": "range" },
        { "id": "4", "key": "Shape", "type": "polygon" }
    ]
}"#;

const SCENARIO: &str = "\
ID,FinalElecCode2020,InvestmentCost2020,NewCapacity2020,Pop2020,FinalElecCode2025,InvestmentCost2025,NewCapacity2025,Pop2025,FinalElecCode2030,InvestmentCost2030,NewCapacity2030,Pop2030,GridDist2020,GridDist2025,GridDist2030,Region
1,1,10.005,1,100,1,1,1,1,1,11,2,110,3,5,7,north
2,2,10.005,2,200,2,1,1,1,2,22,3,220,1,4,9,south
3,1,5,0.5,50,1,1,1,1,1,5,1,55,12.5,13,14,north
5,,99,9,900,,1,1,1,3,99,9,990,2,2,2,south
";

fn setup(dir: &Path) -> MemoryStore {
    let model_path = dir.join("mw-1.json");
    std::fs::write(&model_path, MODEL).unwrap();
    let scenario_path = dir.join("MW-1-base.csv");
    std::fs::write(&scenario_path, SCENARIO).unwrap();

    let model = load_model(&model_path).unwrap();
    let batch = load_scenario_file(&scenario_path, &model).unwrap();

    let store = MemoryStore::default();
    let report = ingest_model(&store, model, vec![batch]).unwrap();
    assert_eq!(report.model_id, "mw-1");
    assert_eq!(report.features, 4);
    store
}

fn listing(store: &MemoryStore, request: &FilterRequest) -> Result<service::ScenarioListing, EngineError> {
    let snapshot = store.snapshot().unwrap();
    list_scenario(&*snapshot, &EngineConfig::default(), "mw-1-base", request)
}

// ─────────────────────────────────────────────
// Ingestion
// ─────────────────────────────────────────────

#[test]
fn ingestion_derives_catalogue_and_reports_skipped_filters() {
    let dir = tempfile::tempdir().unwrap();
    let store = setup(dir.path());

    let catalogue = store.get_catalogue("mw-1-base").unwrap().unwrap();
    let grid = catalogue.find_by_key("GridDist").unwrap();
    // per-record minima are 3, 1, 12.5, 2 → floor/ceil
    assert_eq!(grid.range, Some(RangeBounds { min: 1.0, max: 13.0 }));
    assert!(catalogue.find_by_key("Region").is_some());
    assert!(catalogue.find_by_key("Unused").is_none());
    assert!(catalogue.find_by_key("Shape").is_none());
}

// ─────────────────────────────────────────────
// Listing
// ─────────────────────────────────────────────

#[test]
fn listing_defaults_to_first_timestep() {
    let dir = tempfile::tempdir().unwrap();
    let store = setup(dir.path());

    let result = listing(&store, &FilterRequest::default()).unwrap();
    assert_eq!(result.id, "mw-1-base");

    // feature 5 has no FinalElecCode2020 and is excluded
    assert_eq!(result.feature_types.to_transport().as_deref(), Some(",1,2,1"));
    assert_eq!(result.summary.investment_cost, 25.01);
    assert_eq!(result.summary.new_capacity, 3.5);
    assert_eq!(result.summary.electrified_population, 350.0);

    assert_eq!(result.summary_by_type.electrified_population["1"], 150.0);
    assert_eq!(result.summary_by_type.electrified_population["2"], 200.0);
    assert_eq!(result.summary_by_type.investment_cost.len(), 2);
}

#[test]
fn listing_uses_requested_year_and_filters() {
    let dir = tempfile::tempdir().unwrap();
    let store = setup(dir.path());

    let request = FilterRequest {
        year: Some(2030.0),
        filters: vec![RequestFilter::range("GridDist", None, Some(9.0))],
    };
    let result = listing(&store, &request).unwrap();
    // GridDist2030: 7, 9, 14, 2
    assert_eq!(result.feature_types.to_transport().as_deref(), Some(",1,2,,,3"));
    assert_eq!(result.summary.electrified_population, 1320.0);
    assert_eq!(result.summary_by_type.investment_cost["3"], 99.0);

    let request = FilterRequest {
        year: Some(2030.0),
        filters: vec![
            RequestFilter::range("GridDist", Some(3.0), None),
            RequestFilter::options("Region", ["north"]),
        ],
    };
    let result = listing(&store, &request).unwrap();
    assert_eq!(result.feature_types.to_transport().as_deref(), Some(",1,,1"));
    assert_eq!(result.summary.investment_cost, 16.0);
}

#[test]
fn listing_accepts_integral_float_year() {
    let dir = tempfile::tempdir().unwrap();
    let store = setup(dir.path());

    let request = FilterRequest::from_json(&json!({ "year": 2030.0 })).unwrap();
    let result = listing(&store, &request).unwrap();
    assert_eq!(result.summary.electrified_population, 1375.0);

    let request = FilterRequest::from_json(&json!({ "year": 2030.5 })).unwrap();
    let err = listing(&store, &request).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::InvalidYear { .. })
    ));
}

#[test]
fn listing_is_repeatable() {
    let dir = tempfile::tempdir().unwrap();
    let store = setup(dir.path());
    let request = FilterRequest::from_json(&json!({
        "year": 2025,
        "filters": [{ "key": "Region", "options": ["south", "north"] }]
    }))
    .unwrap();

    let first = serde_json::to_string(&listing(&store, &request).unwrap()).unwrap();
    let second = serde_json::to_string(&listing(&store, &request).unwrap()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn listing_validation_errors_are_client_faults() {
    let dir = tempfile::tempdir().unwrap();
    let store = setup(dir.path());

    let err = listing(&store, &FilterRequest { year: Some(2021.0), filters: vec![] }).unwrap_err();
    assert_eq!(err.class(), ErrorClass::ClientFault);
    assert!(err.to_string().contains("Must be one of [2020, 2025, 2030]"));

    let request = FilterRequest {
        year: None,
        filters: vec![RequestFilter::range("Unused", Some(1.0), None)],
    };
    assert!(matches!(
        listing(&store, &request),
        Err(EngineError::Validation(ValidationError::UnknownFilterKey { .. }))
    ));

    let request = FilterRequest {
        year: None,
        filters: vec![RequestFilter::range("GridDist", None, None)],
    };
    assert!(matches!(
        listing(&store, &request),
        Err(EngineError::Validation(ValidationError::MissingFilterValue { .. }))
    ));
}

#[test]
fn unknown_model_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = setup(dir.path());
    let snapshot = store.snapshot().unwrap();

    let err = list_scenario(&*snapshot, &EngineConfig::default(), "ke-1-base", &FilterRequest::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::ModelNotFound { ref model_id } if model_id == "ke-1"));
    assert_eq!(err.class(), ErrorClass::NotFound);
}

// ─────────────────────────────────────────────
// Single feature
// ─────────────────────────────────────────────

#[test]
fn feature_defaults_to_last_timestep() {
    let dir = tempfile::tempdir().unwrap();
    let store = setup(dir.path());
    let snapshot = store.snapshot().unwrap();
    let config = EngineConfig::default();

    let feature = scenario_feature(&*snapshot, &config, "MW-1-base", 2, None).unwrap();
    let json = serde_json::to_value(&feature).unwrap();
    assert_eq!(json, json!({ "investmentCost": 22, "newCapacity": 3, "electrifiedPopulation": 220 }));

    let feature = scenario_feature(&*snapshot, &config, "mw-1-base", 2, Some(2020)).unwrap();
    assert_eq!(serde_json::to_value(&feature).unwrap()["investmentCost"], 10.005);

    let err = scenario_feature(&*snapshot, &config, "mw-1-base", 4, None).unwrap_err();
    assert!(matches!(err, EngineError::FeatureNotFound { feature_id: 4, .. }));
}

#[test]
fn stats_and_model_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let store = setup(dir.path());

    let stats = service::stats(&store).unwrap();
    assert_eq!(stats.totals.models, 1);
    assert_eq!(stats.totals.countries, 0);

    assert_eq!(service::model(&store, "MW-1").unwrap().timesteps, vec![2020, 2025, 2030]);
    assert!(matches!(
        service::model(&store, "zz-9"),
        Err(EngineError::ModelNotFound { .. })
    ));
}

// ─────────────────────────────────────────────
// Countries
// ─────────────────────────────────────────────

#[test]
fn countries_are_listed_by_name_with_their_models() {
    let dir = tempfile::tempdir().unwrap();
    let store = setup(dir.path());
    store
        .load_countries(vec![
            Country { id: "mw".into(), name: "Malawi".into() },
            Country { id: "bj".into(), name: "Benin".into() },
        ])
        .unwrap();

    let listed = serde_json::to_value(service::countries(&store).unwrap()).unwrap();
    assert_eq!(listed["countries"][0]["name"], "Benin");
    assert_eq!(listed["countries"][1]["id"], "mw");

    let detail = service::country(&store, "MW").unwrap();
    assert_eq!(detail.country.name, "Malawi");
    let ids: Vec<&str> = detail.models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["mw-1"]);
    assert_eq!(serde_json::to_value(&detail).unwrap()["name"], "Malawi");

    assert!(service::country(&store, "bj").unwrap().models.is_empty());

    let err = service::country(&store, "zz").unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
    let err = service::country(&store, "mwi").unwrap_err();
    assert_eq!(err.class(), ErrorClass::ClientFault);
}

// ─────────────────────────────────────────────
// Store failures
// ─────────────────────────────────────────────

/// Record store whose backend is unreachable.
struct UnreachableStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::unavailable("connection refused: db.internal:5432"))
}

impl RecordStore for UnreachableStore {
    fn count_distinct_model_types(&self) -> StoreResult<usize> {
        down()
    }
    fn count_countries(&self) -> StoreResult<usize> {
        down()
    }
    fn list_countries(&self) -> StoreResult<Vec<Country>> {
        down()
    }
    fn get_country(&self, _: &str) -> StoreResult<Option<Country>> {
        down()
    }
    fn get_model(&self, _: &str) -> StoreResult<Option<Model>> {
        down()
    }
    fn models_with_prefix(&self, _: &str) -> StoreResult<Vec<Model>> {
        down()
    }
    fn get_catalogue(&self, _: &str) -> StoreResult<Option<FilterCatalogue>> {
        down()
    }
    fn query_features(&self, _: &Predicate, _: &Projection, _: Option<OrderBy>) -> StoreResult<Vec<Row>> {
        down()
    }
    fn query_aggregate(&self, _: &Predicate, _: &AggregateSpec) -> StoreResult<AggregateRow> {
        down()
    }
    fn raw_filter_bound_scan(&self, _: &str, _: &[String]) -> StoreResult<Option<RangeBounds>> {
        down()
    }
}

fn assert_opaque_server_fault(err: EngineError) {
    assert_eq!(err.class(), ErrorClass::ServerFault);
    assert!(matches!(err, EngineError::StoreUnavailable(_)));
    let message = err.to_string();
    assert_eq!(message, "An internal server error occurred");
    assert!(!message.contains("5432"));
}

#[test]
fn store_failures_surface_as_opaque_server_faults() {
    let store = UnreachableStore;
    let config = EngineConfig::default();

    assert_opaque_server_fault(
        list_scenario(&store, &config, "mw-1-base", &FilterRequest::default()).unwrap_err(),
    );
    assert_opaque_server_fault(scenario_feature(&store, &config, "mw-1-base", 1, None).unwrap_err());
    assert_opaque_server_fault(service::stats(&store).unwrap_err());
    assert_opaque_server_fault(service::countries(&store).unwrap_err());
    assert_opaque_server_fault(service::country(&store, "mw").unwrap_err());

    let model: Model = serde_json::from_str(MODEL).unwrap();
    let err = derive_catalogue(&store, &model, "mw-1-base").unwrap_err();
    assert_opaque_server_fault(err.into());
}
