//! Request-level operations: scenario listing, single-feature lookup, stats,
//! model and country lookups.
//!
//! Each takes a [`RecordStore`]; pass a pinned [`Snapshot`](crate::store::Snapshot)
//! so the listing and aggregate scans of one request see the same data.

use serde::Serialize;

use crate::config::EngineConfig;
use crate::data::aggregate::{aggregate, Aggregation, FeatureTypes, Summary, SummaryByType, SummaryKeys};
use crate::data::filter::{compile, resolve_year, FilterRequest, Predicate};
use crate::data::model::{Country, FieldValue, FilterCatalogue, Model};
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::store::{OrderBy, RecordStore};

/// Model id of a scenario: everything before the last `-`.
pub fn model_id_of(scenario_id: &str) -> &str {
    scenario_id.rfind('-').map_or("", |i| &scenario_id[..i])
}

fn require_model<S: RecordStore + ?Sized>(store: &S, model_id: &str) -> EngineResult<Model> {
    store
        .get_model(model_id)?
        .ok_or_else(|| EngineError::ModelNotFound {
            model_id: model_id.to_string(),
        })
}

/// Listing response: `{ id, featureTypes, summary, summaryByType }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioListing {
    pub id: String,
    pub feature_types: FeatureTypes,
    pub summary: Summary,
    pub summary_by_type: SummaryByType,
}

/// Filter a scenario's features and aggregate them by technology.
pub fn list_scenario<S: RecordStore + ?Sized>(
    store: &S,
    config: &EngineConfig,
    scenario_id: &str,
    request: &FilterRequest,
) -> EngineResult<ScenarioListing> {
    let id = scenario_id.to_lowercase();
    let model = require_model(store, model_id_of(&id))?;

    let catalogue = match store.get_catalogue(&id)? {
        Some(catalogue) => catalogue,
        None => {
            log::debug!("no ingested catalogue for {id}, using model declarations");
            FilterCatalogue::from_definitions(&model)
        }
    };

    let query = compile(&catalogue, &model.timesteps, &id, request, config.listing_year)?;
    let Aggregation {
        feature_types,
        summary,
        summary_by_type,
    } = aggregate(store, &query)?;

    Ok(ScenarioListing {
        id,
        feature_types,
        summary,
        summary_by_type,
    })
}

/// Raw summary values of one feature for one year.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSummary {
    pub investment_cost: FieldValue,
    pub new_capacity: FieldValue,
    pub electrified_population: FieldValue,
}

/// Look up one feature. Takes no filters; the year defaults per
/// `config.feature_year`.
pub fn scenario_feature<S: RecordStore + ?Sized>(
    store: &S,
    config: &EngineConfig,
    scenario_id: &str,
    feature_id: u64,
    year: Option<i64>,
) -> EngineResult<FeatureSummary> {
    let sid = scenario_id.to_lowercase();
    let model = require_model(store, model_id_of(&sid))?;
    let year = resolve_year(&model.timesteps, year.map(|y| y as f64), config.feature_year)?;

    let keys = SummaryKeys::for_year(year);
    let predicate = Predicate::And(vec![
        Predicate::Scenario(sid.clone()),
        Predicate::Feature(feature_id),
    ]);
    let row = store
        .query_features(&predicate, &keys.projection(), Some(OrderBy::FeatureIdAsc))?
        .into_iter()
        .next()
        .ok_or(EngineError::FeatureNotFound {
            scenario_id: sid,
            feature_id,
        })?;

    Ok(FeatureSummary {
        investment_cost: row.get("investmentCost").clone(),
        new_capacity: row.get("newCapacity").clone(),
        electrified_population: row.get("electrifiedPopulation").clone(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub countries: usize,
    pub models: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub totals: Totals,
}

pub fn stats<S: RecordStore + ?Sized>(store: &S) -> EngineResult<Stats> {
    Ok(Stats {
        totals: Totals {
            countries: store.count_countries()?,
            models: store.count_distinct_model_types()?,
        },
    })
}

/// Model by (case-insensitive) id.
pub fn model<S: RecordStore + ?Sized>(store: &S, model_id: &str) -> EngineResult<Model> {
    require_model(store, &model_id.to_lowercase())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Countries {
    pub countries: Vec<Country>,
}

/// Every country, ordered by name.
pub fn countries<S: RecordStore + ?Sized>(store: &S) -> EngineResult<Countries> {
    Ok(Countries {
        countries: store.list_countries()?,
    })
}

/// A country with the models built for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryDetail {
    #[serde(flatten)]
    pub country: Country,
    pub models: Vec<Model>,
}

/// Country by two-letter code. Its models are those with ids `<code>-…`.
pub fn country<S: RecordStore + ?Sized>(store: &S, country_id: &str) -> EngineResult<CountryDetail> {
    if country_id.chars().count() != 2 {
        return Err(ValidationError::InvalidCountryCode {
            id: country_id.to_string(),
        }
        .into());
    }
    let id = country_id.to_lowercase();
    let country = store
        .get_country(&id)?
        .ok_or_else(|| EngineError::CountryNotFound {
            country_id: id.clone(),
        })?;
    let models = store.models_with_prefix(&format!("{id}-"))?;
    Ok(CountryDetail { country, models })
}
