use std::fmt;

use super::model::{CatalogueEntry, FilterCatalogue, FilterType, Model, RangeBounds, ScenarioDetail};
use crate::error::StoreResult;
use crate::store::RecordStore;

/// Non-fatal problem found while building a scenario's catalogue. The
/// offending filter is left out; ingestion carries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestWarning {
    UnresolvableBounds {
        model_id: String,
        scenario_id: String,
        key: String,
    },
    InvalidFilterType {
        model_id: String,
        key: String,
        filter_type: String,
    },
    /// Scenario batch whose id names another model; its records are not stored.
    ForeignScenario {
        model_id: String,
        scenario_id: String,
    },
}

impl fmt::Display for IngestWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestWarning::UnresolvableBounds {
                model_id,
                scenario_id,
                key,
            } => write!(
                f,
                "Invalid (min) and/or (max) for filter [{key}] of model [{model_id}] in scenario [{scenario_id}]... skipping"
            ),
            IngestWarning::InvalidFilterType {
                model_id,
                key,
                filter_type,
            } => write!(
                f,
                "Invalid type [{filter_type}] for filter [{key}] of model [{model_id}]... skipping"
            ),
            IngestWarning::ForeignScenario {
                model_id,
                scenario_id,
            } => write!(
                f,
                "Scenario [{scenario_id}] does not belong to model [{model_id}]... skipping"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub detail: ScenarioDetail,
    pub warnings: Vec<IngestWarning>,
}

/// Build the filter catalogue of one scenario.
///
/// Range filters get bounds from a scan over the scenario's records (floored
/// min, ceiled max); filters whose bounds don't resolve are dropped. Option
/// filters pass through. Any other type is dropped with a warning.
pub fn derive_catalogue<S: RecordStore + ?Sized>(
    store: &S,
    model: &Model,
    scenario_id: &str,
) -> StoreResult<Derivation> {
    let mut entries = Vec::new();
    let mut warnings = Vec::new();

    for definition in model.normalized_filters() {
        match definition.filter_type {
            FilterType::Range => {
                let keys = definition.storage_keys(&model.timesteps);
                match store.raw_filter_bound_scan(scenario_id, &keys)? {
                    Some(bounds) => entries.push(CatalogueEntry {
                        definition,
                        range: Some(RangeBounds {
                            min: bounds.min.floor(),
                            max: bounds.max.ceil(),
                        }),
                    }),
                    None => warnings.push(IngestWarning::UnresolvableBounds {
                        model_id: model.id.clone(),
                        scenario_id: scenario_id.to_string(),
                        key: definition.key,
                    }),
                }
            }
            FilterType::Options => entries.push(CatalogueEntry {
                definition,
                range: None,
            }),
            FilterType::Other(ref other) => warnings.push(IngestWarning::InvalidFilterType {
                model_id: model.id.clone(),
                key: definition.key.clone(),
                filter_type: other.clone(),
            }),
        }
    }

    for warning in &warnings {
        log::warn!("{warning}");
    }

    Ok(Derivation {
        detail: ScenarioDetail {
            scenario_id: scenario_id.to_string(),
            filters: FilterCatalogue::new(entries),
        },
        warnings,
    })
}
