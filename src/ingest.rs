//! Model ingestion: stage the new records, derive every scenario's filter
//! catalogue against the staged data, then publish in one swap.

use crate::data::bounds::{derive_catalogue, IngestWarning};
use crate::data::loader::ScenarioBatch;
use crate::data::model::Model;
use crate::error::StoreResult;
use crate::service::model_id_of;
use crate::store::MemoryStore;

/// Outcome of one ingestion, including every filter that was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub model_id: String,
    pub scenarios: Vec<String>,
    pub features: usize,
    pub warnings: Vec<IngestWarning>,
}

/// Replace `model` and all of its scenarios in `store`.
///
/// Readers keep seeing the previous state until the new one, catalogues
/// included, is published. Batches whose scenario id belongs to another
/// model are skipped with a warning.
pub fn ingest_model(
    store: &MemoryStore,
    model: Model,
    batches: Vec<ScenarioBatch>,
) -> StoreResult<IngestReport> {
    let _gate = store.lock_ingest()?;

    let mut warnings = Vec::new();
    let (batches, foreign): (Vec<_>, Vec<_>) = batches
        .into_iter()
        .partition(|b| model_id_of(&b.scenario_id) == model.id);
    for batch in foreign {
        log::warn!(
            "scenario {} does not belong to model {}, skipping {} features",
            batch.scenario_id,
            model.id,
            batch.records.len()
        );
        warnings.push(IngestWarning::ForeignScenario {
            model_id: model.id.clone(),
            scenario_id: batch.scenario_id,
        });
    }

    let scenarios: Vec<String> = batches.iter().map(|b| b.scenario_id.clone()).collect();
    let features = batches.iter().map(|b| b.records.len()).sum();
    let model_id = model.id.clone();

    let mut staged = store.snapshot()?.with_model(
        model.clone(),
        batches
            .into_iter()
            .map(|b| (b.scenario_id, b.records))
            .collect(),
    );

    for scenario_id in &scenarios {
        let derivation = derive_catalogue(&staged, &model, scenario_id)?;
        warnings.extend(derivation.warnings);
        staged.insert_detail(derivation.detail);
    }

    store.publish(staged)?;
    log::info!(
        "ingested model {model_id}: {} scenarios, {features} features, {} filters skipped",
        scenarios.len(),
        warnings.len()
    );

    Ok(IngestReport {
        model_id,
        scenarios,
        features,
        warnings,
    })
}
