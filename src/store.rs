//! Record store abstraction and the in-memory implementation.
//!
//! [`Snapshot`] is an immutable view of models, catalogues and feature
//! records. [`MemoryStore`] publishes snapshots atomically: a reader holding
//! an `Arc<Snapshot>` sees either the state before an ingestion or the state
//! after it, never a mix.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::data::filter::Predicate;
use crate::data::model::{
    Country, FeatureRecord, FieldValue, FilterCatalogue, Model, RangeBounds, ScenarioDetail,
};
use crate::error::{StoreError, StoreResult};
use crate::service::model_id_of;

// ---------------------------------------------------------------------------
// Query shapes
// ---------------------------------------------------------------------------

/// Output column of a feature query.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    FeatureId,
    Summary(String),
}

/// `(alias, column)` pairs selected by a feature query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub columns: Vec<(String, Column)>,
}

impl Projection {
    pub fn column(mut self, alias: impl Into<String>, column: Column) -> Self {
        self.columns.push((alias.into(), column));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    FeatureIdAsc,
}

/// One projected row; `values` is keyed by alias.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub feature_id: u64,
    pub values: BTreeMap<String, FieldValue>,
}

impl Row {
    pub fn get(&self, alias: &str) -> &FieldValue {
        self.values.get(alias).unwrap_or(&FieldValue::Null)
    }
}

/// `SUM(summary[key]) AS alias` for each pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateSpec {
    pub sums: Vec<(String, String)>,
}

impl AggregateSpec {
    pub fn sum(mut self, alias: impl Into<String>, summary_key: impl Into<String>) -> Self {
        self.sums.push((alias.into(), summary_key.into()));
        self
    }
}

/// Alias → sum. `None` when no row contributed, like SQL `SUM` over nothing.
pub type AggregateRow = BTreeMap<String, Option<f64>>;

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Read access the engine needs from persistence.
pub trait RecordStore {
    fn count_distinct_model_types(&self) -> StoreResult<usize>;

    fn count_countries(&self) -> StoreResult<usize>;

    /// All countries, ordered by name.
    fn list_countries(&self) -> StoreResult<Vec<Country>>;

    fn get_country(&self, country_id: &str) -> StoreResult<Option<Country>>;

    fn get_model(&self, model_id: &str) -> StoreResult<Option<Model>>;

    /// Models whose id starts with `prefix`, ordered by id.
    fn models_with_prefix(&self, prefix: &str) -> StoreResult<Vec<Model>>;

    /// Catalogue derived for a scenario at ingestion, if any.
    fn get_catalogue(&self, scenario_id: &str) -> StoreResult<Option<FilterCatalogue>>;

    /// Finite single-pass scan of matching records.
    fn query_features(
        &self,
        predicate: &Predicate,
        projection: &Projection,
        order: Option<OrderBy>,
    ) -> StoreResult<Vec<Row>>;

    fn query_aggregate(&self, predicate: &Predicate, spec: &AggregateSpec)
        -> StoreResult<AggregateRow>;

    /// Min and max over the scenario's records of each record's smallest
    /// numeric value among `storage_keys`. `None` when nothing is numeric.
    fn raw_filter_bound_scan(
        &self,
        scenario_id: &str,
        storage_keys: &[String],
    ) -> StoreResult<Option<RangeBounds>>;
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Immutable dataset. Records are partitioned by scenario and ordered by
/// feature id.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    models: BTreeMap<String, Model>,
    countries: Vec<Country>,
    records: BTreeMap<String, BTreeMap<u64, FeatureRecord>>,
    details: BTreeMap<String, ScenarioDetail>,
}

impl Snapshot {
    /// Copy of `self` with `model` and all of its scenarios replaced.
    pub fn with_model(&self, model: Model, scenarios: Vec<(String, Vec<FeatureRecord>)>) -> Self {
        let mut next = self.clone();
        next.records.retain(|sid, _| model_id_of(sid) != model.id);
        next.details.retain(|sid, _| model_id_of(sid) != model.id);

        for (scenario_id, records) in scenarios {
            let partition = next.records.entry(scenario_id).or_default();
            for record in records {
                partition.insert(record.feature_id, record);
            }
        }
        next.models.insert(model.id.clone(), model);
        next
    }

    pub fn with_countries(&self, countries: Vec<Country>) -> Self {
        let mut next = self.clone();
        next.countries = countries;
        next
    }

    pub fn insert_detail(&mut self, detail: ScenarioDetail) {
        self.details.insert(detail.scenario_id.clone(), detail);
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    pub fn countries(&self) -> &[Country] {
        &self.countries
    }

    /// Scenario ids belonging to `model_id`.
    pub fn scenario_ids(&self, model_id: &str) -> Vec<String> {
        self.records
            .keys()
            .filter(|sid| model_id_of(sid) == model_id)
            .cloned()
            .collect()
    }

    pub fn scenario_detail(&self, scenario_id: &str) -> Option<&ScenarioDetail> {
        self.details.get(scenario_id)
    }

    fn matching<'a>(&'a self, predicate: &'a Predicate) -> impl Iterator<Item = &'a FeatureRecord> {
        let partitions: Vec<&BTreeMap<u64, FeatureRecord>> = match predicate.scenario() {
            Some(sid) => self.records.get(sid).into_iter().collect(),
            None => self.records.values().collect(),
        };
        partitions
            .into_iter()
            .flat_map(|p| p.values())
            .filter(move |r| predicate.matches(r))
    }
}

impl RecordStore for Snapshot {
    fn count_distinct_model_types(&self) -> StoreResult<usize> {
        let types: BTreeSet<&str> = self.models.values().map(|m| m.model_type.as_str()).collect();
        Ok(types.len())
    }

    fn count_countries(&self) -> StoreResult<usize> {
        Ok(self.countries.len())
    }

    fn list_countries(&self) -> StoreResult<Vec<Country>> {
        let mut countries = self.countries.clone();
        countries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(countries)
    }

    fn get_country(&self, country_id: &str) -> StoreResult<Option<Country>> {
        Ok(self.countries.iter().find(|c| c.id == country_id).cloned())
    }

    fn get_model(&self, model_id: &str) -> StoreResult<Option<Model>> {
        Ok(self.models.get(model_id).cloned())
    }

    fn models_with_prefix(&self, prefix: &str) -> StoreResult<Vec<Model>> {
        Ok(self
            .models
            .range(prefix.to_string()..)
            .take_while(|(id, _)| id.starts_with(prefix))
            .map(|(_, model)| model.clone())
            .collect())
    }

    fn get_catalogue(&self, scenario_id: &str) -> StoreResult<Option<FilterCatalogue>> {
        Ok(self.details.get(scenario_id).map(|d| d.filters.clone()))
    }

    fn query_features(
        &self,
        predicate: &Predicate,
        projection: &Projection,
        order: Option<OrderBy>,
    ) -> StoreResult<Vec<Row>> {
        let mut rows: Vec<Row> = self
            .matching(predicate)
            .map(|record| Row {
                feature_id: record.feature_id,
                values: projection
                    .columns
                    .iter()
                    .map(|(alias, column)| {
                        let value = match column {
                            Column::FeatureId => FieldValue::Integer(record.feature_id as i64),
                            Column::Summary(key) => record.summary_value(key).clone(),
                        };
                        (alias.clone(), value)
                    })
                    .collect(),
            })
            .collect();

        match order {
            Some(OrderBy::FeatureIdAsc) => rows.sort_by_key(|r| r.feature_id),
            None => {}
        }
        Ok(rows)
    }

    fn query_aggregate(
        &self,
        predicate: &Predicate,
        spec: &AggregateSpec,
    ) -> StoreResult<AggregateRow> {
        let mut sums: AggregateRow = spec.sums.iter().map(|(alias, _)| (alias.clone(), None)).collect();

        for record in self.matching(predicate) {
            for (alias, key) in &spec.sums {
                let value = record.summary_value(key);
                if value.is_null() {
                    continue;
                }
                let n = value.as_f64().unwrap_or_else(|| {
                    log::warn!(
                        "non-numeric {key} [{value}] for feature {} of {}, counted as 0",
                        record.feature_id,
                        record.scenario_id
                    );
                    0.0
                });
                let slot = sums.entry(alias.clone()).or_insert(None);
                *slot = Some(slot.unwrap_or(0.0) + n);
            }
        }
        Ok(sums)
    }

    fn raw_filter_bound_scan(
        &self,
        scenario_id: &str,
        storage_keys: &[String],
    ) -> StoreResult<Option<RangeBounds>> {
        let Some(partition) = self.records.get(scenario_id) else {
            return Ok(None);
        };

        let mut bounds: Option<RangeBounds> = None;
        for record in partition.values() {
            let representative = storage_keys
                .iter()
                .filter_map(|k| record.filter_value(k).as_f64())
                .reduce(f64::min);
            let Some(v) = representative else {
                continue;
            };
            bounds = Some(match bounds {
                Some(b) => RangeBounds {
                    min: b.min.min(v),
                    max: b.max.max(v),
                },
                None => RangeBounds { min: v, max: v },
            });
        }
        Ok(bounds)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Shared store handing out consistent snapshots to concurrent readers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    current: RwLock<Arc<Snapshot>>,
    ingest_gate: Mutex<()>,
}

impl MemoryStore {
    pub fn new(snapshot: Snapshot) -> Self {
        MemoryStore {
            current: RwLock::new(Arc::new(snapshot)),
            ingest_gate: Mutex::new(()),
        }
    }

    /// Pin the current state. Every query against the returned snapshot sees
    /// the same data.
    pub fn snapshot(&self) -> StoreResult<Arc<Snapshot>> {
        self.current
            .read()
            .map(|guard| Arc::clone(&*guard))
            .map_err(|_| StoreError::Poisoned)
    }

    /// Serialises writers; held for the whole stage → derive → publish cycle.
    pub(crate) fn lock_ingest(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.ingest_gate.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Swap in a fully built snapshot.
    pub(crate) fn publish(&self, snapshot: Snapshot) -> StoreResult<()> {
        let mut guard = self.current.write().map_err(|_| StoreError::Poisoned)?;
        *guard = Arc::new(snapshot);
        Ok(())
    }

    pub fn load_countries(&self, countries: Vec<Country>) -> StoreResult<()> {
        let _gate = self.lock_ingest()?;
        let next = self.snapshot()?.with_countries(countries);
        self.publish(next)
    }
}

impl RecordStore for MemoryStore {
    fn count_distinct_model_types(&self) -> StoreResult<usize> {
        self.snapshot()?.count_distinct_model_types()
    }

    fn count_countries(&self) -> StoreResult<usize> {
        self.snapshot()?.count_countries()
    }

    fn list_countries(&self) -> StoreResult<Vec<Country>> {
        self.snapshot()?.list_countries()
    }

    fn get_country(&self, country_id: &str) -> StoreResult<Option<Country>> {
        self.snapshot()?.get_country(country_id)
    }

    fn get_model(&self, model_id: &str) -> StoreResult<Option<Model>> {
        self.snapshot()?.get_model(model_id)
    }

    fn models_with_prefix(&self, prefix: &str) -> StoreResult<Vec<Model>> {
        self.snapshot()?.models_with_prefix(prefix)
    }

    fn get_catalogue(&self, scenario_id: &str) -> StoreResult<Option<FilterCatalogue>> {
        self.snapshot()?.get_catalogue(scenario_id)
    }

    fn query_features(
        &self,
        predicate: &Predicate,
        projection: &Projection,
        order: Option<OrderBy>,
    ) -> StoreResult<Vec<Row>> {
        self.snapshot()?.query_features(predicate, projection, order)
    }

    fn query_aggregate(
        &self,
        predicate: &Predicate,
        spec: &AggregateSpec,
    ) -> StoreResult<AggregateRow> {
        self.snapshot()?.query_aggregate(predicate, spec)
    }

    fn raw_filter_bound_scan(
        &self,
        scenario_id: &str,
        storage_keys: &[String],
    ) -> StoreResult<Option<RangeBounds>> {
        self.snapshot()?.raw_filter_bound_scan(scenario_id, storage_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::filter::{OptionsNode, RangeNode};

    fn record(sid: &str, fid: u64, pop: FieldValue, f: &[(&str, f64)]) -> FeatureRecord {
        FeatureRecord {
            scenario_id: sid.into(),
            feature_id: fid,
            summary: BTreeMap::from([("Pop".to_string(), pop)]),
            filter_values: f.iter().map(|(k, v)| (k.to_string(), FieldValue::Float(*v))).collect(),
        }
    }

    fn model(id: &str, model_type: &str) -> Model {
        serde_json::from_value(serde_json::json!({ "id": id, "type": model_type })).unwrap()
    }

    fn snapshot() -> Snapshot {
        Snapshot::default().with_model(
            model("mw-1", "onsset"),
            vec![
                (
                    "mw-1-a".into(),
                    vec![
                        record("mw-1-a", 3, FieldValue::Integer(30), &[("f2010", 3.0), ("f2020", 7.0)]),
                        record("mw-1-a", 1, FieldValue::String("10".into()), &[("f2010", 1.0), ("f2020", 9.0)]),
                    ],
                ),
                ("mw-1-b".into(), vec![record("mw-1-b", 2, FieldValue::Null, &[])]),
            ],
        )
    }

    #[test]
    fn bound_scan_uses_per_record_minimum() {
        let keys = vec!["f2010".to_string(), "f2020".to_string()];
        let bounds = snapshot().raw_filter_bound_scan("mw-1-a", &keys).unwrap();
        assert_eq!(bounds, Some(RangeBounds { min: 1.0, max: 3.0 }));
        assert_eq!(snapshot().raw_filter_bound_scan("mw-1-b", &keys).unwrap(), None);
        assert_eq!(snapshot().raw_filter_bound_scan("zz-1-a", &keys).unwrap(), None);
    }

    #[test]
    fn features_are_ordered_by_id_within_scenario() {
        let projection = Projection::default()
            .column("id", Column::FeatureId)
            .column("pop", Column::Summary("Pop".into()));
        let rows = snapshot()
            .query_features(
                &Predicate::Scenario("mw-1-a".into()),
                &projection,
                Some(OrderBy::FeatureIdAsc),
            )
            .unwrap();
        let ids: Vec<u64> = rows.iter().map(|r| r.feature_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(rows[1].get("pop"), &FieldValue::Integer(30));
    }

    #[test]
    fn aggregate_over_nothing_is_none() {
        let spec = AggregateSpec::default().sum("pop", "Pop");
        let snap = snapshot();
        let sums = snap
            .query_aggregate(&Predicate::Scenario("mw-1-a".into()), &spec)
            .unwrap();
        assert_eq!(sums["pop"], Some(40.0));

        let none = snap
            .query_aggregate(
                &Predicate::And(vec![
                    Predicate::Scenario("mw-1-a".into()),
                    Predicate::Range(RangeNode {
                        storage_key: "f2010".into(),
                        min: Some(100.0),
                        max: None,
                    }),
                ]),
                &spec,
            )
            .unwrap();
        assert_eq!(none["pop"], None);
    }

    #[test]
    fn reingestion_replaces_model_scenarios() {
        let first = snapshot();
        let store = MemoryStore::new(first);
        let pinned = store.snapshot().unwrap();

        let next = pinned.with_model(
            model("mw-1", "onsset"),
            vec![("mw-1-c".into(), vec![record("mw-1-c", 9, FieldValue::Integer(1), &[])])],
        );
        store.publish(next).unwrap();

        // the pinned reader still sees the old state
        assert_eq!(pinned.scenario_ids("mw-1"), vec!["mw-1-a", "mw-1-b"]);
        assert_eq!(store.snapshot().unwrap().scenario_ids("mw-1"), vec!["mw-1-c"]);
    }

    #[test]
    fn stats_count_distinct_types() {
        let snap = snapshot()
            .with_model(model("mw-2", "onsset"), vec![])
            .with_model(model("ke-1", "other"), vec![])
            .with_countries(vec![Country {
                id: "mw".into(),
                name: "Malawi".into(),
            }]);
        assert_eq!(snap.count_distinct_model_types().unwrap(), 2);
        assert_eq!(snap.count_countries().unwrap(), 1);

        let options = Predicate::Options(OptionsNode {
            storage_key: "nope".into(),
            options: BTreeSet::new(),
        });
        assert!(snap
            .query_features(&options, &Projection::default(), None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn countries_sort_by_name_and_models_match_by_prefix() {
        let snap = snapshot()
            .with_model(model("mw-2", "onsset"), vec![])
            .with_model(model("mwx-1", "onsset"), vec![])
            .with_model(model("ke-1", "other"), vec![])
            .with_countries(vec![
                Country { id: "mw".into(), name: "Malawi".into() },
                Country { id: "ke".into(), name: "Kenya".into() },
            ]);

        let names: Vec<String> = snap.list_countries().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Kenya", "Malawi"]);
        assert_eq!(snap.get_country("ke").unwrap().map(|c| c.name).as_deref(), Some("Kenya"));
        assert!(snap.get_country("zz").unwrap().is_none());

        let ids: Vec<String> = snap.models_with_prefix("mw-").unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["mw-1", "mw-2"]);
    }
}
