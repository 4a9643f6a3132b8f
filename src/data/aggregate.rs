use std::collections::BTreeMap;

use serde::ser::Error as _;
use serde::{Serialize, Serializer};

use super::filter::{year_key, CompiledQuery};
use super::model::FieldValue;
use crate::error::StoreResult;
use crate::store::{AggregateSpec, Column, OrderBy, Projection, RecordStore};

// Summary field prefixes; the stored key is prefix + year.
pub const ELEC_CODE: &str = "FinalElecCode";
pub const INVESTMENT_COST: &str = "InvestmentCost";
pub const NEW_CAPACITY: &str = "NewCapacity";
pub const POPULATION: &str = "Pop";

const TECH: &str = "electrificationTech";
const COST: &str = "investmentCost";
const CAPACITY: &str = "newCapacity";
const PEOPLE: &str = "electrifiedPopulation";

/// Summary keys resolved for one year.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryKeys {
    pub electrification_tech: String,
    pub investment_cost: String,
    pub new_capacity: String,
    pub electrified_population: String,
}

impl SummaryKeys {
    pub fn for_year(year: Option<i32>) -> Self {
        SummaryKeys {
            electrification_tech: year_key(ELEC_CODE, year),
            investment_cost: year_key(INVESTMENT_COST, year),
            new_capacity: year_key(NEW_CAPACITY, year),
            electrified_population: year_key(POPULATION, year),
        }
    }

    pub fn projection(&self) -> Projection {
        Projection::default()
            .column("id", Column::FeatureId)
            .column(TECH, Column::Summary(self.electrification_tech.clone()))
            .column(COST, Column::Summary(self.investment_cost.clone()))
            .column(CAPACITY, Column::Summary(self.new_capacity.clone()))
            .column(PEOPLE, Column::Summary(self.electrified_population.clone()))
    }

    fn aggregate_spec(&self) -> AggregateSpec {
        AggregateSpec::default()
            .sum(COST, &self.investment_cost)
            .sum(CAPACITY, &self.new_capacity)
            .sum(PEOPLE, &self.electrified_population)
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Totals across all matched features, rounded to 2 decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub investment_cost: f64,
    pub new_capacity: f64,
    pub electrified_population: f64,
}

/// Per-field totals grouped by electrification technology.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryByType {
    pub electrified_population: BTreeMap<String, f64>,
    pub investment_cost: BTreeMap<String, f64>,
    pub new_capacity: BTreeMap<String, f64>,
}

/// Longest `featureTypes` list the transport form will build, in slots.
pub const MAX_TRANSPORT_SLOTS: u64 = 1 << 24;

/// Feature id → technology code.
///
/// Serialized as a comma-joined list indexed by feature id, with empty slots
/// for ids that didn't match (`{1: "a", 3: "b"}` → `",a,,b"`). The list is
/// as long as the largest matched id, so feature ids are assumed dense.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTypes(BTreeMap<u64, String>);

impl FeatureTypes {
    pub fn get(&self, feature_id: u64) -> Option<&str> {
        self.0.get(&feature_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.0.iter().map(|(id, tech)| (*id, tech.as_str()))
    }

    /// Comma-joined transport form. `None` when the largest id needs more than
    /// [`MAX_TRANSPORT_SLOTS`] slots.
    pub fn to_transport(&self) -> Option<String> {
        let Some((&last, _)) = self.0.last_key_value() else {
            return Some(String::new());
        };
        if last >= MAX_TRANSPORT_SLOTS {
            return None;
        }
        let mut out = String::new();
        let mut next = 0u64;
        for (&id, tech) in &self.0 {
            out.extend(std::iter::repeat(',').take((id - next) as usize));
            out.push_str(tech);
            if id < last {
                out.push(',');
            }
            next = id + 1;
        }
        Some(out)
    }
}

impl Serialize for FeatureTypes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_transport() {
            Some(transport) => serializer.serialize_str(&transport),
            None => Err(S::Error::custom(format!(
                "featureTypes exceeds {MAX_TRANSPORT_SLOTS} slots"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub feature_types: FeatureTypes,
    pub summary: Summary,
    pub summary_by_type: SummaryByType,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Round half away from zero to 2 decimal places.
///
/// Shifts through the decimal representation so `1.005` rounds to `1.01`
/// instead of falling to `1.00` on its binary approximation.
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let shifted: f64 = format!("{value}e2").parse().unwrap_or(value * 100.0);
    let rounded = shifted.round();
    format!("{rounded}e-2").parse().unwrap_or(rounded / 100.0)
}

/// Numeric value for accumulation: null counts as 0 silently, unparseable
/// values count as 0 with a warning.
fn numeric_or_zero(value: &FieldValue, field: &str, feature_id: u64) -> f64 {
    if value.is_null() {
        return 0.0;
    }
    value.as_f64().unwrap_or_else(|| {
        log::warn!("non-numeric {field} [{value}] for feature {feature_id}, counted as 0");
        0.0
    })
}

/// Run the listing and aggregate scans for a compiled query.
pub fn aggregate<S: RecordStore + ?Sized>(store: &S, query: &CompiledQuery) -> StoreResult<Aggregation> {
    let keys = SummaryKeys::for_year(query.year);

    let rows = store.query_features(&query.predicate, &keys.projection(), Some(OrderBy::FeatureIdAsc))?;
    let sums = store.query_aggregate(&query.predicate, &keys.aggregate_spec())?;

    let total = |alias: &str| round2(sums.get(alias).copied().flatten().unwrap_or(0.0));
    let summary = Summary {
        investment_cost: total(COST),
        new_capacity: total(CAPACITY),
        electrified_population: total(PEOPLE),
    };

    let mut feature_types = BTreeMap::new();
    let mut by_type = SummaryByType::default();
    for row in &rows {
        // The base predicate guarantees a tech code.
        let Some(tech) = row.get(TECH).as_text() else {
            continue;
        };
        let fid = row.feature_id;

        *by_type.electrified_population.entry(tech.clone()).or_insert(0.0) +=
            numeric_or_zero(row.get(PEOPLE), &keys.electrified_population, fid);
        *by_type.investment_cost.entry(tech.clone()).or_insert(0.0) +=
            numeric_or_zero(row.get(COST), &keys.investment_cost, fid);
        *by_type.new_capacity.entry(tech.clone()).or_insert(0.0) +=
            numeric_or_zero(row.get(CAPACITY), &keys.new_capacity, fid);

        feature_types.insert(fid, tech);
    }

    log::debug!(
        "aggregated {} features into {} technology groups",
        rows.len(),
        by_type.investment_cost.len()
    );

    Ok(Aggregation {
        feature_types: FeatureTypes(feature_types),
        summary,
        summary_by_type: by_type,
    })
}
