use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// FieldValue – a single cell of a feature's summary or filter values
// ---------------------------------------------------------------------------

/// A dynamically-typed cell as found in scenario output files.
///
/// Serialized untagged so a record round-trips as plain JSON
/// (`{"Pop2020": 120, "FinalElecCode2020": "1"}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{s}"),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Null => write!(f, "<null>"),
        }
    }
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Numeric cast. Numeric strings parse; anything else is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) if v.is_finite() => Some(*v),
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    /// Text cast used by option filters and tech-type grouping.
    /// `None` for nulls, which never match anything. Floats render in their
    /// shortest form, so a `1.0` cell groups under `"1"`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            other => Some(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// FeatureRecord – one row per (scenario, feature)
// ---------------------------------------------------------------------------

/// Projected outcomes of one feature (settlement) under one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRecord {
    pub scenario_id: String,
    pub feature_id: u64,
    /// `<fieldName><year?>` → value, e.g. `InvestmentCost2030`.
    pub summary: BTreeMap<String, FieldValue>,
    /// `<filterKey><year?>` → value. Only read by predicates and bound scans.
    pub filter_values: BTreeMap<String, FieldValue>,
}

impl FeatureRecord {
    pub fn summary_value(&self, key: &str) -> &FieldValue {
        self.summary.get(key).unwrap_or(&FieldValue::Null)
    }

    pub fn filter_value(&self, key: &str) -> &FieldValue {
        self.filter_values.get(key).unwrap_or(&FieldValue::Null)
    }
}

// ---------------------------------------------------------------------------
// Filter definitions and the derived catalogue
// ---------------------------------------------------------------------------

/// Kind of filter as declared in the model definition.
///
/// Anything other than `range` or `options` is kept verbatim so ingestion can
/// report it before excluding it from the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterType {
    Range,
    Options,
    Other(String),
}

impl From<String> for FilterType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "range" => FilterType::Range,
            "options" => FilterType::Options,
            _ => FilterType::Other(value),
        }
    }
}

impl From<FilterType> for String {
    fn from(value: FilterType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterType::Range => write!(f, "range"),
            FilterType::Options => write!(f, "options"),
            FilterType::Other(other) => write!(f, "{other}"),
        }
    }
}

/// A filter as declared by the model author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDefinition {
    pub key: String,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    #[serde(default)]
    pub timestep: bool,
    /// Stable identifier used to order the catalogue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Presentation attributes (label, unit, description…) carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FilterDefinition {
    pub fn new(key: impl Into<String>, filter_type: FilterType, timestep: bool) -> Self {
        FilterDefinition {
            key: key.into(),
            filter_type,
            timestep,
            id: None,
            extra: BTreeMap::new(),
        }
    }

    /// Storage keys holding this filter's values: `key + year` for every
    /// timestep when time-stepped, the bare key otherwise.
    pub fn storage_keys(&self, timesteps: &[i32]) -> Vec<String> {
        if self.timestep && !timesteps.is_empty() {
            timesteps.iter().map(|t| format!("{}{t}", self.key)).collect()
        } else {
            vec![self.key.clone()]
        }
    }

    fn sort_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.key)
    }
}

/// Inclusive integer-aligned bounds of a range filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeBounds {
    pub min: f64,
    pub max: f64,
}

/// One catalogue entry: the definition plus derived bounds for range filters.
///
/// Serialized as `{ key, type, timestep, range?: {min, max}, ...extra }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    #[serde(flatten)]
    pub definition: FilterDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeBounds>,
}

/// The filters a scenario can be queried by.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterCatalogue {
    entries: Vec<CatalogueEntry>,
}

impl FilterCatalogue {
    /// Build a catalogue, stably ordered by filter id (key when id is absent).
    pub fn new(mut entries: Vec<CatalogueEntry>) -> Self {
        entries.sort_by(|a, b| a.definition.sort_id().cmp(b.definition.sort_id()));
        FilterCatalogue { entries }
    }

    /// Catalogue straight from a model's declarations, without derived bounds.
    /// Definitions of unknown type are left out.
    pub fn from_definitions(model: &Model) -> Self {
        let entries = model
            .normalized_filters()
            .into_iter()
            .filter(|f| matches!(f.filter_type, FilterType::Range | FilterType::Options))
            .map(|definition| CatalogueEntry {
                definition,
                range: None,
            })
            .collect();
        Self::new(entries)
    }

    pub fn find_by_key(&self, key: &str) -> Option<&CatalogueEntry> {
        self.entries.iter().find(|e| e.definition.key == key)
    }

    pub fn entries(&self) -> &[CatalogueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ingestion artifact linking a scenario to its catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDetail {
    pub scenario_id: String,
    pub filters: FilterCatalogue,
}

// ---------------------------------------------------------------------------
// Model / Country
// ---------------------------------------------------------------------------

/// An energy-planning model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Modelling approach (e.g. `onsset`); counted by the stats endpoint.
    #[serde(rename = "type", default)]
    pub model_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Empty (or `null` in the source file) when the model has no time dimension.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub timesteps: Vec<i32>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub filters: Vec<FilterDefinition>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Model {
    pub fn has_timesteps(&self) -> bool {
        !self.timesteps.is_empty()
    }

    /// Declared filters with `timestep` forced off for models without a time
    /// dimension.
    pub fn normalized_filters(&self) -> Vec<FilterDefinition> {
        let has_timesteps = self.has_timesteps();
        self.filters
            .iter()
            .cloned()
            .map(|mut f| {
                f.timestep = has_timesteps && f.timestep;
                f
            })
            .collect()
    }

    /// Every filter storage key of the model, across all timesteps.
    pub fn filter_storage_keys(&self) -> Vec<String> {
        self.normalized_filters()
            .iter()
            .flat_map(|f| f.storage_keys(&self.timesteps))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: String,
    pub name: String,
}
