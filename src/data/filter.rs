use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::model::{FeatureRecord, FilterCatalogue};
use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// FilterRequest – client input
// ---------------------------------------------------------------------------

/// A filter selection sent by the client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterRequest {
    /// Requested year as sent. Non-integral values are kept so they fail the
    /// timestep check instead of falling back to the default year.
    pub year: Option<f64>,
    pub filters: Vec<RequestFilter>,
}

/// One requested filter. Exactly one of `{min and/or max}` or `options`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFilter {
    pub key: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub options: Vec<String>,
}

impl RequestFilter {
    pub fn range(key: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        RequestFilter {
            key: key.into(),
            min,
            max,
            options: Vec::new(),
        }
    }

    pub fn options<I, S>(key: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RequestFilter {
            key: key.into(),
            min: None,
            max: None,
            options: options.into_iter().map(Into::into).collect(),
        }
    }
}

impl FilterRequest {
    /// Parse an untyped request (`{ "year": 2020, "filters": [...] }`), as it
    /// arrives from a query string or JSON body.
    ///
    /// A `year` that isn't numeric (or is 0) is treated as absent; `2030.0`
    /// and `"2030"` both mean 2030. Numbers and
    /// numeric strings are both accepted for `min`/`max`; options are compared
    /// as text so numeric options are stringified.
    pub fn from_json(value: &JsonValue) -> Result<Self, ValidationError> {
        let year = value.get("year").and_then(parse_year);

        let filters = match value.get("filters") {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| parse_filter(i, item))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(ValidationError::malformed("Filters must be an Array.")),
        };

        Ok(FilterRequest { year, filters })
    }
}

fn parse_year(value: &JsonValue) -> Option<f64> {
    let year = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    // 0 means "not set" for query-string clients
    year.filter(|y| y.is_finite() && *y != 0.0)
}

fn parse_filter(index: usize, item: &JsonValue) -> Result<RequestFilter, ValidationError> {
    let obj = item
        .as_object()
        .ok_or_else(|| ValidationError::malformed(format!("Filter {index} is not an object.")))?;

    let key = match obj.get("key") {
        Some(JsonValue::String(k)) => k.clone(),
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => return Err(ValidationError::malformed("Filter must include \"key\".")),
    };

    let min = parse_bound(&key, "min", obj.get("min"))?;
    let max = parse_bound(&key, "max", obj.get("max"))?;

    let options = match obj.get("options") {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(values)) => values
            .iter()
            .filter_map(|v| match v {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        // single option sent as a bare value, `options=foo`
        Some(JsonValue::String(s)) => vec![s.clone()],
        Some(other) => vec![other.to_string()],
    };

    Ok(RequestFilter {
        key,
        min,
        max,
        options,
    })
}

fn parse_bound(
    key: &str,
    param: &'static str,
    value: Option<&JsonValue>,
) -> Result<Option<f64>, ValidationError> {
    let invalid = |v: &JsonValue| ValidationError::InvalidFilterValue {
        key: key.to_string(),
        param,
        value: v.to_string(),
    };
    match value {
        None | Some(JsonValue::Null) => Ok(None),
        Some(v @ JsonValue::Number(n)) => n.as_f64().map(Some).ok_or_else(|| invalid(v)),
        Some(v @ JsonValue::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(v)),
        Some(v) => Err(invalid(v)),
    }
}

// ---------------------------------------------------------------------------
// Year resolution
// ---------------------------------------------------------------------------

/// Which timestep a request without `year` falls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YearPolicy {
    First,
    Last,
}

/// Resolve the effective year of a request.
///
/// `Ok(None)` for models without timesteps: the year is then an empty key suffix.
pub fn resolve_year(
    timesteps: &[i32],
    requested: Option<f64>,
    policy: YearPolicy,
) -> Result<Option<i32>, ValidationError> {
    let default = match policy {
        YearPolicy::First => timesteps.first(),
        YearPolicy::Last => timesteps.last(),
    };
    let Some(&default) = default else {
        return Ok(None);
    };

    match requested {
        None => Ok(Some(default)),
        Some(year) => timesteps
            .iter()
            .copied()
            .find(|t| f64::from(*t) == year)
            .map(Some)
            .ok_or_else(|| ValidationError::InvalidYear {
                year,
                allowed: timesteps.to_vec(),
            }),
    }
}

/// `field + year`, or the bare field when there's no time dimension.
pub fn year_key(field: &str, year: Option<i32>) -> String {
    match year {
        Some(y) => format!("{field}{y}"),
        None => field.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Predicate nodes
// ---------------------------------------------------------------------------

/// Inclusive numeric range on a filter storage key.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeNode {
    pub storage_key: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Text set-membership on a filter storage key.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionsNode {
    pub storage_key: String,
    pub options: BTreeSet<String>,
}

impl OptionsNode {
    /// Numeric options match by value, so `"1.0"` selects a cell holding 1.
    fn contains_number(&self, value: f64) -> bool {
        self.options
            .iter()
            .any(|o| o.trim().parse::<f64>().is_ok_and(|n| n == value))
    }
}

/// Closed predicate tree, built only from validated catalogue entries and
/// request values. Store adapters translate it into their native query form.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `scenarioId = ?`
    Scenario(String),
    /// `featureId = ?`
    Feature(u64),
    /// `summary[key]` is present and not null.
    SummaryPresent(String),
    Range(RangeNode),
    Options(OptionsNode),
    And(Vec<Predicate>),
}

impl Predicate {
    /// Evaluate against one record. Used by in-memory stores.
    pub fn matches(&self, record: &FeatureRecord) -> bool {
        match self {
            Predicate::Scenario(id) => record.scenario_id == *id,
            Predicate::Feature(id) => record.feature_id == *id,
            Predicate::SummaryPresent(key) => !record.summary_value(key).is_null(),
            Predicate::Range(node) => match record.filter_value(&node.storage_key).as_f64() {
                Some(v) => {
                    node.min.map_or(true, |min| v >= min) && node.max.map_or(true, |max| v <= max)
                }
                None => false,
            },
            Predicate::Options(node) => {
                let value = record.filter_value(&node.storage_key);
                value.as_text().is_some_and(|v| node.options.contains(&v))
                    || value.as_f64().is_some_and(|v| node.contains_number(v))
            }
            // Empty AND is the universal set.
            Predicate::And(nodes) => nodes.iter().all(|p| p.matches(record)),
        }
    }

    /// Scenario id this predicate is pinned to, if any. Lets stores skip
    /// other scenarios' partitions.
    pub fn scenario(&self) -> Option<&str> {
        match self {
            Predicate::Scenario(id) => Some(id),
            Predicate::And(nodes) => nodes.iter().find_map(Predicate::scenario),
            _ => None,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Scenario(id) => write!(f, "scenarioId = {id:?}"),
            Predicate::Feature(id) => write!(f, "featureId = {id}"),
            Predicate::SummaryPresent(key) => write!(f, "summary.{key} IS NOT NULL"),
            Predicate::Range(node) => match (node.min, node.max) {
                (Some(min), Some(max)) => write!(f, "{min} <= filterValues.{} <= {max}", node.storage_key),
                (Some(min), None) => write!(f, "filterValues.{} >= {min}", node.storage_key),
                (None, Some(max)) => write!(f, "filterValues.{} <= {max}", node.storage_key),
                (None, None) => write!(f, "filterValues.{} IS NUMERIC", node.storage_key),
            },
            Predicate::Options(node) => {
                write!(f, "filterValues.{} IN {:?}", node.storage_key, node.options)
            }
            Predicate::And(nodes) => {
                let parts: Vec<String> = nodes.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", parts.join(" AND "))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// A validated request: resolved year plus the predicate shared by the
/// listing and aggregate scans.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub year: Option<i32>,
    pub predicate: Predicate,
}

/// Validate `request` against `catalogue` and compile it into a predicate.
///
/// Fails fast on the first violation: the year first, then each filter in
/// request order.
pub fn compile(
    catalogue: &FilterCatalogue,
    timesteps: &[i32],
    scenario_id: &str,
    request: &FilterRequest,
    policy: YearPolicy,
) -> Result<CompiledQuery, ValidationError> {
    let year = resolve_year(timesteps, request.year, policy)?;

    let mut nodes = vec![
        Predicate::Scenario(scenario_id.to_string()),
        Predicate::SummaryPresent(year_key(super::aggregate::ELEC_CODE, year)),
    ];

    for filter in &request.filters {
        let entry = catalogue
            .find_by_key(&filter.key)
            .ok_or_else(|| ValidationError::UnknownFilterKey {
                key: filter.key.clone(),
            })?;

        let has_range = filter.min.is_some() || filter.max.is_some();
        let has_options = !filter.options.is_empty();
        if has_range && has_options {
            return Err(ValidationError::ConflictingFilterValue {
                key: filter.key.clone(),
            });
        }
        if !has_range && !has_options {
            return Err(ValidationError::MissingFilterValue {
                key: filter.key.clone(),
            });
        }

        let storage_key = if entry.definition.timestep {
            year_key(&entry.definition.key, year)
        } else {
            entry.definition.key.clone()
        };

        if has_range {
            nodes.push(Predicate::Range(RangeNode {
                storage_key,
                min: filter.min,
                max: filter.max,
            }));
        } else {
            nodes.push(Predicate::Options(OptionsNode {
                storage_key,
                options: filter.options.iter().cloned().collect(),
            }));
        }
    }

    let predicate = Predicate::And(nodes);
    log::debug!("compiled filter request for {scenario_id}: {predicate}");
    Ok(CompiledQuery { year, predicate })
}
