use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    UInt32Array, UInt64Array,
};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{Country, FeatureRecord, FieldValue, Model};

/// Column names accepted as the feature id, in lookup order.
pub const FEATURE_ID_COLUMNS: [&str; 3] = ["ID", "id", "featureId"];

/// All feature records of one scenario output file.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioBatch {
    pub scenario_id: String,
    pub records: Vec<FeatureRecord>,
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a model definition (JSON).
pub fn load_model(path: &Path) -> Result<Model> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading model {}", path.display()))?;
    let mut model: Model = serde_json::from_str(&text)
        .with_context(|| format!("parsing model {}", path.display()))?;
    model.id = model.id.to_lowercase();
    Ok(model)
}

/// Load a country list (JSON array of `{ id, name }`).
pub fn load_countries(path: &Path) -> Result<Vec<Country>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading countries {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing countries {}", path.display()))
}

/// Load one scenario output file. Dispatch by extension.
///
/// The scenario id is the lowercased file stem. Columns that are filter
/// storage keys of `model` become `filterValues`; every other column except
/// the feature id goes to `summary`.
///
/// Supported formats:
/// * `.csv`     – one row per feature, header row with column names
/// * `.json`    – `[{ "ID": 1, "Pop2020": 120, ... }, ...]`
/// * `.parquet` – scalar columns, one row per feature
pub fn load_scenario_file(path: &Path, model: &Model) -> Result<ScenarioBatch> {
    let scenario_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .context("scenario file has no usable name")?
        .to_lowercase();

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let rows = match ext.as_str() {
        "csv" => load_csv(path),
        "json" => load_json(path),
        "parquet" | "pq" => load_parquet(path),
        other => Err(anyhow!("Unsupported file extension: .{other}")),
    }
    .with_context(|| format!("loading scenario {}", path.display()))?;

    let filter_keys: BTreeSet<String> = model.filter_storage_keys().into_iter().collect();
    let records = rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| into_record(&scenario_id, &filter_keys, i, row))
        .collect::<Result<Vec<_>>>()?;

    log::debug!("loaded {} features for scenario {scenario_id}", records.len());
    Ok(ScenarioBatch {
        scenario_id,
        records,
    })
}

type RawRow = BTreeMap<String, FieldValue>;

fn into_record(
    scenario_id: &str,
    filter_keys: &BTreeSet<String>,
    index: usize,
    mut row: RawRow,
) -> Result<FeatureRecord> {
    let id_value = FEATURE_ID_COLUMNS
        .iter()
        .find_map(|c| row.remove(*c))
        .with_context(|| format!("Row {index}: missing feature id column"))?;
    let feature_id = feature_id(&id_value)
        .with_context(|| format!("Row {index}: invalid feature id [{id_value}]"))?;

    let (filter_values, summary): (RawRow, RawRow) =
        row.into_iter().partition(|(k, _)| filter_keys.contains(k));

    Ok(FeatureRecord {
        scenario_id: scenario_id.to_string(),
        feature_id,
        summary,
        filter_values,
    })
}

fn feature_id(value: &FieldValue) -> Option<u64> {
    match value {
        FieldValue::Integer(i) => u64::try_from(*i).ok(),
        FieldValue::Float(f) if f.fract() == 0.0 && *f >= 0.0 => Some(*f as u64),
        FieldValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

fn load_json(path: &Path) -> Result<Vec<RawRow>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    records
        .iter()
        .enumerate()
        .map(|(i, rec)| -> Result<RawRow> {
            let obj = rec
                .as_object()
                .with_context(|| format!("Row {i} is not a JSON object"))?;
            Ok(obj
                .iter()
                .map(|(key, val)| (key.clone(), json_to_field(val)))
                .collect())
        })
        .collect()
}

fn json_to_field(val: &JsonValue) -> FieldValue {
    match val {
        JsonValue::String(s) => FieldValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                FieldValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                FieldValue::Float(f)
            } else {
                FieldValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => FieldValue::Bool(*b),
        JsonValue::Null => FieldValue::Null,
        other => FieldValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

fn load_csv(path: &Path) -> Result<Vec<RawRow>> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(col, value)| (col.clone(), guess_field_type(value)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn guess_field_type(s: &str) -> FieldValue {
    let s = s.trim();
    if s.is_empty() {
        return FieldValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return FieldValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return FieldValue::Float(f);
    }
    if s == "true" || s == "false" {
        return FieldValue::Bool(s == "true");
    }
    FieldValue::String(s.to_string())
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Works with files written by Pandas (`df.to_parquet()`), Polars
/// (`df.write_parquet()`) and the bundled sample generator.
fn load_parquet(path: &Path) -> Result<Vec<RawRow>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        for row in 0..batch.num_rows() {
            let mut values = BTreeMap::new();
            for (col_idx, field) in schema.fields().iter().enumerate() {
                let value = extract_field_value(batch.column(col_idx), row)
                    .with_context(|| format!("Row {row}, column '{}'", field.name()))?;
                values.insert(field.name().clone(), value);
            }
            rows.push(values);
        }
    }
    Ok(rows)
}

/// Extract a single cell from an Arrow column at a given row.
fn extract_field_value(col: &Arc<dyn Array>, row: usize) -> Result<FieldValue> {
    if col.is_null(row) {
        return Ok(FieldValue::Null);
    }
    let value = match col.data_type() {
        DataType::Utf8 => FieldValue::String(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => FieldValue::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => FieldValue::Integer(i64::from(downcast::<Int32Array>(col)?.value(row))),
        DataType::Int64 => FieldValue::Integer(downcast::<Int64Array>(col)?.value(row)),
        DataType::UInt32 => FieldValue::Integer(i64::from(downcast::<UInt32Array>(col)?.value(row))),
        DataType::UInt64 => {
            let v = downcast::<UInt64Array>(col)?.value(row);
            i64::try_from(v).map_or(FieldValue::Float(v as f64), FieldValue::Integer)
        }
        DataType::Float32 => FieldValue::Float(f64::from(downcast::<Float32Array>(col)?.value(row))),
        DataType::Float64 => FieldValue::Float(downcast::<Float64Array>(col)?.value(row)),
        DataType::Boolean => FieldValue::Bool(downcast::<BooleanArray>(col)?.value(row)),
        other => bail!("unsupported column type {other:?}"),
    };
    Ok(value)
}

fn downcast<T: Array + 'static>(col: &Arc<dyn Array>) -> Result<&T> {
    col.as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("unexpected array layout for {:?}", col.data_type()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Model {
        serde_json::from_value(serde_json::json!({
            "id": "mw-1",
            "timesteps": [2020, 2030],
            "filters": [
                { "key": "GridDist", "type": "range", "timestep": true },
                { "key": "Region", "type": "options" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn csv_columns_split_into_summary_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MW-1-Base.csv");
        std::fs::write(
            &path,
            "ID,FinalElecCode2020,Pop2020,GridDist2020,GridDist2030,Region\n\
             7,1,120.5,3.2,,north\n\
             2,2,,4,5,south\n",
        )
        .unwrap();

        let batch = load_scenario_file(&path, &model()).unwrap();
        assert_eq!(batch.scenario_id, "mw-1-base");
        assert_eq!(batch.records.len(), 2);

        let first = &batch.records[0];
        assert_eq!(first.feature_id, 7);
        assert_eq!(first.summary_value("Pop2020"), &FieldValue::Float(120.5));
        assert_eq!(first.summary_value("FinalElecCode2020"), &FieldValue::Integer(1));
        assert_eq!(first.filter_value("GridDist2030"), &FieldValue::Null);
        assert_eq!(first.filter_value("Region"), &FieldValue::String("north".into()));
        assert!(!first.summary.contains_key("GridDist2020"));
        assert!(!first.summary.contains_key("ID"));
    }

    #[test]
    fn json_rows_need_a_feature_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mw-1-a.json");
        std::fs::write(&path, r#"[{ "featureId": "4", "Pop2020": 10 }]"#).unwrap();
        let batch = load_scenario_file(&path, &model()).unwrap();
        assert_eq!(batch.records[0].feature_id, 4);

        std::fs::write(&path, r#"[{ "Pop2020": 10 }]"#).unwrap();
        assert!(load_scenario_file(&path, &model()).is_err());
    }

    #[test]
    fn rejects_unknown_extensions() {
        let err = load_scenario_file(Path::new("mw-1-a.xlsx"), &model()).unwrap_err();
        assert!(err.to_string().contains("loading scenario"));
    }

    #[test]
    fn csv_type_guessing() {
        assert_eq!(guess_field_type(""), FieldValue::Null);
        assert_eq!(guess_field_type("12"), FieldValue::Integer(12));
        assert_eq!(guess_field_type("1.5"), FieldValue::Float(1.5));
        assert_eq!(guess_field_type("true"), FieldValue::Bool(true));
        assert_eq!(guess_field_type("grid"), FieldValue::String("grid".into()));
    }
}
