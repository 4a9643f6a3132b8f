use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde_json::json;

const MODEL_ID: &str = "mw-1";
const TIMESTEPS: [i32; 3] = [2020, 2025, 2030];
const REGIONS: [&str; 3] = ["north", "central", "south"];
const FEATURES: i64 = 500;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64()
    }

    fn pick(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// One scenario's columns, in output order.
struct Columns {
    names: Vec<String>,
    arrays: Vec<ArrayRef>,
}

impl Columns {
    fn push(&mut self, name: impl Into<String>, array: ArrayRef) {
        self.names.push(name.into());
        self.arrays.push(array);
    }
}

/// Settlements get further from the grid over time, grid extension (code 1)
/// wins when close, otherwise one of the off-grid technologies (2..=7).
fn generate_scenario(rng: &mut SimpleRng, cost_factor: f64) -> Columns {
    let mut columns = Columns {
        names: Vec::new(),
        arrays: Vec::new(),
    };

    let ids: Vec<i64> = (1..=FEATURES).collect();
    let base_pop: Vec<f64> = ids.iter().map(|_| rng.range(50.0, 5000.0)).collect();
    let base_dist: Vec<f64> = ids.iter().map(|_| rng.range(0.0, 80.0)).collect();
    let regions: Vec<&str> = ids.iter().map(|_| REGIONS[rng.pick(REGIONS.len())]).collect();
    let density: Vec<f64> = base_pop.iter().map(|p| p / rng.range(1.0, 25.0)).collect();

    columns.push("ID", Arc::new(Int64Array::from(ids.clone())));
    columns.push("Region", Arc::new(StringArray::from(regions)));
    columns.push("PopDensity", Arc::new(Float64Array::from(density)));

    for (step, year) in TIMESTEPS.iter().enumerate() {
        let growth = 1.0 + 0.03 * (step as f64) * 5.0;
        let pop: Vec<f64> = base_pop.iter().map(|p| (p * growth).round()).collect();
        let dist: Vec<f64> = base_dist.iter().map(|d| d * (1.0 - 0.1 * step as f64)).collect();

        let codes: Vec<String> = dist
            .iter()
            .map(|d| {
                if *d < 20.0 {
                    "1".to_string()
                } else {
                    (2 + rng.pick(6)).to_string()
                }
            })
            .collect();
        let capacity: Vec<f64> = pop.iter().map(|p| p * rng.range(0.05, 0.2)).collect();
        let cost: Vec<f64> = capacity
            .iter()
            .zip(&dist)
            .map(|(c, d)| c * cost_factor * (1500.0 + 40.0 * d))
            .collect();

        columns.push(format!("FinalElecCode{year}"), Arc::new(StringArray::from(codes)));
        columns.push(format!("InvestmentCost{year}"), Arc::new(Float64Array::from(cost)));
        columns.push(format!("NewCapacity{year}"), Arc::new(Float64Array::from(capacity)));
        columns.push(format!("Pop{year}"), Arc::new(Float64Array::from(pop)));
        columns.push(format!("GridDist{year}"), Arc::new(Float64Array::from(dist)));
    }

    columns
}

fn write_parquet(path: &Path, columns: Columns) -> Result<usize> {
    let fields: Vec<Field> = columns
        .names
        .iter()
        .zip(&columns.arrays)
        .map(|(name, array)| Field::new(name, array.data_type().clone(), false))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let batch =
        RecordBatch::try_new(schema.clone(), columns.arrays).context("building record batch")?;

    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(batch.num_rows())
}

fn write_model(path: &Path) -> Result<()> {
    let model = json!({
        "id": MODEL_ID,
        "name": "Malawi electrification pathways",
        "type": "onsset",
        "country": "mw",
        "timesteps": TIMESTEPS,
        "filters": [
            { "id": "1", "key": "GridDist", "type": "range", "timestep": true, "label": "Distance to grid", "unit": "km" },
            { "id": "2", "key": "PopDensity", "type": "range", "label": "Population density" },
            { "id": "3", "key": "Region", "type": "options", "label": "Region", "options": REGIONS }
        ]
    });
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, &model).context("writing model")?;
    Ok(())
}

fn main() -> Result<()> {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let out_dir = Path::new(&out_dir);
    std::fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let model_path = out_dir.join(format!("{MODEL_ID}.model.json"));
    write_model(&model_path)?;
    println!("Wrote model definition to {}", model_path.display());

    let mut rng = SimpleRng::new(42);
    for (name, cost_factor) in [("low_cost", 0.8), ("high_cost", 1.3)] {
        let columns = generate_scenario(&mut rng, cost_factor);
        let path = out_dir.join(format!("{MODEL_ID}-{name}.parquet"));
        let rows = write_parquet(&path, columns)?;
        println!("Wrote {rows} features to {}", path.display());
    }
    Ok(())
}
