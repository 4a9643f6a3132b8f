use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use elec_scenarios::data::loader::{load_countries, load_model, load_scenario_file, ScenarioBatch};
use elec_scenarios::data::model::ScenarioDetail;
use elec_scenarios::service::{self, model_id_of};
use elec_scenarios::{
    ingest_model, EngineConfig, EngineError, ErrorClass, FilterRequest, IngestReport, MemoryStore,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match EngineConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(2);
        }
    };
    init_logging(&config);

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let class = err.downcast_ref::<EngineError>().map(EngineError::class);
            match class {
                Some(ErrorClass::ClientFault) => ExitCode::from(2),
                Some(ErrorClass::NotFound) => ExitCode::from(3),
                Some(ErrorClass::ServerFault) | None => ExitCode::FAILURE,
            }
        }
    }
}

fn init_logging(config: &EngineConfig) {
    let default_filter = config.log_filter.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Filter and summarise electrification scenario outputs"
)]
struct Cli {
    /// Engine config (JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load models and scenario outputs, derive filter catalogues, report skipped filters.
    Ingest(IngestArgs),
    /// Filter a scenario's features and summarise them by technology.
    List(ListArgs),
    /// Show the summary values of one feature.
    Feature(FeatureArgs),
    /// Count countries and model types.
    Stats(DatasetArgs),
    /// Print a model definition.
    Model(ModelArgs),
    /// List countries by name.
    Countries(DatasetArgs),
    /// Print a country with its models.
    Country(CountryArgs),
}

#[derive(Args)]
struct DatasetArgs {
    /// Model definition files (JSON).
    #[arg(long = "model", required = true)]
    models: Vec<PathBuf>,
    /// Scenario output files (.csv, .json, .parquet), named `<model-id>-<scenario>`.
    #[arg(long = "scenario-file")]
    scenario_files: Vec<PathBuf>,
    /// Country list (JSON array of `{ id, name }`).
    #[arg(long)]
    countries: Option<PathBuf>,
}

#[derive(Args)]
struct IngestArgs {
    #[command(flatten)]
    dataset: DatasetArgs,
    /// Write the derived scenario catalogues here.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct ListArgs {
    #[command(flatten)]
    dataset: DatasetArgs,
    /// Scenario id, e.g. `mw-1-0_0_0`.
    #[arg(long)]
    scenario: String,
    #[arg(long)]
    year: Option<i64>,
    /// Filters as a JSON array: `[{"key":"GridDist","max":10}]`.
    #[arg(long)]
    filters: Option<String>,
}

#[derive(Args)]
struct FeatureArgs {
    #[command(flatten)]
    dataset: DatasetArgs,
    #[arg(long)]
    scenario: String,
    #[arg(long)]
    feature: u64,
    #[arg(long)]
    year: Option<i64>,
}

#[derive(Args)]
struct ModelArgs {
    #[command(flatten)]
    dataset: DatasetArgs,
    #[arg(long)]
    id: String,
}

#[derive(Args)]
struct CountryArgs {
    #[command(flatten)]
    dataset: DatasetArgs,
    /// Two-letter country code.
    #[arg(long)]
    id: String,
}

fn run(command: Command, config: &EngineConfig) -> Result<()> {
    match command {
        Command::Ingest(args) => {
            let (store, reports) = load_dataset(&args.dataset)?;
            if let Some(out) = &args.out {
                write_catalogues(&store, &reports, out)?;
            }
            print_json(&reports.iter().map(ReportView::from).collect::<Vec<_>>())
        }
        Command::List(args) => {
            let (store, _) = load_dataset(&args.dataset)?;
            let request = build_request(args.year, args.filters.as_deref())?;
            let snapshot = store.snapshot()?;
            let listing = service::list_scenario(&*snapshot, config, &args.scenario, &request)?;
            print_json(&listing)
        }
        Command::Feature(args) => {
            let (store, _) = load_dataset(&args.dataset)?;
            let snapshot = store.snapshot()?;
            let feature = service::scenario_feature(
                &*snapshot,
                config,
                &args.scenario,
                args.feature,
                args.year,
            )?;
            print_json(&feature)
        }
        Command::Stats(dataset) => {
            let (store, _) = load_dataset(&dataset)?;
            print_json(&service::stats(&store)?)
        }
        Command::Model(args) => {
            let (store, _) = load_dataset(&args.dataset)?;
            print_json(&service::model(&store, &args.id)?)
        }
        Command::Countries(dataset) => {
            let (store, _) = load_dataset(&dataset)?;
            print_json(&service::countries(&store)?)
        }
        Command::Country(args) => {
            let (store, _) = load_dataset(&args.dataset)?;
            print_json(&service::country(&store, &args.id)?)
        }
    }
}

fn build_request(year: Option<i64>, filters: Option<&str>) -> Result<FilterRequest> {
    let mut raw = serde_json::Map::new();
    if let Some(year) = year {
        raw.insert("year".into(), year.into());
    }
    if let Some(filters) = filters {
        let parsed: serde_json::Value =
            serde_json::from_str(filters).context("parsing --filters as JSON")?;
        raw.insert("filters".into(), parsed);
    }
    let request = FilterRequest::from_json(&serde_json::Value::Object(raw))
        .map_err(EngineError::from)?;
    Ok(request)
}

/// Load every model with its scenario files into a fresh store.
fn load_dataset(args: &DatasetArgs) -> Result<(MemoryStore, Vec<IngestReport>)> {
    let store = MemoryStore::default();

    if let Some(path) = &args.countries {
        store.load_countries(load_countries(path)?)?;
    }

    let mut reports = Vec::new();
    for model_path in &args.models {
        let model = load_model(model_path)?;
        let batches = args
            .scenario_files
            .iter()
            .filter(|p| scenario_model_id(p).as_deref() == Some(model.id.as_str()))
            .map(|p| load_scenario_file(p, &model))
            .collect::<Result<Vec<ScenarioBatch>>>()?;
        reports.push(ingest_model(&store, model, batches)?);
    }
    Ok((store, reports))
}

fn scenario_model_id(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?.to_lowercase();
    Some(model_id_of(&stem).to_string())
}

fn write_catalogues(store: &MemoryStore, reports: &[IngestReport], out: &Path) -> Result<()> {
    let snapshot = store.snapshot()?;
    let details: Vec<&ScenarioDetail> = reports
        .iter()
        .flat_map(|r| r.scenarios.iter())
        .filter_map(|sid| snapshot.scenario_detail(sid))
        .collect();
    let file = std::fs::File::create(out)
        .with_context(|| format!("creating {}", out.display()))?;
    serde_json::to_writer_pretty(file, &details).context("writing catalogues")?;
    log::info!("wrote {} scenario catalogues to {}", details.len(), out.display());
    Ok(())
}

#[derive(Serialize)]
struct ReportView {
    model: String,
    scenarios: Vec<String>,
    features: usize,
    skipped: Vec<String>,
}

impl From<&IngestReport> for ReportView {
    fn from(report: &IngestReport) -> Self {
        ReportView {
            model: report.model_id.clone(),
            scenarios: report.scenarios.clone(),
            features: report.features,
            skipped: report
                .warnings
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value).context("writing output")?;
    writeln!(out)?;
    Ok(())
}
