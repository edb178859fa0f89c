use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ags_harvester::app::{App, CancelToken, HarvestResult};
use ags_harvester::arcgis::ArcGisHttpClient;
use ags_harvester::config::{
    ConfigLoader, DEFAULT_OUT_DIR, DEFAULT_SERVICES_FILE, HarvestSettings, normalize_out_dir,
};
use ags_harvester::emit::BatchEmitter;
use ags_harvester::error::HarvestError;
use ags_harvester::geojson::EsriGeoJsonConverter;
use ags_harvester::output::{JsonOutput, LogOutput, OutputMode};

#[derive(Parser)]
#[command(name = "ags-harvest")]
#[command(about = "Export ArcGIS feature services to Esri JSON and GeoJSON files")]
#[command(version)]
struct Cli {
    /// File with one `serviceUrl|outputName` per line
    #[arg(default_value = DEFAULT_SERVICES_FILE)]
    services: String,

    /// Directory receiving the exported files
    #[arg(default_value = DEFAULT_OUT_DIR)]
    out_dir: String,

    /// JSON file with harvest settings; flags below override it
    #[arg(long)]
    settings: Option<String>,

    /// Object ids per query request
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Query requests aggregated into one output file
    #[arg(long)]
    chunks_per_file: Option<usize>,

    /// Upper bound on simultaneous query requests
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidSettings(_)
        | HarvestError::InvalidServiceUrl(_)
        | HarvestError::InvalidObjectId(_) => 2,
        HarvestError::Cancelled => 130,
        err if err.is_remote() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Log
    };

    let settings = resolve_settings(&cli)?;
    let config = ConfigLoader::resolve(Some(cli.services.as_str()))?;
    if config.services.is_empty() {
        tracing::warn!(file = %cli.services, "no services to harvest");
    }

    let client = ArcGisHttpClient::new(settings.request_timeout())?;
    let emitter = BatchEmitter::new(normalize_out_dir(&cli.out_dir), EsriGeoJsonConverter)?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, stopping after in-flight requests settle");
        handler_token.cancel();
    })
    .into_diagnostic()?;

    let app = App::new(client, emitter, settings)?.with_cancel_token(cancel);
    let result = app.harvest(&config, &LogOutput)?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_harvest(&result).into_diagnostic()?,
        OutputMode::Log => print_summary(&result),
    }
    Ok(())
}

fn resolve_settings(cli: &Cli) -> Result<HarvestSettings, HarvestError> {
    let mut settings = match &cli.settings {
        Some(path) => HarvestSettings::load(path)?,
        None => HarvestSettings::default(),
    };
    if let Some(chunk_size) = cli.chunk_size {
        settings.chunk_size = chunk_size;
    }
    if let Some(chunks_per_file) = cli.chunks_per_file {
        settings.chunks_per_file = chunks_per_file;
    }
    if let Some(max_in_flight) = cli.max_in_flight {
        settings.max_in_flight = Some(max_in_flight);
    }
    if let Some(timeout_secs) = cli.timeout_secs {
        settings.request_timeout_secs = timeout_secs;
    }
    settings.validate()?;
    Ok(settings)
}

fn print_summary(result: &HarvestResult) {
    for service in &result.services {
        println!(
            "{}: {}/{} records in {} file(s), {} failed chunk(s)",
            service.service,
            service.records_written,
            service.records,
            service.files.len(),
            service.failed_chunks
        );
        for files in &service.files {
            match &files.secondary {
                Some(secondary) => println!("  {} + {}", files.primary, secondary),
                None => println!("  {} (no geojson)", files.primary),
            }
        }
    }
    if result.skipped_lines > 0 {
        println!("skipped {} malformed services line(s)", result.skipped_lines);
    }
}
