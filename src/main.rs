use clap::Parser;
use opendata_etl::utils::logger;
use opendata_etl::{AppConfig, DatasetRegistry, IngestOptions, Pipeline, SourceMode};

#[derive(Debug, Parser)]
#[command(name = "opendata-etl")]
#[command(about = "Batch ingestion pipeline for tabular and geospatial open data")]
struct Cli {
    /// Dataset key from the registry, or "all" for every enabled dataset
    #[arg(long)]
    dataset: String,

    /// Data source: live API/download, or the cached file export
    #[arg(long, default_value = "api", value_parser = parse_source)]
    source: SourceMode,

    /// JSON filter parameters, e.g. '{"year": 2023}'
    #[arg(long)]
    filter: Option<String>,

    /// Force re-download even when cached artifacts exist
    #[arg(long)]
    force: bool,

    /// Preview the transformed batch without storing anything
    #[arg(long)]
    dry_run: bool,

    /// Application config file
    #[arg(long, default_value = "config/app.toml")]
    config: String,

    /// Dataset registry file
    #[arg(long, default_value = "config/registry.toml")]
    registry: String,

    #[arg(long, help = "Enable verbose output")]
    verbose: bool,
}

fn parse_source(raw: &str) -> Result<SourceMode, String> {
    match raw {
        "api" => Ok(SourceMode::Api),
        "file" => Ok(SourceMode::File),
        other => Err(format!("invalid source '{}', expected api or file", other)),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logger::init_cli_logger(cli.verbose);

    tracing::info!("Starting opendata-etl");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let filters = match &cli.filter {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::error!("❌ Invalid filter JSON: {}", e);
                eprintln!("❌ Invalid filter JSON: {}", e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let app = match AppConfig::from_file(&cli.config) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!("❌ Configuration loading failed: {}", e);
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };
    let registry = match DatasetRegistry::from_file(&cli.registry) {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!("❌ Registry loading failed: {}", e);
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let opts = IngestOptions {
        source: cli.source,
        filters,
        force: cli.force,
        dry_run: cli.dry_run,
    };
    let pipeline = Pipeline::new(app, registry);

    let failed = if cli.dataset == "all" {
        pipeline
            .ingest_all(&opts)
            .await
            .iter()
            .filter(|(_, outcome)| outcome.is_err())
            .count()
    } else {
        match pipeline.ingest_dataset(&cli.dataset, &opts).await {
            Ok(_) => 0,
            Err(e) => {
                tracing::error!("❌ Ingestion failed: {}", e);
                eprintln!("❌ {}", e);
                1
            }
        }
    };

    if failed > 0 {
        std::process::exit(1);
    }
    tracing::info!("✅ All requested datasets processed");
}
