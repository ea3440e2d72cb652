use clap::Parser;
use opsflow_seed::config::{AppConfig, ConfigOverrides, StoreBackend};
use opsflow_seed::logic::ApplyOptions;
use opsflow_seed::seed::{run_seed, FixtureSource};
use opsflow_seed::{store, SeedError};
use std::path::PathBuf;

/// Seed a document store from a fixture file
#[derive(Debug, Parser)]
#[command(name = "opsflow-seed", version)]
struct Cli {
    /// Fixture file (JSON, optionally gzip-compressed)
    #[arg(short, long)]
    fixture: Option<String>,

    #[arg(long, value_enum)]
    backend: Option<StoreBackend>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Database name
    #[arg(short, long)]
    database: Option<String>,

    /// Full connection string; overrides host, port and database
    #[arg(long, env = "SEED_CONNECTION_STRING", hide_env_values = true)]
    connection_string: Option<String>,

    /// Config file; defaults to an optional ./seed.{toml,json,yaml}
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Report what would change without writing
    #[arg(long)]
    dry_run: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Default to Info, keep driver chatter down; RUST_LOG overrides
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        "info,sqlx=warn,mongodb=warn",
    ))
    .init();

    let cli = Cli::parse();
    let json_output = cli.json;

    let config = AppConfig::load(cli.config.as_deref())?.with_overrides(ConfigOverrides {
        backend: cli.backend,
        host: cli.host,
        port: cli.port,
        database: cli.database,
        connection_string: cli.connection_string,
        fixture_path: cli.fixture,
        dry_run: cli.dry_run,
    });
    log::info!(
        "Configuration loaded: backend={:?} database={} fixture={}",
        config.store.backend,
        config.store.database,
        config.seed.fixture_path
    );

    let store = store::connect(&config.store)
        .await
        .map_err(|e| SeedError::store(format!("{:?} connection", config.store.backend), e))?;

    let source = FixtureSource::Path(PathBuf::from(&config.seed.fixture_path));
    let options = ApplyOptions {
        dry_run: config.seed.dry_run,
    };
    let report = run_seed(store.as_ref(), &source, options).await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    if let Some(conflict) = report.first_conflict() {
        return Err(conflict.into());
    }

    Ok(())
}
