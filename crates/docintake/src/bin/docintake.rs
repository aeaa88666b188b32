use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::sync::watch;

use docintake::capability::DocumentIntelligenceClient;
use docintake::config::{apply_env_overrides, load_config, validate_config, Config};
use docintake::db::{RecordStore, SqliteRecordStore};
use docintake::pipeline::{PipelineConfig, StageContext};
use docintake::storage::{BlobStore, FsBlobStore, StorageRelocator};
use docintake::telemetry;
use docintake::worker::{Dispatcher, LocationWatcher};

#[derive(Parser)]
#[command(name = "docintake", version, about = "Split, classify and OCR uploaded PDF documents")]
struct Cli {
    /// JSON config file. Without one, defaults plus DOCINTAKE_* variables apply.
    #[arg(short, long, env = "DOCINTAKE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch storage and run the pipeline until interrupted
    Run,
    /// Upload a file into the input location
    Submit {
        file: PathBuf,
        /// Storage key to use instead of the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Print a pipeline record as JSON
    Record { id: String },
    /// Print the error log of a document as JSON
    Errors { id: String },
}

fn load_settings(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::from_env()?);
    };
    let mut config = load_config(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

fn open_store(config: &Config) -> StorageRelocator {
    StorageRelocator::new(Arc::new(FsBlobStore::new(&config.storage.root)))
}

fn open_records(config: &Config) -> Result<SqliteRecordStore> {
    SqliteRecordStore::open(Path::new(&config.records.path))
        .with_context(|| format!("Failed to open record store {}", config.records.path))
}

async fn run(config: Config) -> Result<()> {
    config
        .classification
        .require_model_id()
        .context("A classifier model is required to run the pipeline")?;

    let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.storage.root));
    let storage = StorageRelocator::new(store.clone());
    let locations = &config.locations;
    for location in [
        &locations.input,
        &locations.backup,
        &locations.invalid_files,
        &locations.splitted,
    ] {
        storage
            .ensure_location(location)
            .await
            .with_context(|| format!("Failed to create location {}", location))?;
    }

    let records = Arc::new(open_records(&config)?);
    let capability = Arc::new(DocumentIntelligenceClient::from_config(&config.capability)?);
    let ctx = StageContext::new(
        PipelineConfig::from_config(&config),
        storage,
        records,
        capability,
    );

    let mut dispatcher = Dispatcher::for_pipeline(ctx, config.worker_count);
    let watcher = LocationWatcher::new(store, Duration::from_millis(config.watch_interval_ms));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!("Cannot listen for interrupts, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    info!("Pipeline running on {}", config.storage.root);
    watcher.run(&mut dispatcher, shutdown_rx).await?;
    info!("Pipeline stopped");
    Ok(())
}

async fn submit(config: Config, file: PathBuf, name: Option<String>) -> Result<()> {
    let key = match name {
        Some(name) => name,
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("Cannot derive a storage key from the file name, pass --name")?,
    };
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let storage = open_store(&config);
    storage
        .upload(&config.locations.input, &key, &bytes)
        .await?;
    println!("Submitted {} to {} ({} bytes)", key, config.locations.input, bytes.len());
    Ok(())
}

async fn show_record(config: Config, id: String) -> Result<()> {
    let records = open_records(&config)?;
    match records.get(&id).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("No record for {}", id),
    }
    Ok(())
}

async fn show_errors(config: Config, id: String) -> Result<()> {
    let records = open_records(&config)?;
    let errors = records.errors_for(&id).await?;
    println!("{}", serde_json::to_string_pretty(&errors)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_settings(cli.config.as_deref())?;
    telemetry::init_logging(config.log_format)?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Submit { file, name } => submit(config, file, name).await,
        Commands::Record { id } => show_record(config, id).await,
        Commands::Errors { id } => show_errors(config, id).await,
    }
}
