use anyhow::Result;
use clap::Parser;
use shoprec::services::dataset::{self, DatasetSource, JsonFileDataset};
use shoprec::{init_tracing, AppState, Config, TrainingOptions};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train the recommendation model once and persist it", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON file of interaction records; overrides the configured dataset.
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Requested epochs (never fewer than 50).
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Directory for the model artifacts; overrides `storage.model_dir`.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    info!("Starting shoprec trainer");

    let mut config = Config::load_or_default(&args.config)?;
    if let Some(output) = args.output {
        config.storage.model_dir = output;
    }
    // A fresh run does not need the previous artifacts in memory.
    config.storage.load_on_startup = false;
    info!("Training configuration loaded: {:?}", config.training);

    let source: Box<dyn DatasetSource> = match args.dataset {
        Some(path) => Box::new(JsonFileDataset::new(path)),
        None => dataset::from_config(&config.dataset)?,
    };

    let state = AppState::new(config).await?;
    let options = TrainingOptions { epochs: args.epochs };
    let report = state
        .training_service
        .train_from_source(source.as_ref(), options)
        .await?;

    info!(
        "Training run {} complete: {} users, {} products, {} epochs",
        report.run_id, report.num_users, report.num_products, report.epochs
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
