use clap::Parser;
use common::{Environment, LogLevel, init_observability};
use std::path::PathBuf;
use trainer::{MlflowTracker, TrainingConfig, TrainingDriver, UltralyticsCli};

/// Train a detector, evaluate it against the canonical checkpoint and
/// promote it when it scores at least as well
#[derive(Parser, Debug)]
#[command(name = "train")]
struct Args {
    /// Training configuration YAML
    #[arg(long)]
    config: PathBuf,

    /// Ultralytics command line entry point
    #[arg(long, default_value = "yolo")]
    yolo: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let otel_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
    let _telemetry = init_observability(
        "trainer",
        otel_endpoint.as_deref(),
        LogLevel::Info,
        Environment::from_env(),
    )?;

    let config = TrainingConfig::load(&args.config)?;
    tracing::info!(config = ?config, "Loaded training configuration");

    let tracker = MlflowTracker::new(&config.mlflow.tracking_uri, &config.mlflow.experiment_name);
    let mut driver = TrainingDriver::new(config, UltralyticsCli::new(args.yolo), tracker);

    let report = driver.run().await?;

    println!("Run: {}", report.run_name);
    println!("Decision: {:?}", report.decision);
    match report.final_score {
        Some(score) => println!("Validation mAP50-95: {score:.4}"),
        None => println!("Validation mAP50-95: n/a"),
    }

    Ok(())
}
