use clap::Parser;
use common::{Environment, LogLevel, setup_logging};
use std::path::PathBuf;
use trainer::{EvaluationConfig, UltralyticsCli, evaluate};

/// Validate trained weights on a test split
#[derive(Parser, Debug)]
#[command(name = "evaluate")]
struct Args {
    /// Evaluation configuration YAML
    #[arg(long)]
    config: PathBuf,

    /// Ultralytics command line entry point
    #[arg(long, default_value = "yolo")]
    yolo: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(LogLevel::Info, Environment::from_env());

    let config = EvaluationConfig::load(&args.config)?;
    let metrics = evaluate(&UltralyticsCli::new(args.yolo), &config).await?;

    println!("Validation precision: {:.4}", metrics.precision);
    println!("Validation recall: {:.4}", metrics.recall);
    println!("Validation mAP50: {:.4}", metrics.map50);
    println!("Validation mAP50-95: {:.4}", metrics.map50_95);
    for (index, class) in metrics.per_class.iter().enumerate() {
        println!("Class {index} ({}) precision: {:.4}", class.name, class.precision);
    }

    Ok(())
}
