use crate::{config::TrainingConfig, error::TrainerError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Metrics Ultralytics records at the end of one epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
    pub epoch: u64,
    pub box_loss: f64,
    pub cls_loss: f64,
    pub dfl_loss: f64,
    pub map50: f64,
    pub map50_95: f64,
}

impl EpochMetrics {
    /// Tracker metric keys and values for this epoch.
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("train/box_loss", self.box_loss),
            ("train/cls_loss", self.cls_loss),
            ("train/dfl_loss", self.dfl_loss),
            ("metrics/mAP50", self.map50),
            ("metrics/mAP50-95", self.map50_95),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub save_dir: PathBuf,
    /// Best weights of the run, if the backend produced any.
    pub best_weights: Option<PathBuf>,
    pub epochs: Vec<EpochMetrics>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub map50: f64,
    pub map50_95: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationMetrics {
    pub precision: f64,
    pub recall: f64,
    pub map50: f64,
    /// Checkpoint comparison score.
    pub map50_95: f64,
    pub per_class: Vec<ClassMetrics>,
}

/// External training and validation routine.
#[async_trait]
pub trait TrainingBackend: Send + Sync {
    /// Train starting from `init_weights` (checkpoint path or architecture id).
    async fn train(
        &self,
        config: &TrainingConfig,
        init_weights: &str,
        run_name: &str,
    ) -> Result<TrainingOutcome, TrainerError>;

    async fn validate(
        &self,
        weights: &Path,
        data: &Path,
        device: &str,
    ) -> Result<ValidationMetrics, TrainerError>;

    /// Export weights to ONNX and return the exported file.
    async fn export_onnx(&self, weights: &Path) -> Result<PathBuf, TrainerError>;
}

/// Drives the Ultralytics `yolo` command line.
pub struct UltralyticsCli {
    program: String,
}

impl Default for UltralyticsCli {
    fn default() -> Self {
        Self::new("yolo")
    }
}

impl UltralyticsCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<String, TrainerError> {
        tracing::info!(program = %self.program, args = ?args, "Running training backend");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| TrainerError::Backend(format!("failed to start {}: {e}", self.program)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(TrainerError::Backend(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                tail(&text, 20)
            )));
        }
        Ok(text)
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[async_trait]
impl TrainingBackend for UltralyticsCli {
    async fn train(
        &self,
        config: &TrainingConfig,
        init_weights: &str,
        run_name: &str,
    ) -> Result<TrainingOutcome, TrainerError> {
        let args = vec![
            "detect".to_string(),
            "train".to_string(),
            format!("model={init_weights}"),
            format!("data={}", config.data.yaml_path.display()),
            format!("epochs={}", config.training.epochs),
            format!("batch={}", config.training.batch_size),
            format!("imgsz={}", config.model.img_size),
            format!("lr0={}", config.training.learning_rate),
            format!("device={}", config.device),
            format!("project={}", config.output.project_dir.display()),
            format!("name={run_name}"),
            "save=True".to_string(),
            "val=True".to_string(),
        ];
        self.run(&args).await?;

        let save_dir = config.output.project_dir.join(run_name);
        let best = save_dir.join("weights").join("best.pt");
        let best_weights = best.exists().then_some(best);

        let results_csv = save_dir.join("results.csv");
        let epochs = if results_csv.exists() {
            parse_results_csv(&tokio::fs::read_to_string(&results_csv).await?)?
        } else {
            tracing::warn!(path = %results_csv.display(), "No per-epoch results found");
            Vec::new()
        };

        Ok(TrainingOutcome {
            save_dir,
            best_weights,
            epochs,
        })
    }

    async fn validate(
        &self,
        weights: &Path,
        data: &Path,
        device: &str,
    ) -> Result<ValidationMetrics, TrainerError> {
        let args = vec![
            "detect".to_string(),
            "val".to_string(),
            format!("model={}", weights.display()),
            format!("data={}", data.display()),
            format!("device={device}"),
        ];
        let output = self.run(&args).await?;
        parse_validation_output(&output)
    }

    async fn export_onnx(&self, weights: &Path) -> Result<PathBuf, TrainerError> {
        let args = vec![
            "export".to_string(),
            format!("model={}", weights.display()),
            "format=onnx".to_string(),
        ];
        self.run(&args).await?;

        let exported = weights.with_extension("onnx");
        if !exported.exists() {
            return Err(TrainerError::Backend(format!(
                "export finished but {} is missing",
                exported.display()
            )));
        }
        Ok(exported)
    }
}

/// Parse the `results.csv` Ultralytics writes into the run directory.
///
/// Header names may be padded with spaces depending on the Ultralytics version.
pub fn parse_results_csv(contents: &str) -> Result<Vec<EpochMetrics>, TrainerError> {
    let mut lines = contents.lines().filter(|line| !line.trim().is_empty());
    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| TrainerError::Backend("results.csv is empty".to_string()))?
        .split(',')
        .map(str::trim)
        .collect();

    let column = |name: &str| {
        header
            .iter()
            .position(|h| *h == name)
            .ok_or_else(|| TrainerError::Backend(format!("results.csv has no `{name}` column")))
    };
    let epoch_col = column("epoch")?;
    let box_col = column("train/box_loss")?;
    let cls_col = column("train/cls_loss")?;
    let dfl_col = column("train/dfl_loss")?;
    let map50_col = column("metrics/mAP50(B)")?;
    let map_col = column("metrics/mAP50-95(B)")?;

    lines
        .enumerate()
        .map(|(row, line)| {
            let values: Vec<&str> = line.split(',').map(str::trim).collect();
            let value = |col: usize| -> Result<f64, TrainerError> {
                values
                    .get(col)
                    .and_then(|v| v.parse::<f64>().ok())
                    .ok_or_else(|| {
                        TrainerError::Backend(format!("results.csv row {}: bad value", row + 1))
                    })
            };

            Ok(EpochMetrics {
                epoch: value(epoch_col)? as u64,
                box_loss: value(box_col)?,
                cls_loss: value(cls_col)?,
                dfl_loss: value(dfl_col)?,
                map50: value(map50_col)?,
                map50_95: value(map_col)?,
            })
        })
        .collect()
}

/// One table row: name, images, instances, P, R, mAP50, mAP50-95.
fn parse_table_row(line: &str) -> Option<ClassMetrics> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 7 {
        return None;
    }
    let (name, numbers) = tokens.split_at(tokens.len() - 6);
    let numbers: Vec<f64> = numbers
        .iter()
        .map(|t| t.parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;

    Some(ClassMetrics {
        name: name.join(" "),
        precision: numbers[2],
        recall: numbers[3],
        map50: numbers[4],
        map50_95: numbers[5],
    })
}

/// Extract the summary (`all`) row and per-class rows from the validator's
/// printed table.
pub fn parse_validation_output(output: &str) -> Result<ValidationMetrics, TrainerError> {
    let mut summary = None;
    let mut per_class = Vec::new();

    for row in output.lines().filter_map(parse_table_row) {
        if row.name == "all" {
            // A later table (e.g. a second validation pass) supersedes earlier ones
            summary = Some(row);
            per_class.clear();
        } else if summary.is_some() {
            per_class.push(row);
        }
    }

    let summary = summary.ok_or_else(|| {
        TrainerError::Backend("validation output has no `all` summary row".to_string())
    })?;

    Ok(ValidationMetrics {
        precision: summary.precision,
        recall: summary.recall,
        map50: summary.map50,
        map50_95: summary.map50_95,
        per_class,
    })
}
