use crate::error::TrainerError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "TRAINER";

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSection {
    /// Architecture id or weights file used when no canonical checkpoint exists.
    pub architecture: String,
    /// Name the promoted model is registered under.
    pub name: String,
    pub img_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSection {
    pub yaml_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingSection {
    pub batch_size: u32,
    pub epochs: u32,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    pub project_dir: PathBuf,
    #[serde(default = "default_canonical_checkpoint")]
    pub canonical_checkpoint: PathBuf,
    /// Export the promoted checkpoint to ONNX for serving.
    #[serde(default = "default_export_onnx")]
    pub export_onnx: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MlflowSection {
    pub tracking_uri: String,
    pub experiment_name: String,
}

/// One training run, loaded once and never modified afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    pub model: ModelSection,
    pub data: DataSection,
    pub training: TrainingSection,
    #[serde(default = "default_device")]
    pub device: String,
    pub output: OutputSection,
    pub mlflow: MlflowSection,
}

fn default_canonical_checkpoint() -> PathBuf {
    PathBuf::from("models/best.pt")
}

fn default_export_onnx() -> bool {
    true
}

fn default_device() -> String {
    "cpu".to_string()
}

fn load<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, TrainerError> {
    if !path.exists() {
        return Err(TrainerError::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    let config = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize::<T>()?)
}

impl TrainingConfig {
    /// Read a YAML training configuration, with `TRAINER_` environment overrides
    /// (e.g. `TRAINER_TRAINING__EPOCHS=5`).
    pub fn load(path: &Path) -> Result<Self, TrainerError> {
        let config: Self = load(path)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TrainerError> {
        if self.training.epochs == 0 {
            return Err(TrainerError::Config("training.epochs must be positive".into()));
        }
        if self.training.batch_size == 0 {
            return Err(TrainerError::Config(
                "training.batch_size must be positive".into(),
            ));
        }
        if !(self.training.learning_rate > 0.0) {
            return Err(TrainerError::Config(
                "training.learning_rate must be positive".into(),
            ));
        }
        if self.model.img_size == 0 {
            return Err(TrainerError::Config("model.img_size must be positive".into()));
        }
        Ok(())
    }

    /// Parameters recorded on the tracker run.
    pub fn params(&self) -> Vec<(String, String)> {
        vec![
            ("model_architecture".into(), self.model.architecture.clone()),
            ("batch_size".into(), self.training.batch_size.to_string()),
            ("epochs".into(), self.training.epochs.to_string()),
            ("learning_rate".into(), self.training.learning_rate.to_string()),
            ("img_size".into(), self.model.img_size.to_string()),
            ("device".into(), self.device.clone()),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationModel {
    pub weights: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationData {
    pub test_yaml_path: PathBuf,
}

/// Standalone validation of one weights file against a test split.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    pub model: EvaluationModel,
    pub data: EvaluationData,
    #[serde(default = "default_device")]
    pub device: String,
}

impl EvaluationConfig {
    pub fn load(path: &Path) -> Result<Self, TrainerError> {
        load(path)
    }
}
