pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod error;
pub mod tracker;

pub use backend::{TrainingBackend, UltralyticsCli, ValidationMetrics};
pub use checkpoint::{PromotionDecision, promote_checkpoint};
pub use config::{EvaluationConfig, TrainingConfig};
pub use driver::{DriverState, TrainingDriver, TrainingReport, evaluate};
pub use error::TrainerError;
pub use tracker::{MlflowTracker, RunStatus, Tracker};
