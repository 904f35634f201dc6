use crate::{
    backend::{TrainingBackend, ValidationMetrics},
    checkpoint::{Checkpoint, PromotionDecision, decide, promote_checkpoint},
    config::{EvaluationConfig, TrainingConfig},
    error::TrainerError,
    tracker::{RunStatus, Tracker},
};
use chrono::{DateTime, TimeZone};
use std::path::PathBuf;

const MODEL_ARTIFACT_PATH: &str = "model";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    BaselineEval,
    Training,
    CandidateEval,
    Promote,
    Keep,
    LoggingComplete,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub run_name: String,
    pub baseline_score: Option<f64>,
    pub candidate: Option<Checkpoint>,
    pub decision: PromotionDecision,
    pub canonical_checkpoint: PathBuf,
    /// Score of the canonical checkpoint after the run.
    pub final_score: Option<f64>,
}

/// Run name in the `run_YYYYmmdd_HHMMSS` form.
pub fn run_name<Tz: TimeZone>(now: DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("run_{}", now.format("%Y%m%d_%H%M%S"))
}

/// Trains, evaluates and promotes one checkpoint, reporting to a tracker.
///
/// Once the tracker run is started it is always ended: `FINISHED` when every
/// step succeeds, `FAILED` before any error is returned.
pub struct TrainingDriver<B, T> {
    config: TrainingConfig,
    backend: B,
    tracker: T,
    state: DriverState,
    history: Vec<DriverState>,
}

impl<B: TrainingBackend, T: Tracker> TrainingDriver<B, T> {
    pub fn new(config: TrainingConfig, backend: B, tracker: T) -> Self {
        Self {
            config,
            backend,
            tracker,
            state: DriverState::Idle,
            history: vec![DriverState::Idle],
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Every state the driver has entered, in order.
    pub fn history(&self) -> &[DriverState] {
        &self.history
    }

    fn enter(&mut self, state: DriverState) {
        tracing::debug!(from = ?self.state, to = ?state, "Driver state change");
        self.state = state;
        self.history.push(state);
    }

    pub async fn run(&mut self) -> Result<TrainingReport, TrainerError> {
        let run_name = run_name(chrono::Local::now());
        if let Err(e) = self.tracker.start_run(&run_name).await {
            tracing::error!(error = %e, run = %run_name, "Failed to start tracker run");
            self.enter(DriverState::Failed);
            return Err(e);
        }

        let result = match self.execute(&run_name).await {
            Ok(report) => match self.tracker.end_run(RunStatus::Finished).await {
                Ok(()) => Ok(report),
                Err(e) => {
                    tracing::error!(error = %e, run = %run_name, "Failed to finish tracker run");
                    self.end_run_failed().await;
                    Err(e)
                }
            },
            Err(e) => {
                tracing::error!(error = %e, run = %run_name, "Training failed");
                self.end_run_failed().await;
                Err(e)
            }
        };

        match &result {
            Ok(_) => self.enter(DriverState::LoggingComplete),
            Err(_) => self.enter(DriverState::Failed),
        }
        result
    }

    async fn end_run_failed(&mut self) {
        if let Err(e) = self.tracker.end_run(RunStatus::Failed).await {
            tracing::error!(error = %e, "Failed to mark tracker run as failed");
        }
    }

    async fn execute(&mut self, run_name: &str) -> Result<TrainingReport, TrainerError> {
        self.tracker.log_params(&self.config.params()).await?;

        let canonical = self.config.output.canonical_checkpoint.clone();
        let data = self.config.data.yaml_path.clone();
        let device = self.config.device.clone();

        let baseline_score = if canonical.exists() {
            self.enter(DriverState::BaselineEval);
            let metrics = self.backend.validate(&canonical, &data, &device).await?;
            tracing::info!(score = metrics.map50_95, "Baseline checkpoint evaluated");
            self.tracker
                .log_metric("baseline/mAP50-95", metrics.map50_95, None)
                .await?;
            Some(metrics.map50_95)
        } else {
            tracing::info!(canonical = %canonical.display(), "No canonical checkpoint, training from architecture");
            None
        };

        self.enter(DriverState::Training);
        let init_weights = if baseline_score.is_some() {
            canonical.display().to_string()
        } else {
            self.config.model.architecture.clone()
        };
        let outcome = self
            .backend
            .train(&self.config, &init_weights, run_name)
            .await?;

        for epoch in &outcome.epochs {
            for (key, value) in epoch.entries() {
                self.tracker.log_metric(key, value, Some(epoch.epoch)).await?;
            }
        }

        self.enter(DriverState::CandidateEval);
        let candidate = match &outcome.best_weights {
            Some(weights) if weights.exists() => {
                let metrics = self.backend.validate(weights, &data, &device).await?;
                tracing::info!(score = metrics.map50_95, "Candidate checkpoint evaluated");
                self.tracker
                    .log_metric("candidate/mAP50-95", metrics.map50_95, None)
                    .await?;
                Some(Checkpoint {
                    path: weights.clone(),
                    score: metrics.map50_95,
                })
            }
            _ => {
                tracing::warn!(save_dir = %outcome.save_dir.display(), "Training produced no best weights");
                None
            }
        };

        let decision = decide(candidate.as_ref().map(|c| c.score), baseline_score);
        let final_score = match (&candidate, decision) {
            (Some(candidate), PromotionDecision::Promote) => {
                self.enter(DriverState::Promote);
                promote_checkpoint(&candidate.path, &canonical)?;
                Some(candidate.score)
            }
            _ => {
                self.enter(DriverState::Keep);
                tracing::info!(baseline = ?baseline_score, "Keeping existing canonical checkpoint");
                baseline_score
            }
        };

        if let Some(score) = final_score {
            self.tracker.log_metric("final/mAP50-95", score, None).await?;
        }

        self.log_model(&canonical, decision).await;

        Ok(TrainingReport {
            run_name: run_name.to_string(),
            baseline_score,
            candidate,
            decision,
            canonical_checkpoint: canonical,
            final_score,
        })
    }

    /// Upload and register the canonical checkpoint. Failures are logged only.
    async fn log_model(&mut self, canonical: &std::path::Path, decision: PromotionDecision) {
        if !canonical.exists() {
            return;
        }

        match self
            .tracker
            .log_artifact(canonical, MODEL_ARTIFACT_PATH)
            .await
        {
            Ok(()) => {
                let name = self.config.model.name.clone();
                if let Err(e) = self.tracker.register_model(&name, MODEL_ARTIFACT_PATH).await {
                    tracing::warn!(error = %e, model = %name, "Failed to register model");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to log model"),
        }

        if self.config.output.export_onnx && decision == PromotionDecision::Promote {
            match self.backend.export_onnx(canonical).await {
                Ok(onnx) => {
                    if let Err(e) = self.tracker.log_artifact(&onnx, MODEL_ARTIFACT_PATH).await {
                        tracing::warn!(error = %e, "Failed to log ONNX export");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "ONNX export failed"),
            }
        }
    }
}

/// Validate the configured weights on the test split.
pub async fn evaluate<B: TrainingBackend>(
    backend: &B,
    config: &EvaluationConfig,
) -> Result<ValidationMetrics, TrainerError> {
    if !config.model.weights.exists() {
        return Err(TrainerError::Checkpoint(format!(
            "weights not found: {}",
            config.model.weights.display()
        )));
    }

    backend
        .validate(&config.model.weights, &config.data.test_yaml_path, &config.device)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_run_name_format() {
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(run_name(now), "run_20250307_090501");
    }
}
