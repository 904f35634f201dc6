use crate::error::TrainerError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;

/// Terminal state of a tracker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }
}

/// Experiment tracking for one training run at a time.
#[async_trait]
pub trait Tracker: Send {
    async fn start_run(&mut self, run_name: &str) -> Result<(), TrainerError>;

    async fn log_params(&mut self, params: &[(String, String)]) -> Result<(), TrainerError>;

    async fn log_metric(
        &mut self,
        key: &str,
        value: f64,
        step: Option<u64>,
    ) -> Result<(), TrainerError>;

    /// Upload a local file under `artifact_path` in the run's artifact store.
    async fn log_artifact(
        &mut self,
        local_path: &Path,
        artifact_path: &str,
    ) -> Result<(), TrainerError>;

    /// Register the artifacts at `artifact_path` as a new version of `name`.
    async fn register_model(&mut self, name: &str, artifact_path: &str)
    -> Result<(), TrainerError>;

    async fn end_run(&mut self, status: RunStatus) -> Result<(), TrainerError>;
}

#[derive(Debug, Clone)]
struct ActiveRun {
    experiment_id: String,
    run_id: String,
    artifact_uri: String,
}

/// MLflow tracking server client over its REST API.
pub struct MlflowTracker {
    client: reqwest::Client,
    base_url: String,
    experiment_name: String,
    run: Option<ActiveRun>,
}

#[derive(Deserialize)]
struct ExperimentResponse {
    experiment: Experiment,
}

#[derive(Deserialize)]
struct Experiment {
    experiment_id: String,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct RunResponse {
    run: Run,
}

#[derive(Deserialize)]
struct Run {
    info: RunInfo,
}

#[derive(Deserialize)]
struct RunInfo {
    run_id: String,
    artifact_uri: String,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl MlflowTracker {
    pub fn new(tracking_uri: &str, experiment_name: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: tracking_uri.trim_end_matches('/').to_string(),
            experiment_name: experiment_name.to_string(),
            run: None,
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run.as_ref().map(|run| run.run_id.as_str())
    }

    fn api(&self, endpoint: &str) -> String {
        format!("{}/api/2.0/mlflow/{endpoint}", self.base_url)
    }

    fn active_run(&self) -> Result<&ActiveRun, TrainerError> {
        self.run
            .as_ref()
            .ok_or_else(|| TrainerError::Tracker("no active run".to_string()))
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<Value, TrainerError> {
        let response = self.client.post(self.api(endpoint)).json(&body).send().await?;
        read_json(endpoint, response).await
    }

    async fn experiment_id(&self) -> Result<String, TrainerError> {
        let response = self
            .client
            .get(self.api("experiments/get-by-name"))
            .query(&[("experiment_name", self.experiment_name.as_str())])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::info!(experiment = %self.experiment_name, "Creating experiment");
            let created = self
                .post("experiments/create", json!({ "name": self.experiment_name }))
                .await?;
            let created: CreateExperimentResponse = parse("experiments/create", created)?;
            return Ok(created.experiment_id);
        }

        let found: ExperimentResponse =
            parse("experiments/get-by-name", read_json("experiments/get-by-name", response).await?)?;
        Ok(found.experiment.experiment_id)
    }
}

async fn read_json(endpoint: &str, response: reqwest::Response) -> Result<Value, TrainerError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(TrainerError::Tracker(format!(
            "{endpoint} returned {status}: {body}"
        )));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body)
        .map_err(|e| TrainerError::Tracker(format!("{endpoint} returned invalid JSON: {e}")))
}

fn parse<T: serde::de::DeserializeOwned>(endpoint: &str, value: Value) -> Result<T, TrainerError> {
    serde_json::from_value(value)
        .map_err(|e| TrainerError::Tracker(format!("unexpected {endpoint} response: {e}")))
}

#[async_trait]
impl Tracker for MlflowTracker {
    async fn start_run(&mut self, run_name: &str) -> Result<(), TrainerError> {
        let experiment_id = self.experiment_id().await?;

        let created = self
            .post(
                "runs/create",
                json!({
                    "experiment_id": experiment_id,
                    "run_name": run_name,
                    "start_time": now_millis(),
                    "tags": [{ "key": "mlflow.runName", "value": run_name }],
                }),
            )
            .await?;
        let created: RunResponse = parse("runs/create", created)?;

        tracing::info!(run_id = %created.run.info.run_id, run_name, "Tracker run started");

        self.run = Some(ActiveRun {
            experiment_id,
            run_id: created.run.info.run_id,
            artifact_uri: created.run.info.artifact_uri,
        });
        Ok(())
    }

    async fn log_params(&mut self, params: &[(String, String)]) -> Result<(), TrainerError> {
        let run_id = self.active_run()?.run_id.clone();
        let params: Vec<Value> = params
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect();

        self.post("runs/log-batch", json!({ "run_id": run_id, "params": params }))
            .await?;
        Ok(())
    }

    async fn log_metric(
        &mut self,
        key: &str,
        value: f64,
        step: Option<u64>,
    ) -> Result<(), TrainerError> {
        let run_id = self.active_run()?.run_id.clone();
        self.post(
            "runs/log-metric",
            json!({
                "run_id": run_id,
                "key": key,
                "value": value,
                "timestamp": now_millis(),
                "step": step.unwrap_or(0),
            }),
        )
        .await?;
        Ok(())
    }

    async fn log_artifact(
        &mut self,
        local_path: &Path,
        artifact_path: &str,
    ) -> Result<(), TrainerError> {
        let run = self.active_run()?.clone();
        let file_name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                TrainerError::Tracker(format!("invalid artifact file {}", local_path.display()))
            })?;

        let bytes = tokio::fs::read(local_path).await?;
        let url = format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}/artifacts/{}/{}",
            self.base_url,
            run.experiment_id,
            run.run_id,
            artifact_path.trim_matches('/'),
            file_name
        );

        let response = self.client.put(url).body(bytes).send().await?;
        read_json("mlflow-artifacts", response).await?;

        tracing::info!(file = %local_path.display(), artifact_path, "Artifact uploaded");
        Ok(())
    }

    async fn register_model(
        &mut self,
        name: &str,
        artifact_path: &str,
    ) -> Result<(), TrainerError> {
        let run = self.active_run()?.clone();

        let response = self
            .client
            .post(self.api("registered-models/create"))
            .json(&json!({ "name": name }))
            .send()
            .await?;
        // An existing registered model just gets a new version
        if response.status() != reqwest::StatusCode::CONFLICT
            && response.status() != reqwest::StatusCode::BAD_REQUEST
        {
            read_json("registered-models/create", response).await?;
        }

        self.post(
            "model-versions/create",
            json!({
                "name": name,
                "source": format!("{}/{}", run.artifact_uri, artifact_path.trim_matches('/')),
                "run_id": run.run_id,
            }),
        )
        .await?;

        tracing::info!(model = name, "Model version registered");
        Ok(())
    }

    async fn end_run(&mut self, status: RunStatus) -> Result<(), TrainerError> {
        let run_id = self.active_run()?.run_id.clone();
        self.post(
            "runs/update",
            json!({
                "run_id": run_id,
                "status": status.as_str(),
                "end_time": now_millis(),
            }),
        )
        .await?;

        tracing::info!(run_id = %run_id, status = status.as_str(), "Tracker run ended");
        self.run = None;
        Ok(())
    }
}
