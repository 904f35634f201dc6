use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Experiment tracker error: {0}")]
    Tracker(String),

    #[error("Training backend error: {0}")]
    Backend(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TrainerError {
    fn from(err: config::ConfigError) -> Self {
        TrainerError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for TrainerError {
    fn from(err: reqwest::Error) -> Self {
        TrainerError::Tracker(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        let err = TrainerError::Backend("yolo exited with status 1".to_string());
        assert_eq!(
            err.to_string(),
            "Training backend error: yolo exited with status 1"
        );

        let err: TrainerError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "best.pt").into();
        assert!(matches!(err, TrainerError::Io(_)));
    }
}
