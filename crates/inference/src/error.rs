use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    /// The detection engine failed. The detail is for logs, not for clients.
    #[error("Inference failed: {0}")]
    Internal(String),

    #[error("Malformed engine output: {0}")]
    Format(String),

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Decode error: {0}")]
    Decode(String),
}
