use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Submission rejected by pool {0}")]
    Rejected(String),

    #[error("Queue capacity change failed for pool {pool}: {reason}")]
    QueueResize { pool: String, reason: String },

    #[error("Pool {0} is shut down")]
    ShutDown(String),

    #[error("Registry transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
