use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] driftd_core::Error),

    #[error("materialization failed: {0}")]
    Materialize(#[from] driftd_workspace::MaterializeError),

    #[error("stack discovery failed: {0}")]
    Discovery(#[from] driftd_discovery::DiscoveryError),

    #[error("no stacks discovered")]
    NoStacksDiscovered,

    #[error("invalid cron expression '{expr}': {source}")]
    InvalidCron { expr: String, source: cron::error::Error },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
