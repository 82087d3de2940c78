use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not canonicalize repository url: {0}")]
    InvalidUrl(String),

    #[error("timed out acquiring clone lock for {0}")]
    CloneLockTimeout(String),

    #[error("git clone failed: {0}")]
    CloneFailed(String),

    #[error("git fetch failed: {0}")]
    FetchFailed(String),

    #[error("could not resolve target ref: {0}")]
    RefResolutionFailed(String),

    #[error("git reset failed: {0}")]
    ResetFailed(String),

    #[error("coordination store error: {0}")]
    Store(#[from] driftd_core::Error),
}

pub type Result<T> = std::result::Result<T, MaterializeError>;
